//! # fedecoder
//!
//! fedecoder is the readout event decoder for silicon-tracker front-end
//! chips, written in Rust. It takes the raw 32-bit word streams produced by
//! the front-end firmware, turns them into per-chip hit and stub records for
//! the calibration tools, and re-packs decoded events into the S-Link wire
//! format consumed by the central DAQ.
//!
//! ## Supported formats
//!
//! Five incompatible on-wire layouts share the common event header:
//!
//! - **CBC3**: framed per-chip packets with a dense 254-channel hit
//!   bitstream and three stub slots.
//! - **CIC2**: one packet per hybrid; a concentrator chip aggregates its
//!   eight neighbours into sparsified 14-bit hit-cluster and 15-bit stub
//!   words.
//! - **MPA**: framed per-chip packets carrying 12-bit strip clusters and
//!   15-bit pixel clusters packed back-to-back, plus five stub slots.
//! - **SSA**: fixed 12-word stride per chip with a dense 120-channel
//!   bitstream and chip-local addressing.
//! - **MPA-Async / SSA-Async**: unframed per-channel counter dumps from
//!   bench setups without trigger logic.
//!
//! ## Usage
//!
//! Build a [Decoder](event::Decoder) once from the topology configuration,
//! then feed it one raw buffer per trigger:
//!
//! ```no_run
//! use libfedecoder::config::Config;
//! use libfedecoder::event::Decoder;
//! use libfedecoder::raw_file::RawFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::read_config_file(std::path::Path::new("topology.yaml"))?;
//! let decoder = Decoder::from_config(&config)?;
//! let mut file = RawFile::new(std::path::Path::new("run_0001.raw"))?;
//! while let Ok(words) = file.next_event() {
//!     let event = decoder.decode(&words)?;
//!     for hybrid in decoder.slots().hybrids() {
//!         for chip in &hybrid.chip_ids {
//!             let _hits = event.hits(hybrid.id, *chip);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Topologies are described in YAML:
//!
//! ```yml
//! front_end: cbc3
//! hybrids:
//! - id: 0
//!   chip_ids: [0, 1, 2, 3, 4, 5, 6, 7]
//!   has_concentrator: false
//! sparsified: true
//! debug_mode: full
//! condition_data_enabled: false
//! ```
//!
//! The `cic_remap` table only needs to appear for non-standard concentrator
//! wiring; it defaults to the hardware layout and is validated on load.
//!
//! ## Error policy
//!
//! A bad leading sentinel or a bad per-chip sub-header magic aborts the
//! event with a typed error, never the process: the caller logs and moves to
//! the next trigger. A block-size mismatch is logged and decoded
//! best-effort. Asking for a chip absent from an event yields empty results
//! and a log line; asking for a field a format does not carry (pipeline
//! address on a concentrator, for instance) yields a distinct
//! not-applicable answer.
//!
//! Decoding is single-threaded, synchronous and allocation-owned: each
//! decoded event is immutable and independent, so callers may decode
//! different buffers on different threads without locks.

pub mod async_event;
pub mod bitfield;
pub mod cbc3;
pub mod chip_map;
pub mod cic2;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod error;
pub mod event;
pub mod header;
pub mod mpa;
pub mod occupancy;
pub mod payload;
pub mod raw_file;
pub mod records;
pub mod slink;
pub mod ssa;
