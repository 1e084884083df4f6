//! Re-encoder to the downstream S-Link wire format.
//!
//! An encoded event is a flat list of 64-bit lanes:
//!
//! - DAQ header: BOE nibble, event type, 24-bit L1 id, 12-bit bunch id,
//!   12-bit source id, FOV nibble.
//! - Tracker header word 0: debug level (2, bits 63..62), event type
//!   (4, bits 61..58), condition-data flag (bit 57), fake flag (bit 56),
//!   chip count (16, bits 55..40), high half of the 64-bit enabled-hybrid
//!   bitmap (bits 31..0).
//! - Tracker header word 1: low half of the hybrid bitmap (bits 63..32),
//!   back-end status (bits 31..0).
//! - Status payload: per chip 1 bit (error mode) or a 20-bit word
//!   {error(2), pipeline(9), l1 counter(9)} (full mode), packed to lanes.
//! - Hit payload: per hybrid a 16-bit chip presence word, then per present
//!   chip the 254 channel bits (padding stripped) plus 2 zero bits.
//! - Stub payload: per hybrid a 6-bit header (stub count << 1), then one
//!   16-bit {chip(4), position(8), bend(4)} word per stub.
//! - Condition data: a count lane followed by the caller's pre-encoded items.
//! - Trailer: EOE byte, running 64-bit word count, CRC-16, TTS nibble.
//!
//! The companion [hit_and_stub_counts](SLinkOutput::hit_and_stub_counts)
//! walk re-derives the per-event totals from the packed payloads alone; the
//! external convert tool performs the same walk as the system's own
//! round-trip check.

use bitvec::prelude::*;
use crc::{Crc, CRC_16_IBM_3740};
use serde::{Deserialize, Serialize};

use super::cbc3::Cbc3Event;
use super::constants::*;
use super::error::SLinkError;

/// How much per-chip detail the status payload carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SLinkDebugMode {
    #[default]
    Summary,
    Error,
    Full,
}

/// One condition-data registration: a register value snapshot to ship with
/// the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionItem {
    pub fe_id: u8,
    pub chip_id: u8,
    pub page: u8,
    pub register: u8,
    pub uid: u8,
    pub value: u32,
}

impl ConditionItem {
    pub fn encode(&self) -> u64 {
        (self.fe_id as u64) << 56
            | ((self.chip_id & 0xF) as u64) << 52
            | ((self.page & 0xF) as u64) << 48
            | (self.register as u64) << 40
            | (self.uid as u64) << 32
            | self.value as u64
    }
}

/// The condition-data snapshot supplied by the surrounding system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionData {
    pub enabled: bool,
    pub items: Vec<ConditionItem>,
}

impl ConditionData {
    /// Copy of the snapshot with the TDC phase item refreshed from the
    /// decoded event.
    pub fn with_tdc(&self, tdc: u8) -> Self {
        let mut updated = self.clone();
        for item in &mut updated.items {
            if item.uid == SLINK_TDC_UID {
                item.value = tdc as u32;
            }
        }
        updated
    }
}

/// One encoded S-Link event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SLinkOutput {
    pub daq_header: u64,
    pub tracker_header: [u64; 2],
    pub status: Vec<u64>,
    pub hit_payload: Vec<u64>,
    pub stub_payload: Vec<u64>,
    pub condition_data: Vec<u64>,
    pub trailer: u64,
}

impl SLinkOutput {
    /// Total length in 64-bit words, trailer included.
    pub fn len64(&self) -> usize {
        3 + self.status.len()
            + self.hit_payload.len()
            + self.stub_payload.len()
            + self.condition_data.len()
            + 1
    }

    pub fn to_words(&self) -> Vec<u64> {
        let mut words = Vec::with_capacity(self.len64());
        words.push(self.daq_header);
        words.extend_from_slice(&self.tracker_header);
        words.extend_from_slice(&self.status);
        words.extend_from_slice(&self.hit_payload);
        words.extend_from_slice(&self.stub_payload);
        words.extend_from_slice(&self.condition_data);
        words.push(self.trailer);
        words
    }

    /// Flatten to the 32-bit words written to disk, high half first.
    pub fn to_words32(&self) -> Vec<u32> {
        self.to_words()
            .iter()
            .flat_map(|word| [(word >> 32) as u32, *word as u32])
            .collect()
    }

    /// Independently re-derive hit and stub counts from the packed payloads.
    pub fn hit_and_stub_counts(&self, n_hybrids: usize) -> (u32, u32) {
        let hit_bits = self.hit_payload.view_bits::<Msb0>();
        let mut cursor = 0;
        let mut hits = 0u32;
        for _ in 0..n_hybrids {
            if cursor + 16 > hit_bits.len() {
                break;
            }
            let presence = hit_bits[cursor..cursor + 16].load_be::<u16>();
            cursor += 16;
            for _ in 0..presence.count_ones() {
                if cursor + CBC3_CHANNELS > hit_bits.len() {
                    break;
                }
                hits += hit_bits[cursor..cursor + CBC3_CHANNELS].count_ones() as u32;
                cursor += CBC3_CHANNELS + 2;
            }
        }
        let stub_bits = self.stub_payload.view_bits::<Msb0>();
        let mut cursor = 0;
        let mut stubs = 0u32;
        for _ in 0..n_hybrids {
            if cursor + 6 > stub_bits.len() {
                break;
            }
            let count = (stub_bits[cursor..cursor + 6].load_be::<u8>() >> 1) as u32;
            cursor += 6 + count as usize * 16;
            stubs += count;
        }
        (hits, stubs)
    }
}

fn daq_header(l1_id: u32, bunch_id: u16) -> u64 {
    (SLINK_BOE_1 as u64) << 60
        | (SLINK_EVENT_TYPE as u64) << 56
        | ((l1_id & 0x00FF_FFFF) as u64) << 32
        | ((bunch_id & 0xFFF) as u64) << 20
        | ((SLINK_SOURCE_ID & 0xFFF) as u64) << 8
        | ((SLINK_FOV & 0xF) as u64) << 4
}

fn tracker_header(
    debug_mode: SLinkDebugMode,
    n_chips: u16,
    fe_bitmap: u64,
    cond_data: bool,
) -> [u64; 2] {
    let word0 = (debug_mode as u64) << 62
        | (SLINK_EVENT_TYPE as u64) << 58
        | (cond_data as u64) << 57
        | (n_chips as u64) << 40
        | (fe_bitmap >> 32);
    let word1 = (fe_bitmap & 0xFFFF_FFFF) << 32;
    [word0, word1]
}

fn trailer(body: &[u64]) -> u64 {
    let crc = Crc::<u16>::new(&CRC_16_IBM_3740);
    let mut digest = crc.digest();
    for word in body {
        digest.update(&word.to_be_bytes());
    }
    (SLINK_EOE_1 as u64) << 56
        | ((body.len() as u64 + 1) & 0x00FF_FFFF) << 32
        | (digest.finalize() as u64) << 16
        | (SLINK_TTS_VALUE as u64) << 4
}

/// Encode one decoded CBC3 event.
///
/// Only the CBC3 format has an S-Link path; the concentrator encoder is an
/// unfinished TODO upstream and the MPA/SSA formats never had one.
pub fn encode_cbc3(
    event: &Cbc3Event,
    debug_mode: SLinkDebugMode,
    condition_data: &ConditionData,
) -> Result<SLinkOutput, SLinkError> {
    use super::payload::GenericPayload;

    let mut status = GenericPayload::new();
    let mut hit_payload = GenericPayload::new();
    let mut stub_payload = GenericPayload::new();
    let mut fe_bitmap = 0u64;
    let mut n_chips = 0u16;

    for hybrid in event.slots().hybrids() {
        fe_bitmap |= 1 << (hybrid.id & 0x3F);
        let mut presence = 0u16;
        let hit_mark = hit_payload.write_position();
        let stub_mark = stub_payload.write_position();
        let mut fe_stub_count = 0u8;

        for chip_id in &hybrid.chip_ids {
            let record = event
                .record(hybrid.id, *chip_id)
                .ok_or(SLinkError::MissingChipRecord(hybrid.id, *chip_id))?;

            match debug_mode {
                SLinkDebugMode::Summary => (),
                SLinkDebugMode::Error => status.append((record.error != 0) as u64, 1),
                SLinkDebugMode::Full => {
                    let word = (record.error as u64) << 18
                        | (record.pipeline_address as u64) << 9
                        | record.l1_counter as u64;
                    status.append(word, 20);
                }
            }

            presence |= 1u16 << *chip_id;
            // channels 0..223 in seven full words, the last 30 channels with
            // the two padding bits stripped
            for index in 0..7 {
                let word = record
                    .raw
                    .get(CBC3_FIRST_CHANNEL_WORD + index)
                    .copied()
                    .unwrap_or(0);
                hit_payload.append(word as u64, 32);
            }
            let last = record.raw.get(10).copied().unwrap_or(0);
            hit_payload.append(((last & 0xFFFF_FFFC) >> 2) as u64, 30);
            hit_payload.pad_zero(2);

            for stub in &record.stubs {
                let word = ((*chip_id & 0x0F) as u64) << 12
                    | (stub.position as u64) << 4
                    | (stub.bend & 0xF) as u64;
                stub_payload.append(word, 16);
                fe_stub_count += 1;
            }
            n_chips += 1;
        }
        hit_payload.insert(presence as u64, hit_mark, 16);
        stub_payload.insert(((fe_stub_count & 0x1F) << 1) as u64, stub_mark, 6);
    }

    let condition_data = condition_data.with_tdc(event.header().tdc);
    let mut cond_words = Vec::new();
    if condition_data.enabled {
        cond_words.push(condition_data.items.len() as u64);
        cond_words.extend(condition_data.items.iter().map(ConditionItem::encode));
    }

    let mut output = SLinkOutput {
        daq_header: daq_header(
            event.header().event_count,
            event.header().bunch_id as u16,
        ),
        tracker_header: tracker_header(debug_mode, n_chips, fe_bitmap, condition_data.enabled),
        status: status.into_words(),
        hit_payload: hit_payload.into_words(),
        stub_payload: stub_payload.into_words(),
        condition_data: cond_words,
        trailer: 0,
    };
    let body: Vec<u64> = {
        let mut words = output.to_words();
        words.pop();
        words
    };
    output.trailer = trailer(&body);
    Ok(output)
}
