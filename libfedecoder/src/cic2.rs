//! Decoder for concentrator-aggregated (CIC2) events.
//!
//! The concentrator re-packs the hit and stub streams of all chips on a
//! hybrid, so framing is per hybrid, not per chip: one L1 packet of 14-bit
//! cluster words and one stub packet of 15-bit stub words. Each cluster or
//! stub word embeds the physical chip id it came from; per-chip views filter
//! on that id through the remap table. The format carries no pipeline
//! address.

use super::bitfield::{bits, split_stream};
use super::chip_map::{ChipSlotMap, CicRemap};
use super::constants::*;
use super::cursor::RawWordCursor;
use super::error::DecodeError;
use super::header::EventHeader;
use super::occupancy::{ChannelMask, OccupancySink};
use super::records::{HitSet, Stub};

/// Per-chip view decoded out of one hybrid's concentrator stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CicChipRecord {
    pub chip_id: u8,
    pub hits: HitSet,
    pub stubs: Vec<Stub>,
}

/// Everything the concentrator reports for one hybrid in one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CicHybridRecord {
    pub l1_counter: u16,
    /// Shared 9-bit status field of the L1 packet; bit (1 + mapped chip id)
    /// is that chip's error flag.
    pub hit_status: u16,
    pub bx_id: u16,
    pub stub_status: u16,
    pub cluster_words: Vec<u16>,
    pub stub_words: Vec<u16>,
    chips: Vec<CicChipRecord>,
}

impl CicHybridRecord {
    fn chip(&self, chip_id: u8) -> Option<&CicChipRecord> {
        self.chips.iter().find(|c| c.chip_id == chip_id)
    }
}

/// One decoded concentrator trigger.
#[derive(Debug, Clone)]
pub struct Cic2Event {
    header: EventHeader,
    slots: ChipSlotMap,
    remap: CicRemap,
    hybrids: Vec<Option<CicHybridRecord>>,
}

impl Cic2Event {
    pub fn new(
        slots: &ChipSlotMap,
        remap: &CicRemap,
        words: &[u32],
    ) -> Result<Self, DecodeError> {
        let header = EventHeader::parse_lenient(words)?;
        let mut hybrids = vec![None; slots.n_hybrids()];
        let mut cursor = RawWordCursor::new(words);
        cursor.advance(header.body_offset())?;

        for (index, hybrid) in slots.hybrids().iter().enumerate() {
            let record = read_hybrid_packet(&mut cursor, words, hybrid.id, remap, &hybrid.chip_ids)?;
            hybrids[index] = Some(record);
        }
        Ok(Self {
            header,
            slots: slots.clone(),
            remap: remap.clone(),
            hybrids,
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn hybrid(&self, hybrid_id: u8) -> Option<&CicHybridRecord> {
        let index = self.slots.hybrid_index(hybrid_id)?;
        self.hybrids[index].as_ref()
    }

    fn hybrid_logged(&self, hybrid_id: u8) -> Option<&CicHybridRecord> {
        let record = self.hybrid(hybrid_id);
        if record.is_none() {
            spdlog::error!("No concentrator record for hybrid {} in this event", hybrid_id);
        }
        record
    }

    fn chip(&self, hybrid_id: u8, chip_id: u8) -> Option<&CicChipRecord> {
        self.hybrid_logged(hybrid_id)?.chip(chip_id)
    }

    pub fn hits(&self, hybrid_id: u8, chip_id: u8) -> Vec<u32> {
        self.chip(hybrid_id, chip_id)
            .map(|c| c.hits.channels())
            .unwrap_or_default()
    }

    pub fn n_hits(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.chip(hybrid_id, chip_id)
            .map(|c| c.hits.count())
            .unwrap_or(0)
    }

    pub fn stubs(&self, hybrid_id: u8, chip_id: u8) -> Vec<Stub> {
        self.chip(hybrid_id, chip_id)
            .map(|c| c.stubs.clone())
            .unwrap_or_default()
    }

    /// One error bit per chip, derived from the shared hybrid status field.
    pub fn error(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        let Some(record) = self.hybrid_logged(hybrid_id) else {
            return 0;
        };
        match self.remap.map(chip_id) {
            Some(mapped) => bits(record.hit_status as u32, 1 + mapped as u32, 1),
            None => 0,
        }
    }

    /// L1 counter is per hybrid; every chip behind the concentrator shares it.
    pub fn l1_id(&self, hybrid_id: u8) -> u32 {
        self.hybrid_logged(hybrid_id)
            .map(|r| r.l1_counter as u32)
            .unwrap_or(0)
    }

    pub fn bx_id(&self, hybrid_id: u8) -> u32 {
        self.hybrid_logged(hybrid_id)
            .map(|r| r.bx_id as u32)
            .unwrap_or(0)
    }

    pub fn status(&self, hybrid_id: u8) -> u16 {
        self.hybrid_logged(hybrid_id)
            .map(|r| r.stub_status)
            .unwrap_or(0)
    }

    pub fn fill_occupancy(&self, sink: &mut dyn OccupancySink, mask: &ChannelMask) {
        for (index, record) in self.hybrids.iter().enumerate() {
            let Some(record) = record else { continue };
            let hybrid_id = self.slots.hybrids()[index].id;
            for chip in &record.chips {
                for channel in chip.hits.channels() {
                    if mask.is_enabled(channel) {
                        sink.add(hybrid_id, chip.chip_id, channel, 1);
                    }
                }
            }
        }
    }
}

fn read_hybrid_packet(
    cursor: &mut RawWordCursor,
    words: &[u32],
    hybrid_id: u8,
    remap: &CicRemap,
    chip_ids: &[u8],
) -> Result<CicHybridRecord, DecodeError> {
    let packet_start = cursor.position();
    let l1_header = cursor.peek()?;
    let magic = bits(l1_header, 28, 4) as u8;
    if magic != HIT_HEADER_MAGIC {
        return Err(DecodeError::BadChipHeader {
            expected: HIT_HEADER_MAGIC,
            got: magic,
            hybrid_id,
            chip_id: 0,
            word: l1_header,
        });
    }
    let error_code = bits(l1_header, 24, 4) as u8;
    if error_code != 0 {
        spdlog::error!(
            "Error code {:#x} in concentrator L1 header of hybrid {}",
            error_code,
            hybrid_id
        );
    }
    let stamped_hybrid = bits(l1_header, 16, 8) as u8;
    if stamped_hybrid != hybrid_id {
        spdlog::warn!(
            "Firmware stamped hybrid {} in a packet framed for hybrid {}",
            stamped_hybrid,
            hybrid_id
        );
    }
    let l1_size = bits(l1_header, 0, 12) as usize * 4;

    let counters = cursor.peek_at(2)?;
    let l1_counter = bits(counters, 14, 9) as u16;
    let hit_status = bits(counters, 23, 9) as u16;
    let n_clusters = bits(counters, 0, 7) as usize;
    let cluster_words: Vec<u16> =
        split_stream(words, packet_start + 3, CIC_CLUSTER_WORD_BITS, n_clusters)?
            .into_iter()
            .map(|w| w as u16)
            .collect();

    let stub_header = cursor.peek_at(l1_size)?;
    let magic = bits(stub_header, 28, 4) as u8;
    if magic != STUB_HEADER_MAGIC {
        return Err(DecodeError::BadChipHeader {
            expected: STUB_HEADER_MAGIC,
            got: magic,
            hybrid_id,
            chip_id: 0,
            word: stub_header,
        });
    }
    let stub_size = bits(stub_header, 0, 12) as usize * 4;
    let stub_counters = cursor.peek_at(l1_size + 1)?;
    let bx_id = bits(stub_counters, 0, 12) as u16;
    let n_stubs = bits(stub_counters, 16, 6) as usize;
    let stub_status = bits(stub_counters, 22, 9) as u16;
    let stub_words: Vec<u16> = split_stream(
        words,
        packet_start + l1_size + 2,
        CIC_STUB_WORD_BITS,
        n_stubs,
    )?
    .into_iter()
    .map(|w| w as u16)
    .collect();

    cursor.advance(l1_size + stub_size)?;

    let chips = chip_ids
        .iter()
        .map(|chip_id| CicChipRecord {
            chip_id: *chip_id,
            hits: decode_clusters(&cluster_words, remap, *chip_id),
            stubs: decode_stubs(&stub_words, remap, *chip_id),
        })
        .collect();

    Ok(CicHybridRecord {
        l1_counter,
        hit_status,
        bx_id,
        stub_status,
        cluster_words,
        stub_words,
        chips,
    })
}

/// Expand the hybrid's cluster words into one chip's hit bitset.
///
/// A cluster word never leaks into another chip's bitset: the embedded chip
/// id has to remap onto the requested chip.
fn decode_clusters(cluster_words: &[u16], remap: &CicRemap, chip_id: u8) -> HitSet {
    let mut hits = HitSet::new(CBC3_CHANNELS);
    for word in cluster_words {
        let word = *word as u32;
        let embedded = bits(word, 11, 3) as u8;
        if remap.map(embedded) != Some(chip_id) {
            continue;
        }
        let address = bits(word, 3, 8);
        let layer = address & 0x1;
        let strip = address >> 1;
        let width = 1 + bits(word, 0, 2);
        let first_channel = 2 * strip + layer;
        for offset in 0..width {
            hits.set((first_channel + 2 * offset) as usize);
        }
    }
    hits
}

fn decode_stubs(stub_words: &[u16], remap: &CicRemap, chip_id: u8) -> Vec<Stub> {
    let mut stubs = Vec::new();
    for word in stub_words {
        let word = *word as u32;
        let embedded = bits(word, 12, 3) as u8;
        if remap.map(embedded) != Some(chip_id) {
            continue;
        }
        stubs.push(Stub::new(bits(word, 4, 8) as u8, bits(word, 0, 4) as u8));
    }
    stubs
}
