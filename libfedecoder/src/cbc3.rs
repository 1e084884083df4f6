//! Decoder for the CBC3 readout format.
//!
//! Every chip contributes a framed pair of sub-packets: an L1 packet (magic
//! 0xA) with the dense 254-channel hit bitstream and a stub packet (magic
//! 0x5) with three fixed stub slots. Chips are framed in topology order; a
//! hybrid sitting behind a concentrator appears as a single pre-aggregated
//! stream.

use super::bitfield::{bits, channel_bit};
use super::chip_map::ChipSlotMap;
use super::constants::*;
use super::cursor::RawWordCursor;
use super::error::DecodeError;
use super::header::EventHeader;
use super::occupancy::{ChannelMask, OccupancySink};
use super::records::{Cluster, HitSet, Stub};

/// Decoded state of one CBC3 chip for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cbc3ChipRecord {
    /// The chip's L1 + stub sub-packet words, verbatim.
    pub raw: Vec<u32>,
    pub pipeline_address: u16,
    pub l1_counter: u16,
    pub error: u8,
    pub hits: HitSet,
    pub stubs: Vec<Stub>,
}

impl Cbc3ChipRecord {
    fn from_raw(raw: Vec<u32>) -> Self {
        let status = raw.get(2).copied().unwrap_or(0);
        let mut hits = HitSet::new(CBC3_CHANNELS);
        for channel in 0..CBC3_CHANNELS {
            if channel_bit(&raw, CBC3_FIRST_CHANNEL_WORD, channel) {
                hits.set(channel);
            }
        }
        let l1_size = bits(raw[0], 0, 12) as usize * 4;
        let positions = raw.get(l1_size + 1).copied().unwrap_or(0);
        let bends = raw.get(l1_size + 2).copied().unwrap_or(0);
        let mut stubs = Vec::new();
        for slot in 0..CBC3_STUB_SLOTS as u32 {
            let position = bits(positions, slot * 8, 8) as u8;
            // position 0 means no stub in this slot
            if position != 0 {
                let bend = bits(bends, (slot + 1) * 8, 4) as u8;
                stubs.push(Stub::new(position, bend));
            }
        }
        Self {
            raw,
            pipeline_address: bits(status, 0, 9) as u16,
            l1_counter: bits(status, 16, 9) as u16,
            error: bits(status, 30, 2) as u8,
            hits,
            stubs,
        }
    }
}

/// One decoded CBC3 trigger.
#[derive(Debug, Clone)]
pub struct Cbc3Event {
    header: EventHeader,
    slots: ChipSlotMap,
    records: Vec<Option<Cbc3ChipRecord>>,
}

impl Cbc3Event {
    /// Decode one raw event buffer.
    ///
    /// A bad leading sentinel or a bad per-chip sub-header aborts this event
    /// with a typed error; a block-size mismatch is logged and decoding
    /// continues best-effort.
    pub fn new(slots: &ChipSlotMap, words: &[u32]) -> Result<Self, DecodeError> {
        let header = EventHeader::parse_lenient(words)?;
        let mut records = vec![None; slots.n_slots()];
        let mut cursor = RawWordCursor::new(words);
        cursor.advance(header.body_offset())?;

        for hybrid in slots.hybrids() {
            for chip_id in &hybrid.chip_ids {
                let raw = read_chip_packet(&mut cursor, hybrid.id, *chip_id)?;
                let stamped_hybrid = bits(raw[0], 16, 8) as u8;
                if stamped_hybrid != hybrid.id {
                    spdlog::warn!(
                        "Firmware stamped hybrid {} in a packet framed for hybrid {} chip {}",
                        stamped_hybrid,
                        hybrid.id,
                        chip_id
                    );
                }
                if let Some(slot) = slots.slot(hybrid.id, *chip_id) {
                    records[slot] = Some(Cbc3ChipRecord::from_raw(raw));
                }
            }
        }
        Ok(Self {
            header,
            slots: slots.clone(),
            records,
        })
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn slots(&self) -> &ChipSlotMap {
        &self.slots
    }

    /// Decoded record for one chip, if the slot exists and was populated.
    pub fn record(&self, hybrid_id: u8, chip_id: u8) -> Option<&Cbc3ChipRecord> {
        let slot = self.slots.slot(hybrid_id, chip_id)?;
        self.records[slot].as_ref()
    }

    fn record_logged(&self, hybrid_id: u8, chip_id: u8) -> Option<&Cbc3ChipRecord> {
        let record = self.record(hybrid_id, chip_id);
        if record.is_none() {
            spdlog::error!(
                "No decoded record for hybrid {} chip {} in this event",
                hybrid_id,
                chip_id
            );
        }
        record
    }

    /// Sparse list of hit channels.
    pub fn hits(&self, hybrid_id: u8, chip_id: u8) -> Vec<u32> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.hits.channels())
            .unwrap_or_default()
    }

    pub fn n_hits(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.hits.count())
            .unwrap_or(0)
    }

    pub fn stubs(&self, hybrid_id: u8, chip_id: u8) -> Vec<Stub> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.stubs.clone())
            .unwrap_or_default()
    }

    pub fn stub_bit(&self, hybrid_id: u8, chip_id: u8) -> bool {
        self.record(hybrid_id, chip_id)
            .map(|r| !r.stubs.is_empty())
            .unwrap_or(false)
    }

    pub fn error(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.error as u32)
            .unwrap_or(0)
    }

    pub fn pipeline_address(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.pipeline_address as u32)
            .unwrap_or(0)
    }

    pub fn l1_id(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.l1_counter as u32)
            .unwrap_or(0)
    }

    /// Contiguous strip clusters per sensor, built from the hit bitset.
    pub fn clusters(&self, hybrid_id: u8, chip_id: u8) -> Vec<Cluster> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.hits.clusterize())
            .unwrap_or_default()
    }

    /// Drop one chip's record, simulating hardware absent for an event.
    #[cfg(test)]
    pub(crate) fn with_blanked_slot(mut self, hybrid_id: u8, chip_id: u8) -> Self {
        if let Some(slot) = self.slots.slot(hybrid_id, chip_id) {
            self.records[slot] = None;
        }
        self
    }

    /// Push one increment per enabled, hit channel into the caller's container.
    pub fn fill_occupancy(&self, sink: &mut dyn OccupancySink, mask: &ChannelMask) {
        for (slot, record) in self.records.iter().enumerate() {
            let (Some(record), Some(coord)) = (record, self.slots.coord(slot)) else {
                continue;
            };
            for channel in record.hits.channels() {
                if mask.is_enabled(channel) {
                    sink.add(coord.hybrid_id, coord.chip_id, channel, 1);
                }
            }
        }
    }
}

/// Read one chip's L1 + stub sub-packet pair and hand back the raw words.
fn read_chip_packet(
    cursor: &mut RawWordCursor,
    hybrid_id: u8,
    chip_id: u8,
) -> Result<Vec<u32>, DecodeError> {
    let l1_header = cursor.peek()?;
    let magic = bits(l1_header, 28, 4) as u8;
    if magic != HIT_HEADER_MAGIC {
        return Err(DecodeError::BadChipHeader {
            expected: HIT_HEADER_MAGIC,
            got: magic,
            hybrid_id,
            chip_id,
            word: l1_header,
        });
    }
    let error_code = bits(l1_header, 24, 4) as u8;
    if error_code != 0 {
        spdlog::error!(
            "Error code {:#x} in L1 header of hybrid {} chip {}",
            error_code,
            hybrid_id,
            chip_id
        );
    }
    let l1_size = bits(l1_header, 0, 12) as usize * 4;

    let stub_header = cursor.peek_at(l1_size)?;
    let magic = bits(stub_header, 28, 4) as u8;
    if magic != STUB_HEADER_MAGIC {
        return Err(DecodeError::BadChipHeader {
            expected: STUB_HEADER_MAGIC,
            got: magic,
            hybrid_id,
            chip_id,
            word: stub_header,
        });
    }
    let stub_size = bits(stub_header, 0, 12) as usize * 4;
    Ok(cursor.take(l1_size + stub_size)?.to_vec())
}
