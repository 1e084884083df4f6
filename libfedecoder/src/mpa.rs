//! Decoder for the MPA (macro-pixel) readout format.
//!
//! Framing follows the CBC3 discipline (0xA L1 packet, 0x5 stub packet per
//! chip), but the L1 payload is sparsified: strip clusters as 12-bit fields
//! packed back-to-back from bit 96 of the packet, immediately followed by
//! pixel clusters as 15-bit fields. Both routinely straddle 32-bit word
//! boundaries. The stub payload carries up to five position/bend/row slots.
//!
//! The legacy occupancy fill for this format is a placeholder upstream and is
//! deliberately kept as one; see DESIGN.md.

use super::bitfield::{bits, sub_bit_range};
use super::chip_map::ChipSlotMap;
use super::constants::*;
use super::cursor::RawWordCursor;
use super::error::DecodeError;
use super::header::EventHeader;
use super::occupancy::{ChannelMask, OccupancySink};
use super::records::{PixelCluster, Stub, StripCluster};

/// Decoded state of one MPA chip for one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpaChipRecord {
    /// The chip's L1 + stub sub-packet words, verbatim.
    pub raw: Vec<u32>,
    /// Error nibble of the L1 sub-header.
    pub error: u8,
    pub chip_type: u8,
    pub frame_delay: u16,
    pub l1_counter: u16,
    pub strip_clusters: Vec<StripCluster>,
    pub pixel_clusters: Vec<PixelCluster>,
    pub stubs: Vec<Stub>,
    /// Stub count in the first bunch crossing of the frame.
    pub n_stubs_bx1: u8,
    pub stub_delay: u16,
}

impl MpaChipRecord {
    fn from_raw(raw: Vec<u32>) -> Result<Self, DecodeError> {
        let l1_size = bits(raw[0], 0, 12) as usize * 4;
        let counters = raw.get(2).copied().unwrap_or(0);
        let n_strip = bits(counters, 8, 5) as usize;
        let n_pixel = bits(counters, 0, 5) as usize;

        let mut strip_clusters = Vec::with_capacity(n_strip);
        for index in 0..n_strip {
            let field = sub_bit_range(
                &raw,
                MPA_CLUSTER_BIT_OFFSET + index * MPA_STRIP_CLUSTER_BITS,
                MPA_STRIP_CLUSTER_BITS,
            )?;
            strip_clusters.push(StripCluster {
                address: bits(field, 4, 7) as u8,
                mip: bits(field, 1, 3) as u8,
                width: bits(field, 0, 1) as u8,
            });
        }
        let pixel_offset = MPA_CLUSTER_BIT_OFFSET + n_strip * MPA_STRIP_CLUSTER_BITS;
        let mut pixel_clusters = Vec::with_capacity(n_pixel);
        for index in 0..n_pixel {
            let field = sub_bit_range(
                &raw,
                pixel_offset + index * MPA_PIXEL_CLUSTER_BITS,
                MPA_PIXEL_CLUSTER_BITS,
            )?;
            pixel_clusters.push(PixelCluster {
                address: bits(field, 7, 7) as u8,
                width: bits(field, 4, 3) as u8,
                z_pos: bits(field, 0, 4) as u8,
            });
        }

        let stub_word_0 = raw.get(l1_size).copied().unwrap_or(0);
        let stub_word_1 = raw.get(l1_size + 1).copied().unwrap_or(0);
        let stub_word_2 = raw.get(l1_size + 2).copied().unwrap_or(0);
        let stub_word_3 = raw.get(l1_size + 3).copied().unwrap_or(0);
        // five fixed slots: (word, position lsb, bend lsb, row lsb)
        let slots = [
            (stub_word_1, 16, 28, 24),
            (stub_word_2, 0, 12, 8),
            (stub_word_2, 16, 28, 24),
            (stub_word_3, 0, 12, 8),
            (stub_word_3, 16, 28, 24),
        ];
        let mut stubs = Vec::new();
        for (word, pos_lsb, bend_lsb, row_lsb) in slots {
            let position = bits(word, pos_lsb, 8) as u8;
            if position != 0 {
                stubs.push(Stub::with_row(
                    position,
                    bits(word, bend_lsb, 4) as u8,
                    bits(word, row_lsb, 4) as u8,
                ));
            }
        }

        Ok(Self {
            error: bits(raw[0], 24, 4) as u8,
            chip_type: bits(raw.get(1).copied().unwrap_or(0), 12, 4) as u8,
            frame_delay: bits(raw.get(1).copied().unwrap_or(0), 0, 12) as u16,
            l1_counter: bits(counters, 16, 9) as u16,
            strip_clusters,
            pixel_clusters,
            stubs,
            n_stubs_bx1: bits(stub_word_1, 0, 3) as u8,
            stub_delay: bits(stub_word_0, 12, 12) as u16,
            raw,
        })
    }
}

/// One decoded MPA trigger.
#[derive(Debug, Clone)]
pub struct MpaEvent {
    header: EventHeader,
    slots: ChipSlotMap,
    records: Vec<Option<MpaChipRecord>>,
}

impl MpaEvent {
    pub fn new(slots: &ChipSlotMap, words: &[u32]) -> Result<Self, DecodeError> {
        let header = EventHeader::parse_lenient(words)?;
        let mut records = vec![None; slots.n_slots()];
        let mut cursor = RawWordCursor::new(words);
        cursor.advance(header.body_offset())?;

        for hybrid in slots.hybrids() {
            for chip_id in &hybrid.chip_ids {
                let raw = read_chip_packet(&mut cursor, hybrid.id, *chip_id)?;
                if let Some(slot) = slots.slot(hybrid.id, *chip_id) {
                    records[slot] = Some(MpaChipRecord::from_raw(raw)?);
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

    pub fn record(&self, hybrid_id: u8, chip_id: u8) -> Option<&MpaChipRecord> {
        let slot = self.slots.slot(hybrid_id, chip_id)?;
        self.records[slot].as_ref()
    }

    fn record_logged(&self, hybrid_id: u8, chip_id: u8) -> Option<&MpaChipRecord> {
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

    pub fn strip_clusters(&self, hybrid_id: u8, chip_id: u8) -> Vec<StripCluster> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.strip_clusters.clone())
            .unwrap_or_default()
    }

    pub fn pixel_clusters(&self, hybrid_id: u8, chip_id: u8) -> Vec<PixelCluster> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.pixel_clusters.clone())
            .unwrap_or_default()
    }

    /// Cluster count; the format does not carry a per-channel bitstream.
    pub fn n_hits(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| (r.strip_clusters.len() + r.pixel_clusters.len()) as u32)
            .unwrap_or(0)
    }

    pub fn stubs(&self, hybrid_id: u8, chip_id: u8) -> Vec<Stub> {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.stubs.clone())
            .unwrap_or_default()
    }

    pub fn error(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.error as u32)
            .unwrap_or(0)
    }

    pub fn l1_id(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.record_logged(hybrid_id, chip_id)
            .map(|r| r.l1_counter as u32)
            .unwrap_or(0)
    }

    /// Occupancy filling for this format is a known-incomplete placeholder
    /// upstream; kept as a no-op rather than invented.
    // TODO: needs the pixel-to-channel mapping of the bonded sensor before
    // cluster words can be expanded into container increments
    pub fn fill_occupancy(&self, _sink: &mut dyn OccupancySink, _mask: &ChannelMask) {
        spdlog::debug!("Occupancy filling is not defined for the MPA cluster format");
    }
}

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

    // frame alignment markers in the first stub payload word
    let sync = cursor.peek_at(l1_size + 1)?;
    if bits(sync, 15, 1) != 1 || bits(sync, 14, 1) != 0 {
        spdlog::warn!(
            "Sync bits read {}{} for hybrid {} chip {}; data frame probably misaligned",
            bits(sync, 15, 1),
            bits(sync, 14, 1),
            hybrid_id,
            chip_id
        );
    }
    Ok(cursor.take(l1_size + stub_size)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::chip_map::HybridLayout;

    fn single_chip_map() -> ChipSlotMap {
        ChipSlotMap::from_topology(
            &[HybridLayout {
                id: 1,
                chip_ids: vec![2],
                has_concentrator: false,
            }],
            false,
        )
        .unwrap()
    }

    fn pack_cluster(words: &mut [u32], base_word: usize, bit_offset: usize, field: u32, width: usize) {
        let offset = bit_offset % 32;
        let word = base_word + bit_offset / 32;
        words[word] |= (field << (32 - width)) >> offset;
        if offset + width > 32 {
            words[word + 1] |= field << (64 - width - offset);
        }
    }

    /// One chip: 4 header + 8 L1 + 4 stub + 4 dummy = 20 words.
    fn single_chip_buffer(
        strips: &[(u8, u8, u8)],
        pixels: &[(u8, u8, u8)],
        stub1: Option<(u8, u8, u8)>,
    ) -> Vec<u32> {
        let mut words = vec![0u32; 20];
        words[0] = 0xFFFF_0005;
        words[1] = 0x0000_0001;
        words[4] = 0xA001_2002; // hybrid 1, chip nibble 2, 2x4 L1 words
        words[5] = 0x0000_2064; // chip type 2, frame delay 0x064
        words[6] = (7 << 16) | ((strips.len() as u32) << 8) | pixels.len() as u32;
        for (index, (address, mip, width)) in strips.iter().enumerate() {
            let field =
                ((*address as u32) << 4) | ((*mip as u32) << 1) | (*width as u32);
            pack_cluster(&mut words, 4, 96 + index * 12, field, 12);
        }
        for (index, (address, width, z_pos)) in pixels.iter().enumerate() {
            let field =
                ((*address as u32) << 7) | ((*width as u32) << 4) | (*z_pos as u32);
            pack_cluster(
                &mut words,
                4,
                96 + strips.len() * 12 + index * 15,
                field,
                15,
            );
        }
        words[12] = 0x5000_0001 | (0x0AB << 12); // stub packet, delay 0x0AB
        words[13] = 0x0000_8000; // sync bits
        if let Some((position, bend, row)) = stub1 {
            words[13] |= ((position as u32) << 16)
                | ((bend as u32) << 28)
                | ((row as u32) << 24)
                | 0x1;
        }
        words
    }

    #[test]
    fn test_cluster_unpacking_across_word_boundaries() {
        let map = single_chip_map();
        // two 12-bit strip clusters end at bit 120, so the pixel cluster
        // after them straddles two payload words
        let strips = [(17u8, 0x5, 1u8), (90, 0x2, 0)];
        let pixels = [(33u8, 0x3, 0xB)];
        let buffer = single_chip_buffer(&strips, &pixels, None);
        let event = MpaEvent::new(&map, &buffer).unwrap();
        assert_eq!(
            event.strip_clusters(1, 2),
            vec![
                StripCluster {
                    address: 17,
                    mip: 0x5,
                    width: 1
                },
                StripCluster {
                    address: 90,
                    mip: 0x2,
                    width: 0
                },
            ]
        );
        assert_eq!(
            event.pixel_clusters(1, 2),
            vec![PixelCluster {
                address: 33,
                width: 0x3,
                z_pos: 0xB
            }]
        );
        assert_eq!(event.n_hits(1, 2), 3);
        assert_eq!(event.l1_id(1, 2), 7);
    }

    #[test]
    fn test_stub_slots_and_delays() {
        let map = single_chip_map();
        let buffer = single_chip_buffer(&[], &[], Some((200, 0x9, 0x4)));
        let event = MpaEvent::new(&map, &buffer).unwrap();
        assert_eq!(event.stubs(1, 2), vec![Stub::with_row(200, 0x9, 0x4)]);
        let record = event.record(1, 2).unwrap();
        assert_eq!(record.stub_delay, 0x0AB);
        assert_eq!(record.n_stubs_bx1, 1);
        assert_eq!(record.chip_type, 2);
        assert_eq!(record.frame_delay, 0x064);
    }

    #[test]
    fn test_bad_l1_header() {
        let map = single_chip_map();
        let mut buffer = single_chip_buffer(&[], &[], None);
        buffer[4] = 0x3001_2002;
        assert!(matches!(
            MpaEvent::new(&map, &buffer),
            Err(DecodeError::BadChipHeader {
                expected: 0xA,
                got: 0x3,
                ..
            })
        ));
    }
}
