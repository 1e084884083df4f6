//! Decoders for the asynchronous (un-triggered) MPA and SSA readouts.
//!
//! Bench setups without trigger logic dump one counter word per channel with
//! no framing at all: each chip owns a fixed-stride slice of the raw buffer
//! (1920 words for an MPA, 120 for an SSA), copied verbatim. A "hit" is a
//! non-zero counter, so the accessors hand back counts rather than a bitset.

use super::chip_map::ChipSlotMap;
use super::constants::{MPA_CHANNELS, SSA_CHANNELS};
use super::error::DecodeError;
use super::occupancy::{ChannelMask, OccupancySink};

/// Which chip flavour the counter dump came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncFlavour {
    Mpa,
    Ssa,
}

impl AsyncFlavour {
    /// Counter words (= channels) per chip.
    pub fn stride(&self) -> usize {
        match self {
            AsyncFlavour::Mpa => MPA_CHANNELS,
            AsyncFlavour::Ssa => SSA_CHANNELS,
        }
    }
}

/// One decoded asynchronous counter dump.
#[derive(Debug, Clone)]
pub struct AsyncEvent {
    flavour: AsyncFlavour,
    slots: ChipSlotMap,
    /// One counter vector per slot, stride words each.
    counters: Vec<Vec<u32>>,
}

impl AsyncEvent {
    pub fn new(
        flavour: AsyncFlavour,
        slots: &ChipSlotMap,
        words: &[u32],
    ) -> Result<Self, DecodeError> {
        let stride = flavour.stride();
        let needed = stride * slots.n_slots();
        if words.len() < needed {
            return Err(DecodeError::OutOfData {
                position: words.len(),
                needed: needed - words.len(),
                available: words.len(),
            });
        }
        let counters = (0..slots.n_slots())
            .map(|slot| words[slot * stride..(slot + 1) * stride].to_vec())
            .collect();
        Ok(Self {
            flavour,
            slots: slots.clone(),
            counters,
        })
    }

    pub fn flavour(&self) -> AsyncFlavour {
        self.flavour
    }

    fn counters_logged(&self, hybrid_id: u8, chip_id: u8) -> Option<&Vec<u32>> {
        match self.slots.slot(hybrid_id, chip_id) {
            Some(slot) => self.counters.get(slot),
            None => {
                spdlog::error!(
                    "No counter data for hybrid {} chip {} in this dump",
                    hybrid_id,
                    chip_id
                );
                None
            }
        }
    }

    /// Per-channel hit counters, indexed by channel.
    pub fn hits(&self, hybrid_id: u8, chip_id: u8) -> Vec<u32> {
        self.counters_logged(hybrid_id, chip_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Sum of all channel counters.
    pub fn n_hits(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        self.counters_logged(hybrid_id, chip_id)
            .map(|counters| counters.iter().sum())
            .unwrap_or(0)
    }

    pub fn fill_occupancy(&self, sink: &mut dyn OccupancySink, mask: &ChannelMask) {
        for (slot, counters) in self.counters.iter().enumerate() {
            let Some(coord) = self.slots.coord(slot) else {
                continue;
            };
            for (channel, count) in counters.iter().enumerate() {
                if *count > 0 && mask.is_enabled(channel as u32) {
                    sink.add(coord.hybrid_id, coord.chip_id, channel as u32, *count);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::chip_map::HybridLayout;

    fn two_chip_map() -> ChipSlotMap {
        ChipSlotMap::from_topology(
            &[HybridLayout {
                id: 0,
                chip_ids: vec![0, 1],
                has_concentrator: false,
            }],
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_stride_slices_and_counts() {
        let map = two_chip_map();
        let mut words = vec![0u32; 2 * SSA_CHANNELS];
        words[5] = 3;
        words[119] = 1;
        words[SSA_CHANNELS + 10] = 7;
        let event = AsyncEvent::new(AsyncFlavour::Ssa, &map, &words).unwrap();
        assert_eq!(event.n_hits(0, 0), 4);
        assert_eq!(event.n_hits(0, 1), 7);
        assert_eq!(event.hits(0, 0)[5], 3);
        assert_eq!(event.hits(0, 1)[10], 7);
    }

    #[test]
    fn test_short_dump_is_rejected() {
        let map = two_chip_map();
        let words = vec![0u32; SSA_CHANNELS];
        assert!(matches!(
            AsyncEvent::new(AsyncFlavour::Ssa, &map, &words),
            Err(DecodeError::OutOfData { .. })
        ));
    }

    #[test]
    fn test_occupancy_uses_counter_weights() {
        struct Total(u32);
        impl OccupancySink for Total {
            fn add(&mut self, _h: u8, _c: u8, _channel: u32, count: u32) {
                self.0 += count;
            }
        }
        let map = two_chip_map();
        let mut words = vec![0u32; 2 * SSA_CHANNELS];
        words[0] = 2;
        words[1] = 5;
        let event = AsyncEvent::new(AsyncFlavour::Ssa, &map, &words).unwrap();
        let mask = ChannelMask::from_channels(SSA_CHANNELS, &[1]);
        let mut sink = Total(0);
        event.fill_occupancy(&mut sink, &mask);
        assert_eq!(sink.0, 5);
    }
}
