//! The narrow interface to the externally owned occupancy containers.
//!
//! Calibration tools own a hierarchical container (board, hybrid, chip,
//! channel); the decoder only pushes increments into it through
//! [OccupancySink] and never allocates or walks the hierarchy itself.

use bitvec::prelude::*;

/// Receives one occupancy increment per enabled, hit channel.
pub trait OccupancySink {
    fn add(&mut self, hybrid_id: u8, chip_id: u8, channel: u32, count: u32);
}

/// Set of channels enabled for the current test group.
#[derive(Debug, Clone)]
pub struct ChannelMask {
    bits: BitVec<u32, Lsb0>,
}

impl ChannelMask {
    /// All `channels` channels enabled.
    pub fn all_enabled(channels: usize) -> Self {
        Self {
            bits: BitVec::repeat(true, channels),
        }
    }

    /// Only the listed channels enabled.
    pub fn from_channels(channels: usize, enabled: &[u32]) -> Self {
        let mut bits = BitVec::repeat(false, channels);
        for channel in enabled {
            if (*channel as usize) < channels {
                bits.set(*channel as usize, true);
            }
        }
        Self { bits }
    }

    /// Channels beyond the mask length are disabled.
    pub fn is_enabled(&self, channel: u32) -> bool {
        self.bits
            .get(channel as usize)
            .map(|b| *b)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_bounds() {
        let mask = ChannelMask::from_channels(120, &[0, 5, 119, 200]);
        assert!(mask.is_enabled(0));
        assert!(mask.is_enabled(5));
        assert!(mask.is_enabled(119));
        assert!(!mask.is_enabled(6));
        assert!(!mask.is_enabled(200));
        assert!(ChannelMask::all_enabled(4).is_enabled(3));
    }
}
