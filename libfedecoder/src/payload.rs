//! Bit-granular payload builder for the S-Link encoder.
//!
//! The wire format packs fields of arbitrary width into 64-bit lanes, and the
//! per-hybrid headers (chip presence word, stub counter) are only known after
//! the hybrid's chips have been appended, so the builder supports inserting a
//! field at a remembered write position.

use bitvec::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct GenericPayload {
    bits: BitVec<u64, Msb0>,
}

impl GenericPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position, for a later [insert](Self::insert).
    pub fn write_position(&self) -> usize {
        self.bits.len()
    }

    pub fn len_bits(&self) -> usize {
        self.bits.len()
    }

    /// Append the low `width` bits of `value`, MSB first.
    pub fn append(&mut self, value: u64, width: usize) {
        debug_assert!(width >= 1 && width <= 64);
        self.bits
            .extend_from_bitslice(&value.view_bits::<Msb0>()[64 - width..]);
    }

    pub fn pad_zero(&mut self, count: usize) {
        for _ in 0..count {
            self.bits.push(false);
        }
    }

    /// Insert the low `width` bits of `value` at bit `position`, shifting
    /// everything after it back.
    pub fn insert(&mut self, value: u64, position: usize, width: usize) {
        let tail = self.bits.split_off(position);
        self.append(value, width);
        self.bits.extend_from_bitslice(&tail);
    }

    /// Drain into 64-bit lanes, zero-padding the tail lane.
    pub fn into_words(mut self) -> Vec<u64> {
        while self.bits.len() % 64 != 0 {
            self.bits.push(false);
        }
        self.bits.chunks(64).map(|lane| lane.load_be::<u64>()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_packs_msb_first() {
        let mut payload = GenericPayload::new();
        payload.append(0xA, 4);
        payload.append(0x3, 2);
        payload.append(0x1, 1);
        // 1010 11 1 -> 1010111 padded to a lane
        assert_eq!(payload.into_words(), vec![0xAE << 56]);
    }

    #[test]
    fn test_insert_at_remembered_position() {
        let mut payload = GenericPayload::new();
        let mark = payload.write_position();
        payload.append(0xFF, 8);
        payload.insert(0x5, mark, 4);
        assert_eq!(payload.into_words(), vec![0x5FF0_0000_0000_0000]);
    }

    #[test]
    fn test_multi_lane_drain() {
        let mut payload = GenericPayload::new();
        payload.append(u64::MAX, 64);
        payload.append(0x1, 1);
        let words = payload.into_words();
        assert_eq!(words, vec![u64::MAX, 1 << 63]);
    }
}
