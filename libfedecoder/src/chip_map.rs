// The legacy decoders addressed per-chip storage with the formula
// chipId + hybridId * chipsPerHybrid, which silently breaks the moment the
// topology is not uniform. Here the mapping is an explicit table built once
// from the topology description and validated up front; everything downstream
// asks the table instead of doing arithmetic.

use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::constants::{CIC_CHIPS_PER_HYBRID, CIC_DEFAULT_REMAP};
use super::error::ChipMapError;

/// One front-end hybrid as described by the topology configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridLayout {
    pub id: u8,
    pub chip_ids: Vec<u8>,
    /// A concentrator chip aggregates the hybrid into a single data stream.
    #[serde(default)]
    pub has_concentrator: bool,
}

/// Full hardware address of one readout chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipCoord {
    pub hybrid_id: u8,
    pub chip_id: u8,
}

/// Unique key for a (hybrid, chip) pair.
pub fn chip_uuid(hybrid_id: u8, chip_id: u8) -> u64 {
    (chip_id as u64) + (hybrid_id as u64) * 100
}

/// Validated mapping from (hybrid id, chip id) to a flat slot number.
///
/// Rebuilt once per event from the live topology and never mutated afterward.
/// Slots are assigned in topology order, so there are no gaps by construction;
/// duplicates are rejected when the table is built.
#[derive(Debug, Clone, Default)]
pub struct ChipSlotMap {
    map: FxHashMap<u64, usize>,
    slots: Vec<ChipCoord>,
    hybrids: Vec<HybridLayout>,
    hybrid_index: FxHashMap<u8, usize>,
}

impl ChipSlotMap {
    /// Build the table from the topology.
    ///
    /// With `collapse_concentrators` set, a hybrid carrying a concentrator
    /// contributes a single slot (the concentrator re-packs its chips into
    /// one stream and the firmware frames it as chip 0).
    pub fn from_topology(
        hybrids: &[HybridLayout],
        collapse_concentrators: bool,
    ) -> Result<Self, ChipMapError> {
        if hybrids.is_empty() {
            return Err(ChipMapError::EmptyTopology);
        }
        let mut table = ChipSlotMap::default();
        for hybrid in hybrids {
            let chip_ids = if collapse_concentrators && hybrid.has_concentrator {
                vec![0]
            } else {
                hybrid.chip_ids.clone()
            };
            if table.hybrid_index.contains_key(&hybrid.id) {
                let first = chip_ids.first().copied().unwrap_or(0);
                return Err(ChipMapError::DuplicateChip(hybrid.id, first));
            }
            table
                .hybrid_index
                .insert(hybrid.id, table.hybrids.len());
            for chip_id in &chip_ids {
                let uuid = chip_uuid(hybrid.id, *chip_id);
                let slot = table.slots.len();
                if table.map.insert(uuid, slot).is_some() {
                    return Err(ChipMapError::DuplicateChip(hybrid.id, *chip_id));
                }
                table.slots.push(ChipCoord {
                    hybrid_id: hybrid.id,
                    chip_id: *chip_id,
                });
            }
            table.hybrids.push(HybridLayout {
                id: hybrid.id,
                chip_ids,
                has_concentrator: hybrid.has_concentrator,
            });
        }
        Ok(table)
    }

    pub fn n_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn n_hybrids(&self) -> usize {
        self.hybrids.len()
    }

    /// Effective per-hybrid layout (concentrator hybrids collapsed to one slot).
    pub fn hybrids(&self) -> &[HybridLayout] {
        &self.hybrids
    }

    pub fn slot(&self, hybrid_id: u8, chip_id: u8) -> Option<usize> {
        self.map.get(&chip_uuid(hybrid_id, chip_id)).copied()
    }

    pub fn coord(&self, slot: usize) -> Option<&ChipCoord> {
        self.slots.get(slot)
    }

    /// Position of a hybrid in topology order.
    pub fn hybrid_index(&self, hybrid_id: u8) -> Option<usize> {
        self.hybrid_index.get(&hybrid_id).copied()
    }
}

/// Physical-to-logical chip remap behind a concentrator.
///
/// The hardware table is an involution, so mapping an id embedded in a
/// cluster word and mapping a requested chip id are the same operation; this
/// is validated when the table is built rather than assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CicRemap {
    table: [u8; CIC_CHIPS_PER_HYBRID],
}

impl Default for CicRemap {
    fn default() -> Self {
        Self {
            table: CIC_DEFAULT_REMAP,
        }
    }
}

impl CicRemap {
    pub fn new(table: &[u8]) -> Result<Self, ChipMapError> {
        let bad = || ChipMapError::BadRemap(table.to_vec());
        let fixed: [u8; CIC_CHIPS_PER_HYBRID] = table.try_into().map_err(|_| bad())?;
        for (index, entry) in fixed.iter().enumerate() {
            let entry = *entry as usize;
            if entry >= CIC_CHIPS_PER_HYBRID || fixed[entry] as usize != index {
                return Err(bad());
            }
        }
        Ok(Self { table: fixed })
    }

    /// Map a chip id through the table (either direction, see above).
    pub fn map(&self, chip_id: u8) -> Option<u8> {
        self.table.get(chip_id as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hybrids() -> Vec<HybridLayout> {
        vec![
            HybridLayout {
                id: 0,
                chip_ids: vec![0, 1],
                has_concentrator: false,
            },
            HybridLayout {
                id: 2,
                chip_ids: vec![0, 1, 2],
                has_concentrator: false,
            },
        ]
    }

    #[test]
    fn test_slots_follow_topology_order() {
        let map = ChipSlotMap::from_topology(&two_hybrids(), false).unwrap();
        assert_eq!(map.n_slots(), 5);
        assert_eq!(map.slot(0, 1), Some(1));
        assert_eq!(map.slot(2, 0), Some(2));
        assert_eq!(map.slot(1, 0), None);
        assert_eq!(map.hybrid_index(2), Some(1));
        assert_eq!(
            map.coord(3),
            Some(&ChipCoord {
                hybrid_id: 2,
                chip_id: 1
            })
        );
    }

    #[test]
    fn test_concentrator_collapses_to_one_slot() {
        let mut hybrids = two_hybrids();
        hybrids[1].has_concentrator = true;
        let map = ChipSlotMap::from_topology(&hybrids, true).unwrap();
        assert_eq!(map.n_slots(), 3);
        assert_eq!(map.slot(2, 0), Some(2));
        assert_eq!(map.slot(2, 1), None);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut hybrids = two_hybrids();
        hybrids[0].chip_ids = vec![0, 0];
        match ChipSlotMap::from_topology(&hybrids, false) {
            Err(ChipMapError::DuplicateChip(0, 0)) => (),
            other => panic!("expected DuplicateChip, got {other:?}"),
        }
    }

    #[test]
    fn test_remap_must_be_involution() {
        assert!(CicRemap::new(&CIC_DEFAULT_REMAP).is_ok());
        assert!(CicRemap::new(&[1, 2, 3, 0, 4, 5, 6, 7]).is_err());
        assert!(CicRemap::new(&[0, 1, 2]).is_err());
        let remap = CicRemap::default();
        assert_eq!(remap.map(0), Some(3));
        assert_eq!(remap.map(3), Some(0));
        assert_eq!(remap.map(5), Some(5));
        assert_eq!(remap.map(9), None);
    }
}
