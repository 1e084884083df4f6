//! The polymorphic entry point calibration tools decode through.
//!
//! The five wire formats share no layout beyond the event header, so each
//! has its own decoder type; [FeEvent] closes them into one tagged enum and
//! carries the handful of operations every caller needs. Operations a format
//! does not support answer `None` (or an empty list), which is distinct from
//! "chip not present in this event"; the latter logs and yields zeros.

use super::async_event::{AsyncEvent, AsyncFlavour};
use super::cbc3::Cbc3Event;
use super::chip_map::{ChipSlotMap, CicRemap};
use super::cic2::Cic2Event;
use super::config::{Config, FrontEndKind};
use super::error::{ConfigError, DecodeError, SLinkError};
use super::header::EventHeader;
use super::mpa::MpaEvent;
use super::occupancy::{ChannelMask, OccupancySink};
use super::records::Stub;
use super::slink::{encode_cbc3, ConditionData, SLinkDebugMode, SLinkOutput};
use super::ssa::SsaEvent;

/// Format selection plus the read-only tables every decode call shares.
///
/// Built once from the topology configuration; decoding itself is pure and
/// each returned event owns its data, so a `Decoder` can be shared freely
/// across threads handing out independent buffers.
#[derive(Debug, Clone)]
pub struct Decoder {
    kind: FrontEndKind,
    slots: ChipSlotMap,
    remap: CicRemap,
}

impl Decoder {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            kind: config.front_end,
            slots: config.slot_map()?,
            remap: config.remap()?,
        })
    }

    pub fn new(kind: FrontEndKind, slots: ChipSlotMap, remap: CicRemap) -> Self {
        Self { kind, slots, remap }
    }

    pub fn kind(&self) -> FrontEndKind {
        self.kind
    }

    pub fn slots(&self) -> &ChipSlotMap {
        &self.slots
    }

    /// Decode one raw buffer into an event of the configured format.
    pub fn decode(&self, words: &[u32]) -> Result<FeEvent, DecodeError> {
        Ok(match self.kind {
            FrontEndKind::Cbc3 => FeEvent::Cbc3(Cbc3Event::new(&self.slots, words)?),
            FrontEndKind::Cic2 => {
                FeEvent::Cic2(Cic2Event::new(&self.slots, &self.remap, words)?)
            }
            FrontEndKind::Mpa => FeEvent::Mpa(MpaEvent::new(&self.slots, words)?),
            FrontEndKind::Ssa => FeEvent::Ssa(SsaEvent::new(&self.slots, words)?),
            FrontEndKind::MpaAsync => {
                FeEvent::MpaAsync(AsyncEvent::new(AsyncFlavour::Mpa, &self.slots, words)?)
            }
            FrontEndKind::SsaAsync => {
                FeEvent::SsaAsync(AsyncEvent::new(AsyncFlavour::Ssa, &self.slots, words)?)
            }
        })
    }
}

/// One decoded trigger (or counter dump) of any supported format.
#[derive(Debug, Clone)]
pub enum FeEvent {
    Cbc3(Cbc3Event),
    Cic2(Cic2Event),
    Mpa(MpaEvent),
    Ssa(SsaEvent),
    MpaAsync(AsyncEvent),
    SsaAsync(AsyncEvent),
}

impl FeEvent {
    pub fn kind(&self) -> FrontEndKind {
        match self {
            FeEvent::Cbc3(_) => FrontEndKind::Cbc3,
            FeEvent::Cic2(_) => FrontEndKind::Cic2,
            FeEvent::Mpa(_) => FrontEndKind::Mpa,
            FeEvent::Ssa(_) => FrontEndKind::Ssa,
            FeEvent::MpaAsync(_) => FrontEndKind::MpaAsync,
            FeEvent::SsaAsync(_) => FrontEndKind::SsaAsync,
        }
    }

    /// The common raw header; asynchronous dumps have none.
    pub fn header(&self) -> Option<&EventHeader> {
        match self {
            FeEvent::Cbc3(event) => Some(event.header()),
            FeEvent::Cic2(event) => Some(event.header()),
            FeEvent::Mpa(event) => Some(event.header()),
            FeEvent::Ssa(event) => Some(event.header()),
            FeEvent::MpaAsync(_) | FeEvent::SsaAsync(_) => None,
        }
    }

    /// Hit channels for dense and clustered formats; per-channel counters
    /// for the asynchronous dumps.
    pub fn hits(&self, hybrid_id: u8, chip_id: u8) -> Vec<u32> {
        match self {
            FeEvent::Cbc3(event) => event.hits(hybrid_id, chip_id),
            FeEvent::Cic2(event) => event.hits(hybrid_id, chip_id),
            // the MPA cluster format has no channel expansion; see DESIGN.md
            FeEvent::Mpa(_) => Vec::new(),
            FeEvent::Ssa(event) => event.hits(hybrid_id, chip_id),
            FeEvent::MpaAsync(event) | FeEvent::SsaAsync(event) => {
                event.hits(hybrid_id, chip_id)
            }
        }
    }

    pub fn n_hits(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        match self {
            FeEvent::Cbc3(event) => event.n_hits(hybrid_id, chip_id),
            FeEvent::Cic2(event) => event.n_hits(hybrid_id, chip_id),
            FeEvent::Mpa(event) => event.n_hits(hybrid_id, chip_id),
            FeEvent::Ssa(event) => event.n_hits(hybrid_id, chip_id),
            FeEvent::MpaAsync(event) | FeEvent::SsaAsync(event) => {
                event.n_hits(hybrid_id, chip_id)
            }
        }
    }

    /// Stubs for the trigger-capable formats; empty for the others.
    pub fn stubs(&self, hybrid_id: u8, chip_id: u8) -> Vec<Stub> {
        match self {
            FeEvent::Cbc3(event) => event.stubs(hybrid_id, chip_id),
            FeEvent::Cic2(event) => event.stubs(hybrid_id, chip_id),
            FeEvent::Mpa(event) => event.stubs(hybrid_id, chip_id),
            FeEvent::Ssa(_) | FeEvent::MpaAsync(_) | FeEvent::SsaAsync(_) => Vec::new(),
        }
    }

    pub fn error(&self, hybrid_id: u8, chip_id: u8) -> u32 {
        match self {
            FeEvent::Cbc3(event) => event.error(hybrid_id, chip_id),
            FeEvent::Cic2(event) => event.error(hybrid_id, chip_id),
            FeEvent::Mpa(event) => event.error(hybrid_id, chip_id),
            FeEvent::Ssa(event) => event.error(hybrid_id, chip_id),
            FeEvent::MpaAsync(_) | FeEvent::SsaAsync(_) => 0,
        }
    }

    /// `None` when the format does not carry a pipeline address at all,
    /// never a fabricated value.
    pub fn pipeline_address(&self, hybrid_id: u8, chip_id: u8) -> Option<u32> {
        match self {
            FeEvent::Cbc3(event) => Some(event.pipeline_address(hybrid_id, chip_id)),
            _ => None,
        }
    }

    /// `None` when the format does not carry an L1 counter. The concentrator
    /// reports one per hybrid, shared by its chips.
    pub fn l1_id(&self, hybrid_id: u8, chip_id: u8) -> Option<u32> {
        match self {
            FeEvent::Cbc3(event) => Some(event.l1_id(hybrid_id, chip_id)),
            FeEvent::Cic2(event) => Some(event.l1_id(hybrid_id)),
            FeEvent::Mpa(event) => Some(event.l1_id(hybrid_id, chip_id)),
            FeEvent::Ssa(event) => Some(event.l1_id(hybrid_id, chip_id)),
            FeEvent::MpaAsync(_) | FeEvent::SsaAsync(_) => None,
        }
    }

    /// Push one occupancy increment per enabled, hit channel into the
    /// caller's hierarchical container.
    pub fn fill_occupancy(&self, sink: &mut dyn OccupancySink, mask: &ChannelMask) {
        match self {
            FeEvent::Cbc3(event) => event.fill_occupancy(sink, mask),
            FeEvent::Cic2(event) => event.fill_occupancy(sink, mask),
            FeEvent::Mpa(event) => event.fill_occupancy(sink, mask),
            FeEvent::Ssa(event) => event.fill_occupancy(sink, mask),
            FeEvent::MpaAsync(event) | FeEvent::SsaAsync(event) => {
                event.fill_occupancy(sink, mask)
            }
        }
    }

    /// Re-encode into the downstream S-Link format.
    pub fn slink_event(
        &self,
        debug_mode: SLinkDebugMode,
        condition_data: &ConditionData,
    ) -> Result<SLinkOutput, SLinkError> {
        match self {
            FeEvent::Cbc3(event) => encode_cbc3(event, debug_mode, condition_data),
            other => Err(SLinkError::UnsupportedFrontEnd(other.kind().name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::cbc3::tests::single_chip_buffer;
    use super::super::chip_map::HybridLayout;

    fn cbc3_config() -> Config {
        Config {
            front_end: FrontEndKind::Cbc3,
            hybrids: vec![HybridLayout {
                id: 0,
                chip_ids: vec![0],
                has_concentrator: false,
            }],
            ..Config::default()
        }
    }

    #[test]
    fn test_facade_dispatches_to_cbc3() {
        let decoder = Decoder::from_config(&cbc3_config()).unwrap();
        let buffer = single_chip_buffer(&[12, 200], &[(50, 0x7)]);
        let event = decoder.decode(&buffer).unwrap();
        assert_eq!(event.kind(), FrontEndKind::Cbc3);
        assert_eq!(event.hits(0, 0), vec![12, 200]);
        assert_eq!(event.stubs(0, 0), vec![Stub::new(50, 0x7)]);
        assert_eq!(event.pipeline_address(0, 0), Some(0x17));
        assert_eq!(event.l1_id(0, 0), Some(5));
        assert_eq!(event.header().unwrap().event_count, 1);
        assert!(event
            .slink_event(SLinkDebugMode::Summary, &ConditionData::default())
            .is_ok());
    }

    #[test]
    fn test_unsupported_operations_are_distinct() {
        let mut config = cbc3_config();
        config.front_end = FrontEndKind::SsaAsync;
        config.hybrids[0].chip_ids = vec![0, 1];
        let decoder = Decoder::from_config(&config).unwrap();
        let words = vec![0u32; 240];
        let event = decoder.decode(&words).unwrap();
        // format carries neither a pipeline address nor an L1 counter
        assert_eq!(event.pipeline_address(0, 0), None);
        assert_eq!(event.l1_id(0, 0), None);
        assert!(event.header().is_none());
        assert_eq!(
            event.slink_event(SLinkDebugMode::Summary, &ConditionData::default()),
            Err(SLinkError::UnsupportedFrontEnd("SSA-Async"))
        );
    }
}
