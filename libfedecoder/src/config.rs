use serde::{Deserialize, Serialize};
use std::path::Path;

use super::chip_map::{ChipSlotMap, CicRemap, HybridLayout};
use super::constants::CIC_DEFAULT_REMAP;
use super::error::ConfigError;
use super::slink::SLinkDebugMode;

/// The five supported front-end readout formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontEndKind {
    Cbc3,
    Cic2,
    Mpa,
    MpaAsync,
    Ssa,
    SsaAsync,
}

impl FrontEndKind {
    pub fn name(&self) -> &'static str {
        match self {
            FrontEndKind::Cbc3 => "CBC3",
            FrontEndKind::Cic2 => "CIC2",
            FrontEndKind::Mpa => "MPA",
            FrontEndKind::MpaAsync => "MPA-Async",
            FrontEndKind::Ssa => "SSA",
            FrontEndKind::SsaAsync => "SSA-Async",
        }
    }
}

/// Decoder configuration: the readout topology plus S-Link settings.
///
/// Serializable to YAML with serde/serde_yaml. A template can be produced
/// from [Config::default]; the chip remap table defaults to the hardware
/// wiring and only needs to appear in the file for non-standard hybrids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub front_end: FrontEndKind,
    pub hybrids: Vec<HybridLayout>,
    /// Concentrator events carry sparsified cluster words.
    #[serde(default = "default_sparsified")]
    pub sparsified: bool,
    #[serde(default = "default_cic_remap")]
    pub cic_remap: Vec<u8>,
    #[serde(default)]
    pub debug_mode: SLinkDebugMode,
    #[serde(default)]
    pub condition_data_enabled: bool,
}

fn default_sparsified() -> bool {
    true
}

fn default_cic_remap() -> Vec<u8> {
    CIC_DEFAULT_REMAP.to_vec()
}

impl Default for Config {
    /// Generate a template Config describing one bare hybrid
    fn default() -> Self {
        Self {
            front_end: FrontEndKind::Cbc3,
            hybrids: vec![HybridLayout {
                id: 0,
                chip_ids: vec![0, 1],
                has_concentrator: false,
            }],
            sparsified: true,
            cic_remap: CIC_DEFAULT_REMAP.to_vec(),
            debug_mode: SLinkDebugMode::default(),
            condition_data_enabled: false,
        }
    }
}

impl Config {
    /// Read the configuration from a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Build the validated chip-to-slot table for this topology.
    ///
    /// CBC3 hybrids sitting behind a concentrator collapse to one slot; the
    /// per-hybrid formats keep their full chip lists.
    pub fn slot_map(&self) -> Result<ChipSlotMap, ConfigError> {
        let collapse = self.front_end == FrontEndKind::Cbc3;
        Ok(ChipSlotMap::from_topology(&self.hybrids, collapse)?)
    }

    /// Build the validated concentrator remap table.
    pub fn remap(&self) -> Result<CicRemap, ConfigError> {
        Ok(CicRemap::new(&self.cic_remap)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.front_end, FrontEndKind::Cbc3);
        assert_eq!(back.cic_remap, CIC_DEFAULT_REMAP.to_vec());
        assert!(back.sparsified);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let yaml = "front_end: cic2\nhybrids:\n- id: 0\n  chip_ids: [0, 1, 2, 3, 4, 5, 6, 7]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.front_end, FrontEndKind::Cic2);
        assert!(config.sparsified);
        assert!(!config.hybrids[0].has_concentrator);
        assert!(config.remap().is_ok());
    }
}
