use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Event buffer with {0} words is too short to hold a {size}-word header", size = EVENT_HEADER_WORDS)]
    TooShort(usize),
    #[error("Bad leading sentinel {got:#06x} in header word {word:#010x}; expected {exp:#06x}", exp = HEADER_SENTINEL)]
    BadSentinel { word: u32, got: u16 },
    #[error("Block size in header says {expected} words but the buffer holds {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChipMapError {
    #[error("Topology contains no hybrids")]
    EmptyTopology,
    #[error("Duplicate chip in topology -- hybrid {0}, chip {1}")]
    DuplicateChip(u8, u8),
    #[error("Concentrator remap table {0:?} is not a self-inverse permutation of 0..{len}", len = CIC_CHIPS_PER_HYBRID)]
    BadRemap(Vec<u8>),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Failed to parse event header: {0}")]
    Header(#[from] HeaderError),
    #[error("Bad sub-packet header for hybrid {hybrid_id} chip {chip_id}: expected leading nibble {expected:#x}, got {got:#x} in word {word:#010x}")]
    BadChipHeader {
        expected: u8,
        got: u8,
        hybrid_id: u8,
        chip_id: u8,
        word: u32,
    },
    #[error("Raw buffer exhausted at word {position}: needed {needed} more of {available}")]
    OutOfData {
        position: usize,
        needed: usize,
        available: usize,
    },
    #[error("Bit range [{bit_offset}, +{width}) runs past the end of a {len}-word buffer")]
    BitRangeOutOfBounds {
        bit_offset: usize,
        width: usize,
        len: usize,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SLinkError {
    #[error("No decoded record for hybrid {0} chip {1}; cannot build S-Link payload")]
    MissingChipRecord(u8, u8),
    #[error("S-Link encoding is not implemented for the {0} front end")]
    UnsupportedFrontEnd(&'static str),
}

#[derive(Debug, Error)]
pub enum RawFileError {
    #[error("Could not open raw word file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Reached end of raw word file")]
    EndOfFile,
    #[error("Raw word file block claims {0} words, which cannot hold an event header")]
    BadBlockSize(usize),
    #[error("Raw word file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config describes an invalid topology: {0}")]
    Topology(#[from] ChipMapError),
}
