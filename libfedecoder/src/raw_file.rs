//! Word-stream file I/O: firmware capture files in, S-Link word files out.
//!
//! A capture file is a back-to-back sequence of event blocks, each led by the
//! common four-word header; the block-size field of word 0 delimits them, so
//! the reader hands the decoder exactly one event per call. Words are stored
//! in the DAQ machine's native little-endian order.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::constants::EVENT_HEADER_WORDS;
use super::error::RawFileError;
use super::slink::SLinkOutput;

/// Streaming reader over one firmware capture file.
#[derive(Debug)]
pub struct RawFile {
    handle: BufReader<File>,
    pub size_bytes: u64,
}

impl RawFile {
    pub fn new(path: &Path) -> Result<Self, RawFileError> {
        if !path.exists() {
            return Err(RawFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            handle: BufReader::new(file),
            size_bytes,
        })
    }

    /// Read the next event block.
    ///
    /// Returns [RawFileError::EndOfFile] once the stream is exhausted at a
    /// block boundary; anything shorter than a whole block is an IO error.
    pub fn next_event(&mut self) -> Result<Vec<u32>, RawFileError> {
        let first = match self.handle.read_u32::<LittleEndian>() {
            Ok(word) => word,
            Err(why) if why.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(RawFileError::EndOfFile)
            }
            Err(why) => return Err(RawFileError::IOError(why)),
        };
        let block_size = (first & 0xFFFF) as usize * 4;
        if block_size < EVENT_HEADER_WORDS {
            return Err(RawFileError::BadBlockSize(block_size));
        }
        let mut words = vec![0u32; block_size];
        words[0] = first;
        self.handle
            .read_u32_into::<LittleEndian>(&mut words[1..])?;
        Ok(words)
    }
}

/// Write encoded events as the flat 32-bit-word file the external
/// convert/verify tool consumes.
pub fn write_slink_file(path: &Path, events: &[SLinkOutput]) -> Result<(), RawFileError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for event in events {
        for word in event.to_words32() {
            writer.write_u32::<LittleEndian>(word)?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fedecoder_{name}_{}", std::process::id()))
    }

    #[test]
    fn test_blocks_split_on_header_size() {
        let path = scratch_path("blocks.raw");
        // two concatenated 8-word blocks
        let mut bytes = Vec::new();
        for tag in [0xAAu32, 0xBB] {
            let block = [0xFFFF_0002, tag, 0, 0, 1, 2, 3, 4];
            for word in block {
                bytes.extend_from_slice(&word.to_le_bytes());
            }
        }
        std::fs::write(&path, &bytes).unwrap();

        let mut file = RawFile::new(&path).unwrap();
        let first = file.next_event().unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(first[1], 0xAA);
        let second = file.next_event().unwrap();
        assert_eq!(second[1], 0xBB);
        assert!(matches!(file.next_event(), Err(RawFileError::EndOfFile)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_reported() {
        let path = scratch_path("missing.raw");
        assert!(matches!(
            RawFile::new(&path),
            Err(RawFileError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_zero_block_size_is_rejected() {
        let path = scratch_path("zeroblock.raw");
        std::fs::write(&path, 0u32.to_le_bytes()).unwrap();
        let mut file = RawFile::new(&path).unwrap();
        assert!(matches!(
            file.next_event(),
            Err(RawFileError::BadBlockSize(0))
        ));
        std::fs::remove_file(&path).unwrap();
    }
}
