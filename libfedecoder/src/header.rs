use super::bitfield::bits;
use super::constants::{EVENT_HEADER_WORDS, HEADER_SENTINEL};
use super::error::HeaderError;

/// The fixed four-word header leading every synchronous raw event block.
///
/// Word 0 carries the 0xFFFF sentinel and the block size in 128-bit units,
/// word 1 the dummy-word count and trigger/TDC fields, word 2 the 24-bit
/// event counter and word 3 the bunch-crossing id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    /// Block size converted to 32-bit words.
    pub block_size_words: usize,
    /// Trailing padding words to exclude from the body.
    pub dummy_words: usize,
    pub external_trigger_id: u16,
    pub tdc: u8,
    pub event_count: u32,
    pub bunch_id: u32,
}

impl EventHeader {
    /// Parse and fully validate the header.
    ///
    /// A bad sentinel means the buffer boundaries cannot be trusted at all
    /// and the event must be dropped. A size mismatch is typed separately so
    /// the decoders can keep the legacy best-effort policy (see
    /// [parse_lenient](Self::parse_lenient)).
    pub fn parse(words: &[u32]) -> Result<Self, HeaderError> {
        if words.len() < EVENT_HEADER_WORDS {
            return Err(HeaderError::TooShort(words.len()));
        }
        let sentinel = bits(words[0], 16, 16) as u16;
        if sentinel != HEADER_SENTINEL {
            return Err(HeaderError::BadSentinel {
                word: words[0],
                got: sentinel,
            });
        }
        let header = Self {
            block_size_words: bits(words[0], 0, 16) as usize * 4,
            dummy_words: bits(words[1], 0, 8) as usize * 4,
            external_trigger_id: bits(words[1], 16, 15) as u16,
            tdc: bits(words[1], 24, 8) as u8,
            event_count: bits(words[2], 0, 24),
            bunch_id: words[3],
        };
        if header.block_size_words != words.len() {
            return Err(HeaderError::SizeMismatch {
                expected: header.block_size_words,
                actual: words.len(),
            });
        }
        Ok(header)
    }

    /// Parse, logging a size mismatch instead of failing on it.
    ///
    /// The firmware occasionally pads the final DMA transfer, so the legacy
    /// system treats a size mismatch as a warning and decodes best-effort.
    /// Sentinel and length failures still abort the event.
    pub fn parse_lenient(words: &[u32]) -> Result<Self, HeaderError> {
        match Self::parse(words) {
            Ok(header) => Ok(header),
            Err(HeaderError::SizeMismatch { expected, actual }) => {
                spdlog::error!(
                    "Block size in header says {} words but the buffer holds {}; decoding best-effort",
                    expected,
                    actual
                );
                // re-read the fields without the size check
                Ok(Self {
                    block_size_words: bits(words[0], 0, 16) as usize * 4,
                    dummy_words: bits(words[1], 0, 8) as usize * 4,
                    external_trigger_id: bits(words[1], 16, 15) as u16,
                    tdc: bits(words[1], 24, 8) as u8,
                    event_count: bits(words[2], 0, 24),
                    bunch_id: words[3],
                })
            }
            Err(other) => Err(other),
        }
    }

    /// First word of the event body.
    pub fn body_offset(&self) -> usize {
        EVENT_HEADER_WORDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with_header(len: usize) -> Vec<u32> {
        let mut words = vec![0u32; len];
        words[0] = 0xFFFF_0000 | (len as u32 / 4);
        words[1] = 0x0000_0000;
        words[2] = 0x0000_002A;
        words[3] = 0x0000_0BC1;
        words
    }

    #[test]
    fn test_block_size_matches_buffer() {
        // header word 0xFFFF_0008: sentinel plus block size 8x4 = 32 words
        let words = buffer_with_header(32);
        assert_eq!(words[0], 0xFFFF_0008);
        let header = EventHeader::parse(&words).unwrap();
        assert_eq!(header.block_size_words, 32);
        assert_eq!(header.event_count, 0x2A);
        assert_eq!(header.bunch_id, 0xBC1);
    }

    #[test]
    fn test_size_mismatch_is_raised() {
        let mut words = buffer_with_header(32);
        words.truncate(31);
        match EventHeader::parse(&words) {
            Err(HeaderError::SizeMismatch {
                expected: 32,
                actual: 31,
            }) => (),
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
        // the lenient path still yields a usable header
        let header = EventHeader::parse_lenient(&words).unwrap();
        assert_eq!(header.block_size_words, 32);
    }

    #[test]
    fn test_bad_sentinel() {
        let mut words = buffer_with_header(8);
        words[0] = 0xBEEF_0002;
        match EventHeader::parse(&words) {
            Err(HeaderError::BadSentinel { got: 0xBEEF, .. }) => (),
            other => panic!("expected BadSentinel, got {other:?}"),
        }
        assert!(EventHeader::parse_lenient(&words).is_err());
    }

    #[test]
    fn test_short_buffer() {
        assert_eq!(
            EventHeader::parse(&[0xFFFF_0001, 0]),
            Err(HeaderError::TooShort(2))
        );
    }
}
