//! Incremental UTF-8 decoding for chunked transports

/// Decodes UTF-8 across arbitrary chunk boundaries
///
/// An incomplete multi-byte sequence at the end of a chunk is held back
/// until the next chunk completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Create a decoder with nothing buffered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (plus any held-back prefix) as possible
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: keep it for the next chunk
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending = rest.to_vec();
        out
    }

    /// Flush at end of stream; a dangling partial sequence becomes U+FFFD
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }

    /// Whether bytes are held back
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"Hello"), "Hello");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let mut decoder = Utf8ChunkDecoder::new();
        let bytes = "héllo 🎉".as_bytes();
        let mut out = String::new();
        for chunk in bytes.chunks(1) {
            out.push_str(&decoder.decode(chunk));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "héllo 🎉");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_valid_text_around_invalid_byte_is_kept() {
        let mut decoder = Utf8ChunkDecoder::new();
        let mut bytes = "héllo".as_bytes().to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice("wörld".as_bytes());
        assert_eq!(decoder.decode(&bytes), "héllo\u{FFFD}wörld");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_dangling_sequence_flushed_as_replacement() {
        let mut decoder = Utf8ChunkDecoder::new();
        let emoji = "🎉".as_bytes();
        assert_eq!(decoder.decode(&emoji[..2]), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
