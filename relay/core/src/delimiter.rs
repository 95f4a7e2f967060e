//! Delimiter Policy
//!
//! Decides whether a freshly received chunk makes the accumulated response
//! worth persisting early. Only the new chunk is inspected, never the whole
//! buffer, so the check stays O(chunk) per token.

/// Characters that make a chunk flush-worthy
pub const FLUSH_DELIMITERS: [char; 5] = ['\n', '.', '?', '!', ','];

/// Chunks longer than this many characters are always flush-worthy
pub const FLUSH_LENGTH_THRESHOLD: usize = 100;

/// Returns true if `chunk` contains a delimiter or is longer than
/// [`FLUSH_LENGTH_THRESHOLD`] characters.
#[must_use]
pub fn should_flush(chunk: &str) -> bool {
    chunk.contains(&FLUSH_DELIMITERS[..]) || exceeds_threshold(chunk)
}

fn exceeds_threshold(chunk: &str) -> bool {
    // Byte length bounds the char count from above
    chunk.len() > FLUSH_LENGTH_THRESHOLD && chunk.chars().count() > FLUSH_LENGTH_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_does_not_flush() {
        assert!(!should_flush("hi"));
        assert!(!should_flush(""));
        assert!(!should_flush("Hel"));
        assert!(!should_flush("no delimiters here at all"));
    }

    #[test]
    fn test_each_delimiter_flushes() {
        assert!(should_flush("hi."));
        assert!(should_flush("what?"));
        assert!(should_flush("wow!"));
        assert!(should_flush("lo, "));
        assert!(should_flush("line\n"));
        assert!(should_flush("\n"));
    }

    #[test]
    fn test_length_threshold() {
        assert!(!should_flush(&"a".repeat(100)));
        assert!(should_flush(&"a".repeat(101)));
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 60 two-byte chars = 120 bytes but only 60 characters
        let chunk = "é".repeat(60);
        assert!(!should_flush(&chunk));
        assert!(should_flush(&"é".repeat(101)));
    }

    #[test]
    fn test_other_punctuation_ignored() {
        assert!(!should_flush("a;b:c-d"));
        assert!(!should_flush("\t"));
    }
}
