//! Response Accumulator
//!
//! Ordered buffer of one response's chunks, with a flush checkpoint so the
//! driver can tell how much of the buffer has already been handed to the
//! persistence writer.

/// Accumulates one logical response
#[derive(Clone, Debug, Default)]
pub struct ResponseAccumulator {
    buffer: String,
    /// Byte length of `buffer` at the last flush
    flushed: usize,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk in arrival order
    pub fn append(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// The full buffer so far
    #[must_use]
    pub fn snapshot(&self) -> &str {
        &self.buffer
    }

    /// Install the provider's authoritative text
    ///
    /// Overrides whatever was accumulated locally; the returned text is what
    /// the terminal write must persist.
    pub fn finalize(&mut self, final_text: impl Into<String>) -> &str {
        self.buffer = final_text.into();
        self.flushed = self.flushed.min(self.buffer.len());
        &self.buffer
    }

    /// Record that the current buffer was handed to the persistence writer
    pub fn mark_flushed(&mut self) {
        self.flushed = self.buffer.len();
    }

    /// Bytes appended since the last flush
    #[must_use]
    pub fn unflushed_len(&self) -> usize {
        self.buffer.len() - self.flushed
    }

    /// Whether nothing was received
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut acc = ResponseAccumulator::new();
        for chunk in ["Hel", "lo, ", "world!"] {
            acc.append(chunk);
        }
        assert_eq!(acc.snapshot(), "Hello, world!");
    }

    #[test]
    fn test_snapshot_has_no_side_effect() {
        let mut acc = ResponseAccumulator::new();
        acc.append("abc");
        assert_eq!(acc.snapshot(), "abc");
        assert_eq!(acc.snapshot(), "abc");
        acc.append("d");
        assert_eq!(acc.snapshot(), "abcd");
    }

    #[test]
    fn test_finalize_overrides_buffer() {
        let mut acc = ResponseAccumulator::new();
        acc.append("Hello wrld");
        assert_eq!(acc.finalize("Hello world"), "Hello world");
        assert_eq!(acc.snapshot(), "Hello world");
    }

    #[test]
    fn test_flush_checkpoint() {
        let mut acc = ResponseAccumulator::new();
        acc.append("Hello, ");
        assert_eq!(acc.unflushed_len(), 7);
        acc.mark_flushed();
        assert_eq!(acc.unflushed_len(), 0);

        acc.append("world");
        assert_eq!(acc.unflushed_len(), 5);

        // Shorter authoritative text never underflows the checkpoint
        acc.finalize("Hi");
        assert_eq!(acc.unflushed_len(), 0);
    }
}
