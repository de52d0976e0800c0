//! Bounded capture of child output
//!
//! A phase may print far more than anyone wants to keep. [`OutputTail`] holds only the
//! last `cap` bytes of a stream, which is the part that explains a failure.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct OutputTail {
    kept: VecDeque<u8>,
    cap: usize,
    seen: usize,
}

impl OutputTail {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            kept: VecDeque::with_capacity(cap.min(8 * 1024)),
            cap,
            seen: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.seen += chunk.len();
        let keep_from = chunk.len().saturating_sub(self.cap);
        let chunk = &chunk[keep_from..];

        let excess = (self.kept.len() + chunk.len()).saturating_sub(self.cap);
        self.kept.drain(..excess);
        self.kept.extend(chunk);
    }

    /// Bytes seen but no longer held
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.seen - self.kept.len()
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.dropped() > 0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }

    /// Decode what is held, replacing invalid UTF-8 (a cut may land mid-character)
    #[must_use]
    pub fn into_lossy_string(self) -> String {
        let bytes: Vec<u8> = self.kept.into();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Trailing `max_bytes` of `text`, cut on a char boundary
#[must_use]
pub fn tail(text: &str, max_bytes: usize) -> &str {
    let Some(mut start) = text.len().checked_sub(max_bytes) else {
        return text;
    };
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_the_latest_bytes_across_pushes() {
        let mut out = OutputTail::new(8);
        out.push(b"chunk 1\n");
        out.push(b"chunk 2\n");

        assert!(out.truncated());
        assert_eq!(out.dropped(), 8);
        assert_eq!(out.into_lossy_string(), "chunk 2\n");
    }

    #[test]
    fn test_oversized_push_keeps_its_end() {
        let mut out = OutputTail::new(5);
        out.push(b"fatal: disk full");
        assert_eq!(out.into_lossy_string(), " full");
    }

    #[test]
    fn test_short_output_is_untouched() {
        let mut out = OutputTail::new(64);
        out.push(b"ok");
        assert!(!out.truncated());
        assert_eq!(out.into_lossy_string(), "ok");
    }

    #[test]
    fn test_zero_cap_counts_everything_as_dropped() {
        let mut out = OutputTail::new(0);
        out.push(b"noise");
        assert!(out.is_empty());
        assert_eq!(out.dropped(), 5);
    }

    #[test]
    fn test_tail_moves_forward_to_a_char_boundary() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 3), "éb");
    }
}
