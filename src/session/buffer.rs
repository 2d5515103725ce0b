//! Pattern buffer accumulating appliance output between protocol steps.
//!
//! Prompt searches only look at the last N bytes of the buffer, so large
//! command outputs (full disk lists, config dumps) stay cheap to scan.
//! Unlike a plain expect buffer this one also supports splicing spans out,
//! which is how recognized asynchronous appliance messages are removed
//! from the middle of a response window.

use regex::bytes::Regex;

const DEFAULT_SEARCH_DEPTH: usize = 1000;

/// Buffer for accumulating output and searching for patterns.
#[derive(Debug)]
pub struct PatternBuffer {
    buffer: Vec<u8>,

    /// How many bytes from the end to search for prompt patterns.
    search_depth: usize,
}

impl PatternBuffer {
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
        }
    }

    /// Append new data, stripping ANSI escape codes first. Appliance
    /// consoles love to color their warnings.
    pub fn extend(&mut self, data: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(data);
        self.buffer.extend_from_slice(&cleaned);
    }

    /// Search only the tail of the buffer, returning absolute offsets.
    pub fn search_tail(&self, pattern: &Regex) -> Option<(usize, usize)> {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        pattern
            .find(&self.buffer[start..])
            .map(|m| (start + m.start(), start + m.end()))
    }

    /// Find a literal byte string (used for command-echo confirmation).
    pub fn find_literal(&self, needle: &[u8]) -> Option<(usize, usize)> {
        memchr::memmem::find(&self.buffer, needle).map(|start| (start, start + needle.len()))
    }

    /// Drop everything up to and including byte `end`.
    pub fn drain_through(&mut self, end: usize) {
        let end = end.min(self.buffer.len());
        self.buffer.drain(..end);
    }

    /// Remove the byte span `start..end`, joining what surrounds it.
    pub fn splice_out(&mut self, start: usize, end: usize) {
        let end = end.min(self.buffer.len());
        if start < end {
            self.buffer.drain(start..end);
        }
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_extend() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"lun 5 online");
        assert_eq!(buffer.as_slice(), b"lun 5 online");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"\x1b[31mWarning: ps1 missing\x1b[0m");
        assert_eq!(buffer.as_slice(), b"Warning: ps1 missing");
    }

    #[test]
    fn test_tail_search_absolute_offsets() {
        let mut buffer = PatternBuffer::new(20);
        buffer.extend(&[b'x'; 100]);
        buffer.extend(b"\nSRX shelf 7> ");

        let pattern = Regex::new(r"SRX shelf \d+> ").unwrap();
        let (start, end) = buffer.search_tail(&pattern).unwrap();
        assert_eq!(&buffer.as_slice()[start..end], b"SRX shelf 7> ");
    }

    #[test]
    fn test_tail_search_misses_old_data() {
        let mut buffer = PatternBuffer::new(10);
        buffer.extend(b"SRX shelf 7> ");
        buffer.extend(&[b'x'; 100]);

        let pattern = Regex::new(r"SRX shelf \d+> ").unwrap();
        assert!(buffer.search_tail(&pattern).is_none());
        // The data itself is still there, just outside the search window.
        assert!(buffer.find_literal(b"SRX shelf 7> ").is_some());
    }

    #[test]
    fn test_find_literal_and_drain() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"noise\r\nlist -l\r\noutput");

        let (_, end) = buffer.find_literal(b"list -l").unwrap();
        buffer.drain_through(end);
        assert_eq!(buffer.as_slice(), b"\r\noutput");
    }

    #[test]
    fn test_splice_out() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"abcWARNINGdef");
        buffer.splice_out(3, 10);
        assert_eq!(buffer.as_slice(), b"abcdef");
    }

    #[test]
    fn test_take_clears_buffer() {
        let mut buffer = PatternBuffer::new(100);
        buffer.extend(b"test data");
        assert_eq!(buffer.take(), b"test data");
        assert!(buffer.is_empty());
    }
}
