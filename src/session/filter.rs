//! Asynchronous appliance-message recognition and removal.
//!
//! Storage appliances share one console TTY between command responses and
//! background event reporting: RAID rebuild progress, power-supply and fan
//! warnings, NTP sync failures. These lines can land anywhere in the byte
//! stream, including between a command and its own echo. The protocol
//! layer consults this table whenever an echo-wait times out, and once
//! more over the final response window, stripping every recognized message
//! so callers see only the command's real output.

use regex::bytes::Regex;

use super::buffer::PatternBuffer;

/// Upper bound on splice passes over one buffer. Appliances emit bursts
/// of these messages, but an unbounded loop on a malformed stream is
/// worse than giving up.
const MAX_SCRUB_PASSES: usize = 32;

/// Unsolicited messages the SRX console is known to emit.
const STANDARD_PATTERNS: &[&str] = &[
    r"Warning: ps[0-9]+ missing",
    r"Warning: can not sync with ntp server [0-9]+\.[0-9]+\.[0-9]+\.[0-9]+",
    r"Warning: model [0-9A-Za-z]+-[0-9A-Za-z]+ missing [0-9]+ fan",
    r"building parity complete: [0-9]+\.[0-9]+",
    r"building parity aborted: [0-9]+\.[0-9]+",
    r"beginning recovery of disk [0-9]+\.[0-9]+\.[0-9]+",
    r"beginning recovery of disk [0-9]+\.[0-9]+ \(?device [0-9]+\.[0-9]+\.[0-9]+\)?",
    r"recovery complete: [0-9]+\.[0-9]+\.[0-9]+",
    r"recovery complete: (?:disk|drive) [0-9]+\.[0-9]+ \(?device [0-9]+\.[0-9]+\.[0-9]+\)?",
    r"aborted recovery of disk [0-9]+\.[0-9]+\.[0-9]+(?:[ \t]*\(?device [0-9]+\.[0-9]+\.[0-9]+\)?)?",
    r"recover failed",
    r"unrecoverable failure on raid [0-9]+\.[0-9]+",
    r"no spare large enough for [0-9]+\.[0-9]+\.[0-9]+",
    r"no spare large enough for disk [0-9]+\.[0-9]+ \(?device [0-9]+\.[0-9]+\.[0-9]+\)?",
    r"recovery suspended: disk [0-9]+\.[0-9]+ \(?device [0-9]+\.[0-9]+\.[0-9]+\)?",
    r"growing raid to accomodate additional space provided by replacing disk [0-9]+\.[0-9]+ device [0-9]+\.[0-9]+\.[0-9]+",
];

/// Ordered table of async-message patterns, compiled once per session.
///
/// Each pattern is extended to swallow the trailing newline run so that
/// splicing a message out leaves the surrounding lines joined cleanly.
#[derive(Debug)]
pub struct AsyncMessageFilter {
    patterns: Vec<Regex>,
}

impl AsyncMessageFilter {
    /// The standard SRX table.
    pub fn standard() -> Self {
        let patterns = STANDARD_PATTERNS
            .iter()
            .map(|p| Self::wrap(p).expect("standard async pattern"))
            .collect();
        Self { patterns }
    }

    /// An empty table; messages are never recognized.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Add a caller-supplied pattern to the table.
    pub fn push(&mut self, pattern: &str) -> Result<(), regex::Error> {
        self.patterns.push(Self::wrap(pattern)?);
        Ok(())
    }

    fn wrap(pattern: &str) -> Result<Regex, regex::Error> {
        Regex::new(&format!(r"(?:{pattern})(?:\r?\n)*"))
    }

    /// Find the first recognized async message in `data`.
    pub fn find(&self, data: &[u8]) -> Option<(usize, usize)> {
        self.patterns
            .iter()
            .filter_map(|p| p.find(data).map(|m| (m.start(), m.end())))
            .min_by_key(|&(start, _)| start)
    }

    /// Splice every recognized async message out of `buffer`.
    ///
    /// Returns how many messages were removed. Bounded: pathological
    /// streams stop being scrubbed after [`MAX_SCRUB_PASSES`].
    pub fn scrub(&self, buffer: &mut PatternBuffer) -> usize {
        let mut removed = 0;
        while removed < MAX_SCRUB_PASSES {
            match self.find(buffer.as_slice()) {
                Some((start, end)) => {
                    log::debug!(
                        "stripping async message: '{}'",
                        String::from_utf8_lossy(&buffer.as_slice()[start..end]).trim_end()
                    );
                    buffer.splice_out(start, end);
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    /// Splice every recognized async message out of an owned byte string.
    pub fn scrub_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut buffer = PatternBuffer::default();
        buffer.extend(data);
        self.scrub(&mut buffer);
        buffer.take()
    }
}

impl Default for AsyncMessageFilter {
    fn default() -> Self {
        Self::standard()
    }
}
