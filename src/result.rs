//! The `ReturnCode` outcome carrier.
//!
//! Nearly every operation in otto returns a `ReturnCode` instead of raising
//! an error: a boolean success flag plus a message payload (command output
//! on success, error text on failure). Exceptions are reserved for
//! unrecoverable transport failures. Test scripts routinely probe for
//! expected failures ("assert this invalid command is rejected"), so the
//! default path must never short-circuit with an error.

use std::fmt;

use crate::error::{CommandError, Error};

/// Boolean-plus-message outcome of a session operation.
///
/// The convenience accessors delegate to the message so call sites can
/// treat a `ReturnCode` almost like a string without unwrapping:
///
/// ```
/// use otto::ReturnCode;
///
/// let r = ReturnCode::ok("lun 5 online");
/// if r.is_ok() && r.starts_with("lun") {
///     println!("{}", r);
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnCode {
    status: bool,
    message: String,
}

impl ReturnCode {
    pub fn new(status: bool, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// A successful outcome carrying command output.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(true, message)
    }

    /// A failed outcome carrying error text.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    /// The boolean status. Replaces the source language's truthiness
    /// coercion with an explicit accessor.
    pub fn is_ok(&self) -> bool {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Consume the carrier and take the message.
    pub fn unwrap_message(self) -> String {
        self.message
    }

    pub fn find(&self, needle: &str) -> Option<usize> {
        self.message.find(needle)
    }

    pub fn split(&self, sep: char) -> impl Iterator<Item = &str> {
        self.message.split(sep)
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.message.starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &str) -> bool {
        self.message.ends_with(suffix)
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.message.contains(needle)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.message.lines()
    }

    /// Collapse to the pass/fail record used by reporting layers.
    pub fn verdict(&self) -> Verdict {
        if self.status {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    /// Strict-mode escalation: callers that expect success turn a falsy
    /// result into a typed [`CommandError`] carrying the message.
    pub fn expected_by(self, command: &str) -> Result<Self, Error> {
        if self.status {
            Ok(self)
        } else {
            Err(CommandError {
                command: command.to_string(),
                message: self.message,
            }
            .into())
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Simplified pass/fail/aborted record for reporting layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Aborted,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_message_laws() {
        let ok = ReturnCode::ok("all good");
        assert!(ok.is_ok());
        assert_eq!(ok.to_string(), "all good");

        let bad = ReturnCode::fail("error: no such lun");
        assert!(!bad.is_ok());
        assert_eq!(bad.to_string(), "error: no such lun");
    }

    #[test]
    fn test_string_delegation() {
        let r = ReturnCode::ok("lun 5.0 online\nlun 5.1 offline");
        assert!(r.starts_with("lun"));
        assert!(r.ends_with("offline"));
        assert_eq!(r.find("5.1"), Some(19));
        assert!(r.contains("online"));
        assert_eq!(r.lines().count(), 2);
    }

    #[test]
    fn test_verdict_mapping() {
        assert_eq!(ReturnCode::ok("").verdict(), Verdict::Pass);
        assert_eq!(ReturnCode::fail("").verdict(), Verdict::Fail);
        assert_eq!(Verdict::Pass.to_string(), "pass");
        assert_eq!(Verdict::Aborted.to_string(), "aborted");
    }

    #[test]
    fn test_expected_by_escalates_failure() {
        let err = ReturnCode::fail("usage: lun <index>")
            .expected_by("lun")
            .unwrap_err();
        match err {
            Error::Command(e) => {
                assert_eq!(e.command, "lun");
                assert_eq!(e.message, "usage: lun <index>");
            }
            other => panic!("expected CommandError, got {other:?}"),
        }

        assert!(ReturnCode::ok("out").expected_by("lun").is_ok());
    }
}
