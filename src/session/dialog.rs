//! Confirmation-dialog recognition for force mode.
//!
//! Destructive appliance commands stop mid-flight and ask. The table below
//! covers the dialogs the SRX family is known to present; each maps to
//! what the protocol does after auto-answering it in force mode.

use regex::bytes::Regex;

use super::buffer::PatternBuffer;

/// What the run() loop does after answering a recognized dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogAction {
    /// Answer and keep waiting; more dialogs or the real prompt follow.
    AnswerAndWait,

    /// Answer and finish with an empty response; nothing useful follows.
    AnswerAndFinish,

    /// Answer, then wait for the real prompt and return the text before
    /// it (the syslog interface dialog prints a summary afterwards).
    AnswerThenPrompt,
}

/// One recognized interactive prompt.
#[derive(Debug)]
pub struct DialogPrompt {
    /// Short name used in logs.
    pub name: &'static str,

    pattern: Regex,

    pub action: DialogAction,
}

/// The fixed set of interactive prompts run() knows how to answer.
#[derive(Debug)]
pub struct DialogTable {
    prompts: Vec<DialogPrompt>,
}

/// A dialog match located in the buffer.
#[derive(Debug, Clone, Copy)]
pub struct DialogMatch {
    /// Index into the table.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl DialogTable {
    /// The standard SRX dialog set.
    pub fn standard() -> Self {
        let prompt = |name, pattern: &str, action| DialogPrompt {
            name,
            pattern: Regex::new(pattern).expect("standard dialog pattern"),
            action,
        };

        Self {
            prompts: vec![
                prompt("bracketed-default", r"\[[nN]\]", DialogAction::AnswerAndWait),
                prompt(
                    "continue",
                    r"Continue\? \(y/n\)",
                    DialogAction::AnswerAndFinish,
                ),
                prompt(
                    "lun-format-menu",
                    r"Would you like to update the LUN format, or quit\? y/n/q\? \[q\]",
                    DialogAction::AnswerAndWait,
                ),
                prompt(
                    "lun-format-choice",
                    r"'y' to update to new format, 'n' to create LUN with old format, or 'q' to quit\[Q\]:",
                    DialogAction::AnswerAndWait,
                ),
                prompt(
                    "cancel-all-confirm",
                    r"'n' to cancel, 'a' for all, or 'y' to .*:",
                    DialogAction::AnswerAndWait,
                ),
                prompt(
                    "ipv4-destination",
                    r"IPv4 destination address .*:",
                    DialogAction::AnswerAndFinish,
                ),
                prompt(
                    "ipv4-source",
                    r"IPv4 source address .*:",
                    DialogAction::AnswerAndFinish,
                ),
                prompt(
                    "syslog-interface",
                    r"Local syslog interface .*:",
                    DialogAction::AnswerThenPrompt,
                ),
            ],
        }
    }

    /// An empty table; no dialog is ever recognized.
    pub fn none() -> Self {
        Self {
            prompts: Vec::new(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&DialogPrompt> {
        self.prompts.get(index)
    }

    /// Find the earliest dialog match in the buffer tail.
    pub fn match_in(&self, buffer: &PatternBuffer) -> Option<DialogMatch> {
        self.prompts
            .iter()
            .enumerate()
            .filter_map(|(index, p)| {
                buffer
                    .search_tail(&p.pattern)
                    .map(|(start, end)| DialogMatch { index, start, end })
            })
            .min_by_key(|m| m.start)
    }
}

impl Default for DialogTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(data: &str) -> PatternBuffer {
        let mut b = PatternBuffer::default();
        b.extend(data.as_bytes());
        b
    }

    #[test]
    fn test_continue_dialog_recognized() {
        let table = DialogTable::standard();
        let buf = buffer_of("remove will destroy lun 5\r\nContinue? (y/n) ");
        let m = table.match_in(&buf).unwrap();
        let p = table.get(m.index).unwrap();
        assert_eq!(p.name, "continue");
        assert_eq!(p.action, DialogAction::AnswerAndFinish);
    }

    #[test]
    fn test_bracketed_default_recognized() {
        let table = DialogTable::standard();
        let buf = buffer_of("Destroy pool? [n] ");
        let m = table.match_in(&buf).unwrap();
        assert_eq!(table.get(m.index).unwrap().name, "bracketed-default");
    }

    #[test]
    fn test_earliest_match_wins() {
        let table = DialogTable::standard();
        // Both a bracketed default and a continue dialog present; the
        // earlier one in the stream must be handled first.
        let buf = buffer_of("update? [N] more text Continue? (y/n) ");
        let m = table.match_in(&buf).unwrap();
        assert_eq!(table.get(m.index).unwrap().name, "bracketed-default");
    }

    #[test]
    fn test_plain_output_matches_nothing() {
        let table = DialogTable::standard();
        let buf = buffer_of("lun 5 is online\r\n");
        assert!(table.match_in(&buf).is_none());
    }
}
