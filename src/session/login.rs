//! Per-transport-kind login and logout behavior.
//!
//! The connect handshake is the same small state machine everywhere; what
//! differs between ssh, telnet and cec is which prompts can appear, what
//! wakes an idle console up, and how to leave politely.

use regex::bytes::Regex;

/// ASCII file separator, ctrl-\ - drops a cec session back to its menu.
pub const CEC_ESCAPE: &[u8] = &[0x1c];

/// ESC keystroke backing out of PDU sub-menus.
pub const MENU_ESCAPE_KEY: &[u8] = &[0x1b];

/// How a given session kind logs in and out.
#[derive(Debug)]
pub struct LoginPlan {
    /// Kind name for logs ("ssh", "telnet", "cec").
    pub kind: &'static str,

    /// Banner announcing the transport connected before any prompt
    /// appears (cec prints "Escape is ..." and nothing else).
    pub banner: Option<Regex>,

    /// Username prompt, if the remote asks over the stream.
    pub username_prompt: Option<Regex>,

    /// Password prompt, if the remote asks over the stream.
    pub password_prompt: Option<Regex>,

    /// Idle menu requiring an Enter keystroke to move on.
    pub menu_enter: Option<Regex>,

    /// Sub-menu requiring an escape keystroke to back out of.
    pub menu_escape: Option<Regex>,

    /// Empty lines to send once the banner is seen; cec connects without
    /// printing a prompt until poked.
    pub wakeup_lines: usize,

    /// Line terminator the remote expects.
    pub terminator: &'static str,

    /// Logout sends, in order. The second is only used when the prompt
    /// comes back instead of EOF after the first.
    pub logout: &'static [&'static [u8]],

    /// Prompt that signals the logout menu (cec shows ">>> " after the
    /// escape character); falls back to the session prompt.
    pub logout_prompt: Option<&'static str>,
}

impl LoginPlan {
    /// SSH sessions authenticate in the transport; the handshake only
    /// needs to sync on the prompt. Some appliances still ask for a
    /// password on the shell stream, so those prompts stay armed.
    pub fn ssh() -> Self {
        Self {
            kind: "ssh",
            banner: None,
            username_prompt: None,
            password_prompt: Some(pattern(r"(?i)password:? ?")),
            menu_enter: None,
            menu_escape: None,
            wakeup_lines: 0,
            terminator: "\n",
            logout: &[b"exit", b"exit"],
            logout_prompt: None,
        }
    }

    /// Telnet logs in over the stream. The menu prompts cover the
    /// menu-driven PDUs reachable over raw telnet ports.
    pub fn telnet() -> Self {
        Self {
            kind: "telnet",
            banner: None,
            username_prompt: Some(pattern(r"(?i)user(?:name)? ?:?")),
            password_prompt: Some(pattern(r"(?i)password ?:?")),
            menu_enter: Some(pattern(r"\[\+none")),
            menu_escape: Some(pattern(r"<ESC> = Back")),
            wakeup_lines: 0,
            terminator: "\r\n",
            logout: &[b"exit", b"exit"],
            logout_prompt: None,
        }
    }

    /// cec connects silently ("Escape is ...") and needs a couple of
    /// newlines before the shelf prints either a login prompt or the
    /// console prompt.
    pub fn cec() -> Self {
        Self {
            kind: "cec",
            banner: Some(pattern(r"Escape is")),
            username_prompt: None,
            password_prompt: Some(pattern(r"Password")),
            menu_enter: None,
            menu_escape: None,
            wakeup_lines: 2,
            terminator: "\n",
            logout: &[CEC_ESCAPE, b"q"],
            logout_prompt: Some(">>> "),
        }
    }
}

/// Classify a pre-EOF buffer from a failed handshake into a reason and an
/// optional remediation hint.
pub fn classify_eof(before: &str, host: &str) -> (String, Option<String>) {
    let first_line = before
        .trim()
        .lines()
        .next()
        .unwrap_or("unexpected EOF during login")
        .to_string();

    if before.contains("can't netopen") {
        (
            first_line,
            Some("something like 'sudo chmod u+s /usr/sbin/cec'".to_string()),
        )
    } else if before.contains("none found") {
        (
            first_line,
            Some(format!("could not reach shelf address {host}")),
        )
    } else {
        (first_line, None)
    }
}

fn pattern(p: &str) -> Regex {
    Regex::new(p).expect("login plan pattern")
}
