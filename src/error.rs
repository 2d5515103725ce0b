//! Error types for otto.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for otto operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (connection, authentication, EOF, timeout)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session protocol errors (login, echo/prompt synchronization)
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The remote CLI itself reported a failure
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Malformed caller input detected before anything was sent
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),
}

/// Transport layer errors (process spawn, SSH connection, byte-stream I/O).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to reach the host at all
    #[error("Connection failed to {host}: {source}")]
    ConnectionFailed {
        host: String,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Failed to spawn the client process (telnet/cec)
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A read or write exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// The remote process exited or the connection dropped mid-read.
    /// Distinct from Timeout so callers can decide between reconnect
    /// and hard failure.
    #[error("Unexpected EOF")]
    Eof,

    /// Transport already closed
    #[error("Transport closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session layer errors (login state machine, command/response protocol).
#[derive(Error, Debug)]
pub enum SessionError {
    /// run() was called on a disconnected session
    #[error("Not connected - call connect() first")]
    NotConnected,

    /// The login handshake failed. The hint suggests a remediation
    /// (e.g. making the cec client setuid, checking the shelf address).
    #[error("Login to {host} failed: {reason}")]
    LoginFailed {
        host: String,
        reason: String,
        hint: Option<String>,
    },

    /// The prompt never appeared and no known async message explains it
    #[error("Didn't find prompt '{prompt}'; instead saw:\n{before}")]
    PromptNotFound { prompt: String, before: String },

    /// The command echo never appeared and no known async message explains it
    #[error("Looking for echo of '{command}' in:\n{before}")]
    EchoNotFound { command: String, before: String },

    /// Invalid regex in a prompt or pattern table
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// The appliance reported a command failure. Only raised when the caller
/// opted into strict (`expectation = true`) mode; otherwise surfaced as a
/// falsy [`ReturnCode`](crate::ReturnCode).
#[derive(Error, Debug)]
#[error("'{command}' failed: {message}")]
pub struct CommandError {
    pub command: String,
    pub message: String,
}

/// The caller formed a bad request, detected before any bytes were sent.
/// Distinct from appliance-reported usage errors so callers can tell
/// "I mis-used the library" from "the appliance rejected my command".
#[derive(Error, Debug)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Result type alias using otto's Error.
pub type Result<T> = std::result::Result<T, Error>;
