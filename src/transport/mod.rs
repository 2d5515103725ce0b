//! Transport layer: the byte streams a session scrapes.
//!
//! A transport is either a native SSH channel (russh) or a spawned CLI
//! client process (telnet, the vendor cec tool) driven over its pipes.
//! Sessions own exactly one transport at a time and recreate it through a
//! [`Connector`] on every connect/reconnect cycle.

pub mod config;
mod process;
mod ssh;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{AuthMethod, HostKeyVerification, ProcessConfig, SshConfig};
pub use process::{ProcessConnector, ProcessTransport};
pub use ssh::{SshConnector, SshTransport};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// A byte-stream to a remote CLI endpoint.
///
/// Reads are chunked and timeout-bounded; exceeding the deadline yields
/// [`TransportError::Timeout`], a closed stream yields
/// [`TransportError::Eof`]. The session layer needs the two distinguished
/// to decide between async-message scrubbing and reconnecting.
#[async_trait]
pub trait Transport: Send {
    /// Read the next chunk of output, waiting at most `timeout`.
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Bytes, TransportError>;

    /// Send raw bytes to the remote.
    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Close the transport. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory recreating a [`Transport`] for each connect attempt.
///
/// Sessions go through multiple connect/disconnect cycles (reboots, power
/// cycles), so they hold a connector rather than a one-shot transport.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>, TransportError>;
}
