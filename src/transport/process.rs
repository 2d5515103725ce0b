//! Spawned-process transport for CLI clients (telnet, cec).
//!
//! These clients speak protocols russh can't (telnet, the vendor console
//! redirection protocol), so we drive the installed binaries over their
//! stdio pipes instead.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::config::ProcessConfig;
use super::{Connector, Transport};
use crate::error::TransportError;

const READ_BUF: usize = 4096;

/// Transport over a spawned CLI client's pipes.
///
/// stderr is read alongside stdout: clients like cec print their
/// connection diagnostics ("can't netopen ...") there, and the login
/// state machine needs to see them.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    open: bool,
}

impl ProcessTransport {
    /// Spawn the configured client.
    pub fn spawn(config: &ProcessConfig) -> Result<Self, TransportError> {
        debug!("{} {:?}", config.program, config.args);

        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn {
                program: config.program.clone(),
                source: e,
            })?;

        let stdin = child.stdin.take().ok_or(TransportError::Closed)?;
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let stderr = child.stderr.take().ok_or(TransportError::Closed)?;

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
            open: true,
        })
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }

        let mut out_buf = [0u8; READ_BUF];
        let mut err_buf = [0u8; READ_BUF];

        let read = tokio::time::timeout(timeout, async {
            tokio::select! {
                r = self.stdout.read(&mut out_buf) => r.map(|n| (n, true)),
                r = self.stderr.read(&mut err_buf) => r.map(|n| (n, false)),
            }
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout))?;

        match read {
            Ok((0, _)) => {
                self.open = false;
                Err(TransportError::Eof)
            }
            Ok((n, from_stdout)) => {
                let buf = if from_stdout { &out_buf } else { &err_buf };
                Ok(Bytes::copy_from_slice(&buf[..n]))
            }
            Err(e) => {
                self.open = false;
                Err(TransportError::Io(e))
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.stdin.write_all(data).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if let Err(e) = self.stdin.shutdown().await {
            debug!("stdin shutdown on close: {e}");
        }
        if let Err(e) = self.child.start_kill() {
            debug!("kill on close: {e}");
        }
        // Reap; bounded in case the client ignores SIGKILL delivery races
        let _ = tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await;
        Ok(())
    }
}

/// Connector respawning the client process for each connect attempt.
pub struct ProcessConnector {
    config: ProcessConfig,
}

impl ProcessConnector {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self, _timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(ProcessTransport::spawn(&self.config)?))
    }
}
