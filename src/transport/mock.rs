//! Scripted transport for driving the session state machine in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{Connector, Transport};
use crate::error::TransportError;

/// Shared record of everything a scripted transport was asked to send.
#[derive(Clone, Default)]
pub(crate) struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    pub fn lines(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    fn push(&self, data: &[u8]) {
        self.0.lock().unwrap().push(data.to_vec());
    }
}

/// A transport that plays back canned output and records what was sent.
///
/// Reads pop from a chunk queue; an exhausted queue yields Timeout (or Eof
/// when configured). Sends are recorded and can trigger follow-up chunks,
/// which is how confirmation-dialog exchanges are scripted.
pub(crate) struct ScriptedTransport {
    chunks: VecDeque<Bytes>,
    replies: VecDeque<(Vec<u8>, Vec<Bytes>)>,
    sent: SentLog,
    eof_when_empty: bool,
    open: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            replies: VecDeque::new(),
            sent: SentLog::default(),
            eof_when_empty: false,
            open: true,
        }
    }

    /// Queue a chunk of remote output.
    pub fn chunk(mut self, data: impl AsRef<[u8]>) -> Self {
        self.chunks
            .push_back(Bytes::copy_from_slice(data.as_ref()));
        self
    }

    /// When `trigger` is next seen in a send, queue `output`.
    pub fn on_send(mut self, trigger: impl AsRef<[u8]>, output: impl AsRef<[u8]>) -> Self {
        self.replies.push_back((
            trigger.as_ref().to_vec(),
            vec![Bytes::copy_from_slice(output.as_ref())],
        ));
        self
    }

    /// Signal EOF instead of Timeout once all chunks are consumed.
    pub fn eof_when_empty(mut self) -> Self {
        self.eof_when_empty = true;
        self
    }

    /// Handle for inspecting sends after the transport has been moved
    /// into a session.
    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None if self.eof_when_empty => {
                self.open = false;
                Err(TransportError::Eof)
            }
            None => Err(TransportError::Timeout(timeout)),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.sent.push(data);
        if let Some((trigger, _)) = self.replies.front() {
            if !trigger.is_empty()
                && data
                    .windows(trigger.len())
                    .any(|w| w == trigger.as_slice())
            {
                let (_, output) = self.replies.pop_front().unwrap();
                self.chunks.extend(output);
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        Ok(())
    }
}

/// What a [`ScriptedConnector`] should do for one connect attempt.
pub(crate) enum ConnectScript {
    Transport(ScriptedTransport),
    Timeout,
    Eof,
}

/// Plays back a sequence of connect outcomes; exhausted scripts time out.
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<ConnectScript>>,
    attempts: Mutex<usize>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<ConnectScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            attempts: Mutex::new(0),
        }
    }

    pub fn attempt_count(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        *self.attempts.lock().unwrap() += 1;
        match self.scripts.lock().unwrap().pop_front() {
            Some(ConnectScript::Transport(t)) => Ok(Box::new(t)),
            Some(ConnectScript::Timeout) | None => Err(TransportError::Timeout(timeout)),
            Some(ConnectScript::Eof) => Err(TransportError::Eof),
        }
    }
}
