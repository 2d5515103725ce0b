//! The expect-style session engine.
//!
//! A [`Session`] owns one transport and implements the login, logout and
//! command/response state machines on top of its byte stream. Commands on
//! a session are strictly ordered: every `run()` blocks until the prompt
//! (or a timeout/EOF) is reached, and the `&mut` receiver rules out two
//! in-flight commands at compile time.

mod buffer;
mod builder;
mod dialog;
mod filter;
mod login;

pub use buffer::PatternBuffer;
pub use builder::SessionBuilder;
pub use dialog::{DialogAction, DialogTable};
pub use filter::AsyncMessageFilter;
pub use login::{classify_eof, LoginPlan, CEC_ESCAPE, MENU_ESCAPE_KEY};

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use regex::bytes::Regex;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;

use crate::error::{Error, Result, SessionError, TransportError};
use crate::result::ReturnCode;
use crate::transport::{Connector, Transport};

/// Fallback credential when a password prompt appears and none was
/// configured; matches the appliance factory default.
const DEFAULT_CREDENTIAL: &str = "admin";

/// How many times the login machine answers an auth prompt before
/// concluding the credential is wrong.
const MAX_AUTH_ANSWERS: usize = 3;

/// Upper bound on confirmation dialogs answered within one run().
const MAX_DIALOG_ROUNDS: usize = 16;

/// Read window used to drain already-arrived output in no-wait mode.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Deadline for the best-effort logout exchange in disconnect().
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// The prompt a remote CLI uses to signal readiness.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
    /// Matched exactly, anywhere in the stream.
    Literal(String),

    /// A regex matched against the buffer tail.
    Pattern(String),
}

impl Prompt {
    pub fn literal(s: impl Into<String>) -> Self {
        Prompt::Literal(s.into())
    }

    pub fn pattern(s: impl Into<String>) -> Self {
        Prompt::Pattern(s.into())
    }

    pub(crate) fn compile(&self) -> std::result::Result<Regex, regex::Error> {
        match self {
            Prompt::Literal(s) => Regex::new(&regex::escape(s)),
            Prompt::Pattern(s) => Regex::new(s),
        }
    }

    fn describe(&self) -> &str {
        match self {
            Prompt::Literal(s) | Prompt::Pattern(s) => s,
        }
    }
}

/// Connection parameters for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hostname, IP address, or shelf address for cec.
    pub host: String,

    /// Username, where the session kind uses one.
    pub username: Option<String>,

    /// Credential answered to password prompts. Falls back to the
    /// appliance default when unset.
    pub credential: Option<SecretString>,

    /// The prompt that ends every command response.
    pub prompt: Prompt,

    /// Default timeout for connect and for each run() wait.
    pub timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, prompt: Prompt) -> Self {
        Self {
            host: host.into(),
            username: None,
            credential: None,
            prompt,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Options for one run() invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// When false, fire-and-forget: send the command and return whatever
    /// has already accumulated. Used for commands that reboot the target.
    pub wait: bool,

    /// Auto-answer recognized confirmation dialogs.
    pub force: bool,

    /// The answer sent in force mode.
    pub answer: String,

    /// Per-call timeout override.
    pub timeout: Option<Duration>,

    /// Per-call prompt override (some commands switch the prompt, e.g.
    /// a pager or a sub-shell).
    pub prompt: Option<Prompt>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            wait: true,
            force: false,
            answer: "y".to_string(),
            timeout: None,
            prompt: None,
        }
    }
}

impl RunOptions {
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// One interactive connection to a remote text-CLI endpoint.
pub struct Session {
    config: SessionConfig,
    plan: LoginPlan,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    buffer: PatternBuffer,
    prompt: Regex,
    filter: AsyncMessageFilter,
    dialogs: DialogTable,
    failure_patterns: Vec<String>,
    connected: bool,
}

impl Session {
    /// Build a session from its parts. Most callers go through
    /// [`SessionBuilder`]; this seam exists for custom transports.
    pub fn new(
        connector: Arc<dyn Connector>,
        plan: LoginPlan,
        config: SessionConfig,
    ) -> Result<Self> {
        let prompt = config.prompt.compile().map_err(SessionError::from)?;
        Ok(Self {
            config,
            plan,
            connector,
            transport: None,
            buffer: PatternBuffer::default(),
            prompt,
            filter: AsyncMessageFilter::standard(),
            dialogs: DialogTable::standard(),
            failure_patterns: Vec::new(),
            connected: false,
        })
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
    }

    /// Treat responses containing `pattern` as command failures.
    pub fn add_failure_pattern(&mut self, pattern: impl Into<String>) {
        self.failure_patterns.push(pattern.into());
    }

    /// Extend the async-message table with a caller-supplied pattern.
    pub fn add_async_message(&mut self, pattern: &str) -> Result<()> {
        self.filter.push(pattern).map_err(SessionError::from)?;
        Ok(())
    }

    /// Replace the confirmation-dialog table.
    pub fn set_dialogs(&mut self, dialogs: DialogTable) {
        self.dialogs = dialogs;
    }

    /// Connect and authenticate using the session's default timeout,
    /// raising on failure.
    pub async fn connect(&mut self) -> Result<ReturnCode> {
        self.connect_opts(self.config.timeout, true).await
    }

    /// Connect and authenticate with host.
    ///
    /// Runs the login state machine: answer username/password prompts,
    /// wake idle menus, and sync on the configured prompt. With
    /// `expectation == false` connection failures come back as a falsy
    /// [`ReturnCode`] instead of an error. Safe to call again after a
    /// disconnect; any stale transport is closed first.
    pub async fn connect_opts(&mut self, timeout: Duration, expectation: bool) -> Result<ReturnCode> {
        if let Some(mut stale) = self.transport.take() {
            let _ = stale.close().await;
        }
        self.connected = false;
        self.buffer.clear();

        let transport = match self.connector.connect(timeout).await {
            Ok(t) => t,
            Err(e) => {
                error!(
                    "couldn't complete {} connection to {}: {e}",
                    self.plan.kind, self.config.host
                );
                if expectation {
                    return Err(e.into());
                }
                return Ok(ReturnCode::fail(e.to_string()));
            }
        };
        self.transport = Some(transport);

        match self.login(timeout).await {
            Ok(banner) => {
                self.connected = true;
                debug!("connected to {}", self.config.host);
                Ok(ReturnCode::ok(banner))
            }
            Err(e) => {
                if let Some(mut t) = self.transport.take() {
                    let _ = t.close().await;
                }
                error!(
                    "couldn't complete {} connection to {}: {e}",
                    self.plan.kind, self.config.host
                );
                if expectation {
                    Err(e)
                } else {
                    Ok(ReturnCode::fail(e.to_string()))
                }
            }
        }
    }

    /// The login state machine shared by all session kinds.
    async fn login(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut auth_answers = 0;
        let mut banner_seen = false;

        loop {
            // Reached the target prompt: anything before it is banner text.
            if let Some((start, end)) = self.buffer.search_tail(&self.prompt) {
                let banner =
                    String::from_utf8_lossy(&self.buffer.as_slice()[..start]).into_owned();
                self.buffer.drain_through(end);
                return Ok(banner);
            }

            if let Some(pw) = self.plan.password_prompt.as_ref() {
                if let Some((_, end)) = self.buffer.search_tail(pw) {
                    if auth_answers >= MAX_AUTH_ANSWERS {
                        return Err(TransportError::AuthenticationFailed {
                            user: self.config.username.clone().unwrap_or_default(),
                        }
                        .into());
                    }
                    auth_answers += 1;
                    let credential = self
                        .config
                        .credential
                        .as_ref()
                        .map(|c| c.expose_secret().to_string())
                        .unwrap_or_else(|| DEFAULT_CREDENTIAL.to_string());
                    self.buffer.drain_through(end);
                    self.send_line_raw(&credential).await?;
                    continue;
                }
            }

            if let Some(user_prompt) = self.plan.username_prompt.as_ref() {
                if let Some((_, end)) = self.buffer.search_tail(user_prompt) {
                    let username = self.config.username.clone().unwrap_or_default();
                    self.buffer.drain_through(end);
                    self.send_line_raw(&username).await?;
                    continue;
                }
            }

            if let Some(menu) = self.plan.menu_enter.as_ref() {
                if let Some((_, end)) = self.buffer.search_tail(menu) {
                    self.buffer.drain_through(end);
                    self.send_bytes(b"\r").await?;
                    continue;
                }
            }

            if let Some(menu) = self.plan.menu_escape.as_ref() {
                if let Some((_, end)) = self.buffer.search_tail(menu) {
                    self.buffer.drain_through(end);
                    self.send_bytes(MENU_ESCAPE_KEY).await?;
                    continue;
                }
            }

            if !banner_seen {
                if let Some(banner) = self.plan.banner.as_ref() {
                    if let Some((_, end)) = self.buffer.search_tail(banner) {
                        banner_seen = true;
                        self.buffer.drain_through(end);
                        for _ in 0..self.plan.wakeup_lines {
                            self.send_line_raw("").await?;
                        }
                        continue;
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.prompt_not_found().into());
            }

            match self.read_into_buffer(remaining).await {
                Ok(()) => {}
                Err(TransportError::Timeout(_)) => {
                    return Err(self.prompt_not_found().into());
                }
                Err(TransportError::Eof) => {
                    let before = self.buffer.as_str_lossy().into_owned();
                    let (reason, hint) = classify_eof(&before, &self.config.host);
                    return Err(SessionError::LoginFailed {
                        host: self.config.host.clone(),
                        reason,
                        hint,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Disconnect from host. This is mostly a formality: the logout
    /// exchange is best-effort and the transport is closed regardless.
    /// Never fails, and calling it on a disconnected session is a no-op.
    pub async fn disconnect(&mut self) -> ReturnCode {
        self.connected = false;
        let Some(mut transport) = self.transport.take() else {
            return ReturnCode::ok("");
        };

        let logout_prompt = match self.plan.logout_prompt {
            Some(p) => Regex::new(&regex::escape(p)).ok(),
            None => None,
        };
        let prompt = logout_prompt.unwrap_or_else(|| self.prompt.clone());

        let deadline = Instant::now() + LOGOUT_TIMEOUT;
        let mut sends = self.plan.logout.iter();

        if let Some(first) = sends.next() {
            let _ = Self::send_terminated(&mut *transport, first, self.plan.terminator).await;
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.read_chunk(remaining).await {
                Ok(data) => {
                    self.buffer.extend(&data);
                    // Prompt came back instead of EOF: send the next
                    // logout command.
                    if let Some((_, end)) = self.buffer.search_tail(&prompt) {
                        self.buffer.drain_through(end);
                        match sends.next() {
                            Some(cmd) => {
                                let _ = Self::send_terminated(
                                    &mut *transport,
                                    cmd,
                                    self.plan.terminator,
                                )
                                .await;
                            }
                            None => break,
                        }
                    }
                }
                Err(TransportError::Eof) => break,
                Err(e) => {
                    debug!("logout read: {e}");
                    break;
                }
            }
        }

        if let Err(e) = transport.close().await {
            debug!("transport close: {e}");
        }
        self.buffer.clear();
        ReturnCode::ok("")
    }

    /// Reconnect to the host, e.g. after asking it to reboot.
    ///
    /// Sleeps `after` between attempts. `attempts == 0` retries forever;
    /// otherwise gives up with a falsy [`ReturnCode`] once the budget is
    /// spent. Timeouts and EOFs between attempts are swallowed.
    pub async fn reconnect(
        &mut self,
        after: Duration,
        timeout: Option<Duration>,
        attempts: u32,
    ) -> ReturnCode {
        let timeout = timeout.unwrap_or(self.config.timeout);
        let started = Instant::now();
        self.disconnect().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            tokio::time::sleep(after).await;
            if attempts == 0 {
                debug!("attempt {attempt} of inf to re-connect to {}", self.config.host);
            } else {
                debug!(
                    "attempt {attempt} of {attempts} to re-connect to {}",
                    self.config.host
                );
            }

            let result = match self.connect_opts(timeout, false).await {
                Ok(r) => r,
                Err(e) => ReturnCode::fail(e.to_string()),
            };
            if result.is_ok() {
                debug!("reconnected after {:?}", started.elapsed());
                return ReturnCode::ok(result.unwrap_message());
            }

            if attempts != 0 && attempt >= attempts {
                error!(
                    "giving up, no attempts left to re-connect to {}",
                    self.config.host
                );
                return ReturnCode::fail(format!(
                    "no attempts left to re-connect to {}: {}",
                    self.config.host,
                    result.message()
                ));
            }
        }
    }

    /// Run a command with default options and return its response.
    pub async fn run(&mut self, cmd: &str) -> Result<ReturnCode> {
        self.run_with(cmd, RunOptions::default()).await
    }

    /// Run a command and return the result. This is the main - only
    /// real - operation.
    ///
    /// Sends the command, waits for its own echo, then for the prompt,
    /// scrubbing recognized asynchronous appliance messages out of both
    /// waits, and optionally auto-answering confirmation dialogs.
    pub async fn run_with(&mut self, cmd: &str, opts: RunOptions) -> Result<ReturnCode> {
        if cmd.is_empty() {
            return Err(crate::error::UsageError("empty command".to_string()).into());
        }
        if cmd.contains('\n') || cmd.contains('\r') {
            return Err(crate::error::UsageError(
                "command must not contain a line terminator".to_string(),
            )
            .into());
        }
        if !self.connected {
            return Err(SessionError::NotConnected.into());
        }

        let timeout = opts.timeout.unwrap_or(self.config.timeout);
        debug!(
            "{cmd}\n\twait {} force {} ans {} timeout {timeout:?}",
            opts.wait, opts.force, opts.answer
        );

        let prompt = match &opts.prompt {
            Some(p) => p.compile().map_err(SessionError::from)?,
            None => self.prompt.clone(),
        };
        let prompt_text = opts
            .prompt
            .as_ref()
            .unwrap_or(&self.config.prompt)
            .describe()
            .to_string();

        self.send_line_raw(cmd).await?;

        if !opts.wait {
            self.drain_available().await;
            let text = normalize(&self.buffer.take());
            debug!("**didn't wait for a response**");
            return Ok(ReturnCode::ok(text));
        }

        self.await_echo(cmd, timeout).await?;
        let response = self
            .await_response(&prompt, &prompt_text, &opts, timeout)
            .await?;

        // Async messages can also land between the echo and the real
        // answer; scrub the full response window.
        let cleaned = self.filter.scrub_bytes(&response);
        let text = normalize(&cleaned);
        debug!("{text}");

        if self.failure_patterns.iter().any(|p| text.contains(p)) {
            return Ok(ReturnCode::fail(text));
        }
        Ok(ReturnCode::ok(text))
    }

    /// Run a command and classify the response, escalating failures into
    /// errors when `expectation` is set.
    pub async fn run_and_check(
        &mut self,
        cmd: &str,
        opts: RunOptions,
        expectation: bool,
    ) -> Result<ReturnCode> {
        let result = self.run_with(cmd, opts).await?;
        if expectation {
            result.expected_by(cmd)
        } else {
            Ok(result)
        }
    }

    /// Send raw text with no terminator (single menu keystrokes).
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        if !self.connected {
            return Err(SessionError::NotConnected.into());
        }
        self.send_bytes(text.as_bytes()).await
    }

    /// Send a line terminated the way this session kind requires.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        if !self.connected {
            return Err(SessionError::NotConnected.into());
        }
        self.send_line_raw(text).await
    }

    /// Read until `prompt` matches, returning the text before the match.
    /// The lower-level expect primitive behind run(), exposed for
    /// menu-driven equipment that never settles on one prompt.
    pub async fn expect(&mut self, prompt: &Prompt, timeout: Option<Duration>) -> Result<String> {
        if !self.connected {
            return Err(SessionError::NotConnected.into());
        }
        let compiled = prompt.compile().map_err(SessionError::from)?;
        let timeout = timeout.unwrap_or(self.config.timeout);
        let deadline = Instant::now() + timeout;

        loop {
            if let Some((start, end)) = self.buffer.search_tail(&compiled) {
                let before =
                    String::from_utf8_lossy(&self.buffer.as_slice()[..start]).into_owned();
                self.buffer.drain_through(end);
                return Ok(before);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::PromptNotFound {
                    prompt: prompt.describe().to_string(),
                    before: self.buffer.as_str_lossy().into_owned(),
                }
                .into());
            }
            match self.read_into_buffer(remaining).await {
                Ok(()) => {}
                Err(TransportError::Timeout(_)) => {
                    return Err(SessionError::PromptNotFound {
                        prompt: prompt.describe().to_string(),
                        before: self.buffer.as_str_lossy().into_owned(),
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Wait for the command's own echo. A timeout here is not
    /// necessarily fatal: async appliance messages may have landed
    /// between the command and its echo, so strip every recognized one
    /// and look again before giving up.
    async fn await_echo(&mut self, cmd: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((_, end)) = self.buffer.find_literal(cmd.as_bytes()) {
                self.buffer.drain_through(end);
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let timed_out = if remaining.is_zero() {
                true
            } else {
                match self.read_into_buffer(remaining).await {
                    Ok(()) => false,
                    Err(TransportError::Timeout(_)) => true,
                    Err(e) => return Err(e.into()),
                }
            };

            if timed_out {
                let stripped = self.filter.scrub(&mut self.buffer);
                if stripped > 0 {
                    if let Some((_, end)) = self.buffer.find_literal(cmd.as_bytes()) {
                        debug!("echo of '{cmd}' recovered after stripping {stripped} async message(s)");
                        self.buffer.drain_through(end);
                        return Ok(());
                    }
                }
                return Err(SessionError::EchoNotFound {
                    command: cmd.to_string(),
                    before: self.buffer.as_str_lossy().into_owned(),
                }
                .into());
            }
        }
    }

    /// Wait for the prompt, auto-answering recognized confirmation
    /// dialogs in force mode. Returns the raw response bytes.
    async fn await_response(
        &mut self,
        prompt: &Regex,
        prompt_text: &str,
        opts: &RunOptions,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut only_prompt = false;
        let mut rounds = 0;

        loop {
            let prompt_match = self.buffer.search_tail(prompt);
            let dialog_match = if only_prompt {
                None
            } else {
                self.dialogs.match_in(&self.buffer)
            };

            // The prompt wins ties: a dialog pattern overlapping the
            // prompt span means the command already finished.
            let dialog = match (prompt_match, dialog_match) {
                (Some((p, _)), Some(d)) if d.start < p => Some(d),
                (None, Some(d)) => Some(d),
                _ => None,
            };

            if let Some(m) = dialog {
                rounds += 1;
                if rounds > MAX_DIALOG_ROUNDS {
                    return Err(SessionError::PromptNotFound {
                        prompt: prompt_text.to_string(),
                        before: self.buffer.as_str_lossy().into_owned(),
                    }
                    .into());
                }

                if !opts.force {
                    // Not told to answer: the dialog itself is the
                    // response, and the caller follows up with its own
                    // run() calls.
                    let response = self.buffer.as_slice()[..m.end].to_vec();
                    self.buffer.drain_through(m.end);
                    return Ok(response);
                }

                let dialog = self.dialogs.get(m.index).ok_or_else(|| {
                    SessionError::PromptNotFound {
                        prompt: prompt_text.to_string(),
                        before: self.buffer.as_str_lossy().into_owned(),
                    }
                })?;
                let action = dialog.action;
                debug!("answering {} dialog with '{}'", dialog.name, opts.answer);
                self.buffer.drain_through(m.end);
                let answer = opts.answer.clone();
                self.send_line_raw(&answer).await?;

                match action {
                    DialogAction::AnswerAndWait => {}
                    DialogAction::AnswerAndFinish => return Ok(Vec::new()),
                    DialogAction::AnswerThenPrompt => only_prompt = true,
                }
                continue;
            }

            if let Some((start, end)) = prompt_match {
                let response = self.buffer.as_slice()[..start].to_vec();
                self.buffer.drain_through(end);
                return Ok(response);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::PromptNotFound {
                    prompt: prompt_text.to_string(),
                    before: self.buffer.as_str_lossy().into_owned(),
                }
                .into());
            }
            match self.read_into_buffer(remaining).await {
                Ok(()) => {}
                Err(TransportError::Timeout(_)) => {
                    return Err(SessionError::PromptNotFound {
                        prompt: prompt_text.to_string(),
                        before: self.buffer.as_str_lossy().into_owned(),
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Pull whatever output has already arrived, without blocking past
    /// the drain window.
    async fn drain_available(&mut self) {
        for _ in 0..10 {
            match self.read_into_buffer(DRAIN_TIMEOUT).await {
                Ok(()) => {}
                Err(_) => break,
            }
        }
    }

    async fn read_into_buffer(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<(), TransportError> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        let data = transport.read_chunk(timeout).await?;
        self.buffer.extend(&data);
        Ok(())
    }

    async fn send_line_raw(&mut self, text: &str) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;
        Self::send_terminated(&mut **transport, text.as_bytes(), self.plan.terminator)
            .await
            .map_err(Error::from)
    }

    async fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(SessionError::NotConnected)?;
        transport.send(data).await.map_err(Error::from)
    }

    async fn send_terminated(
        transport: &mut dyn Transport,
        data: &[u8],
        terminator: &str,
    ) -> std::result::Result<(), TransportError> {
        let mut line = data.to_vec();
        line.extend_from_slice(terminator.as_bytes());
        transport.send(&line).await
    }

    fn prompt_not_found(&self) -> SessionError {
        SessionError::PromptNotFound {
            prompt: self.config.prompt.describe().to_string(),
            before: self.buffer.as_str_lossy().into_owned(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("kind", &self.plan.kind)
            .field("connected", &self.connected)
            .finish()
    }
}

/// Collapse the doubled carriage returns PTYs produce and trim the
/// response edges.
fn normalize(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .replace("\r\r\n", "\r\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ConnectScript, ScriptedConnector, ScriptedTransport};

    const PROMPT: &str = "SRX shelf 7> ";

    fn config() -> SessionConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut c = SessionConfig::new("shelf7", Prompt::literal(PROMPT));
        c.timeout = Duration::from_millis(500);
        c
    }

    fn session_with(transport: ScriptedTransport) -> Session {
        let connector = Arc::new(ScriptedConnector::new(vec![ConnectScript::Transport(
            transport,
        )]));
        Session::new(connector, LoginPlan::ssh(), config()).unwrap()
    }

    fn connected(transport: ScriptedTransport) -> Session {
        let mut s = session_with(transport.chunk(format!("banner\r\n{PROMPT}").as_bytes()));
        tokio_test::block_on(s.connect()).unwrap();
        s
    }

    #[test]
    fn test_connect_returns_banner() {
        let transport = ScriptedTransport::new().chunk(format!("welcome\r\n{PROMPT}").as_bytes());
        let mut s = session_with(transport);
        let rc = tokio_test::block_on(s.connect()).unwrap();
        assert!(rc.is_ok());
        assert!(rc.message().contains("welcome"));
        assert!(s.is_connected());
    }

    #[test]
    fn test_connect_answers_password_prompt() {
        let transport = ScriptedTransport::new()
            .chunk(b"Password: ")
            .on_send(b"secret", format!("\r\n{PROMPT}"));
        let sent = transport.sent_log();
        let connector = Arc::new(ScriptedConnector::new(vec![ConnectScript::Transport(
            transport,
        )]));
        let mut cfg = config();
        cfg.credential = Some("secret".to_string().into());
        let mut s = Session::new(connector, LoginPlan::ssh(), cfg).unwrap();
        tokio_test::block_on(s.connect()).unwrap();
        assert_eq!(sent.count_containing("secret"), 1);
    }

    #[test]
    fn test_connect_failure_is_falsy_when_not_expected() {
        let connector = Arc::new(ScriptedConnector::new(vec![ConnectScript::Eof]));
        let mut s = Session::new(connector, LoginPlan::ssh(), config()).unwrap();
        let rc =
            tokio_test::block_on(s.connect_opts(Duration::from_millis(100), false)).unwrap();
        assert!(!rc.is_ok());
        assert!(!s.is_connected());
    }

    #[test]
    fn test_run_returns_response_without_echo_or_prompt() {
        let transport =
            ScriptedTransport::new().on_send(b"status", format!("status\r\nOK\r\n{PROMPT}"));
        let mut s = connected(transport);
        let rc = tokio_test::block_on(s.run("status")).unwrap();
        assert!(rc.is_ok());
        assert_eq!(rc.message(), "OK");
    }

    #[test]
    fn test_run_scrubs_async_message_from_response() {
        let transport = ScriptedTransport::new().on_send(
            b"status",
            format!("status\r\nWarning: ps1 missing\r\nOK\r\n{PROMPT}"),
        );
        let mut s = connected(transport);
        let rc = tokio_test::block_on(s.run("status")).unwrap();
        assert_eq!(rc.message(), "OK");
    }

    #[test]
    fn test_run_recovers_echo_buried_in_async_messages() {
        // The message lands before the echo; it must not leak into the
        // response window.
        let transport = ScriptedTransport::new().on_send(
            b"status",
            format!("Warning: ps1 missing\r\nstatus\r\nOK\r\n{PROMPT}"),
        );
        let mut s = connected(transport);
        let rc = tokio_test::block_on(s.run("status")).unwrap();
        assert_eq!(rc.message(), "OK");
    }

    #[test]
    fn test_run_rejects_embedded_newline() {
        let mut s = connected(ScriptedTransport::new());
        let err = tokio_test::block_on(s.run("status\nextra")).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_run_requires_connection() {
        let mut s = session_with(ScriptedTransport::new());
        let err = tokio_test::block_on(s.run("status")).unwrap_err();
        assert!(matches!(
            err,
            Error::Session(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_failure_pattern_marks_result_falsy() {
        let transport = ScriptedTransport::new().on_send(
            b"lun create",
            format!("lun create\r\nerror: no space\r\n{PROMPT}"),
        );
        let mut s = connected(transport);
        s.add_failure_pattern("error:");
        let rc = tokio_test::block_on(s.run("lun create")).unwrap();
        assert!(!rc.is_ok());
        assert!(rc.message().contains("no space"));
    }

    #[test]
    fn test_force_mode_answers_dialog_once() {
        let transport = ScriptedTransport::new()
            .on_send(
                b"lun remove 5",
                b"lun remove 5\r\nthis will destroy data\r\nContinue? (y/n) ".as_slice(),
            )
            .on_send(b"y", format!("\r\ndone\r\n{PROMPT}"));
        let sent = transport.sent_log();
        let mut s = connected(transport);
        let rc = tokio_test::block_on(
            s.run_with("lun remove 5", RunOptions::default().force()),
        )
        .unwrap();
        assert!(rc.is_ok());
        // AnswerAndFinish: the answer goes out exactly once and the
        // response is empty.
        assert_eq!(sent.count_containing("y\n"), 1);
        assert_eq!(rc.message(), "");
    }

    #[test]
    fn test_force_mode_returns_text_following_dialog() {
        let transport = ScriptedTransport::new()
            .on_send(
                b"lun destroy 5",
                b"lun destroy 5\r\nDestroy lun 5? [n] ".as_slice(),
            )
            .on_send(b"y", format!("\r\ndestroying\r\ndone\r\n{PROMPT}"));
        let sent = transport.sent_log();
        let mut s = connected(transport);
        let rc = tokio_test::block_on(
            s.run_with("lun destroy 5", RunOptions::default().force()),
        )
        .unwrap();
        assert!(rc.is_ok());
        // AnswerAndWait: one answer goes out, then the wait resumes and
        // only the text after the dialog comes back.
        assert_eq!(sent.count_containing("y\n"), 1);
        assert_eq!(rc.message(), "destroying\r\ndone");
        assert!(!rc.contains("Destroy lun 5?"));
    }

    #[test]
    fn test_dialog_without_force_is_returned_to_caller() {
        let transport = ScriptedTransport::new().on_send(
            b"lun remove 5",
            b"lun remove 5\r\ndestroys data\r\nContinue? (y/n) ".as_slice(),
        );
        let mut s = connected(transport);
        let rc = tokio_test::block_on(s.run("lun remove 5")).unwrap();
        assert!(rc.message().contains("Continue? (y/n)"));
    }

    #[test]
    fn test_no_wait_returns_immediately() {
        let transport = ScriptedTransport::new().on_send(b"reboot", b"reboot\r\n".as_slice());
        let mut s = connected(transport);
        let rc =
            tokio_test::block_on(s.run_with("reboot", RunOptions::default().no_wait())).unwrap();
        assert!(rc.is_ok());
    }

    #[test]
    fn test_prompt_timeout_reports_buffer() {
        let transport =
            ScriptedTransport::new().on_send(b"hang", b"hang\r\npartial output".as_slice());
        let mut s = connected(transport);
        s.set_timeout(Duration::from_millis(50));
        let err = tokio_test::block_on(s.run("hang")).unwrap_err();
        match err {
            Error::Session(SessionError::PromptNotFound { before, .. }) => {
                assert!(before.contains("partial output"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let transport = ScriptedTransport::new().eof_when_empty();
        let mut s = connected(transport);
        tokio_test::block_on(async {
            assert!(s.disconnect().await.is_ok());
            assert!(s.disconnect().await.is_ok());
            assert!(s.disconnect().await.is_ok());
        });
        assert!(!s.is_connected());
    }

    #[test]
    fn test_run_after_disconnect_fails() {
        let transport = ScriptedTransport::new().eof_when_empty();
        let mut s = connected(transport);
        tokio_test::block_on(async {
            s.disconnect().await;
            let err = s.run("status").await.unwrap_err();
            assert!(matches!(
                err,
                Error::Session(SessionError::NotConnected)
            ));
        });
    }

    #[test]
    fn test_reconnect_gives_up_after_attempt_budget() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ConnectScript::Transport(
                ScriptedTransport::new().chunk(format!("\r\n{PROMPT}").as_bytes()),
            ),
            ConnectScript::Timeout,
            ConnectScript::Timeout,
            ConnectScript::Timeout,
        ]));
        let mut s = Session::new(connector.clone(), LoginPlan::ssh(), config()).unwrap();
        tokio_test::block_on(async {
            s.connect().await.unwrap();
            let rc = s.reconnect(Duration::ZERO, None, 3).await;
            assert!(!rc.is_ok());
        });
        // One initial connect plus exactly three retry attempts.
        assert_eq!(connector.attempt_count(), 4);
    }

    #[test]
    fn test_reconnect_succeeds_within_budget() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            ConnectScript::Transport(
                ScriptedTransport::new().chunk(format!("\r\n{PROMPT}").as_bytes()),
            ),
            ConnectScript::Timeout,
            ConnectScript::Transport(
                ScriptedTransport::new().chunk(format!("back up\r\n{PROMPT}").as_bytes()),
            ),
        ]));
        let mut s = Session::new(connector, LoginPlan::ssh(), config()).unwrap();
        tokio_test::block_on(async {
            s.connect().await.unwrap();
            let rc = s.reconnect(Duration::ZERO, None, 5).await;
            assert!(rc.is_ok());
        });
        assert!(s.is_connected());
    }

    #[test]
    fn test_strict_mode_escalates_failure() {
        let transport = ScriptedTransport::new().on_send(
            b"lun create",
            format!("lun create\r\nerror: no space\r\n{PROMPT}"),
        );
        let mut s = connected(transport);
        s.add_failure_pattern("error:");
        let err = tokio_test::block_on(s.run_and_check(
            "lun create",
            RunOptions::default(),
            true,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Command(_)));
    }

    #[test]
    fn test_expect_returns_text_before_prompt() {
        let transport =
            ScriptedTransport::new().on_send(b"1", b"\r\nControl Sub Menu\r\n".as_slice());
        let mut s = connected(transport);
        tokio_test::block_on(async {
            s.send_line("1").await.unwrap();
            let before = s
                .expect(&Prompt::pattern("Control Sub Menu"), None)
                .await
                .unwrap();
            assert_eq!(before.trim(), "");
        });
    }
}
