//! Running a command without blocking the caller.
//!
//! Long-running appliance commands (parity builds, disk zeroing, firmware
//! flashes) can take minutes. A [`BackgroundCommand`] moves the session
//! into a spawned task that drives run() to completion, and hands both
//! back when awaited. Commands on one session are still strictly ordered;
//! this only frees the caller to drive *other* sessions meanwhile.

use tokio::task::JoinHandle;

use crate::error::Result;
use crate::result::ReturnCode;
use crate::session::{RunOptions, Session};

/// A command running on a session in a spawned task.
pub struct BackgroundCommand {
    command: String,
    handle: JoinHandle<(Session, Result<ReturnCode>)>,
}

impl BackgroundCommand {
    /// Start `cmd` on `session` in the background. The session moves into
    /// the task and comes back from [`wait`](Self::wait).
    pub fn spawn(mut session: Session, cmd: impl Into<String>, opts: RunOptions) -> Self {
        let command = cmd.into();
        let task_cmd = command.clone();
        let handle = tokio::spawn(async move {
            let result = session.run_with(&task_cmd, opts).await;
            (session, result)
        });
        Self { command, handle }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Whether the command has finished, without blocking.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the command and get the session back along with the
    /// command's outcome.
    pub async fn wait(self) -> (Session, Result<ReturnCode>) {
        match self.handle.await {
            Ok(done) => done,
            // The task can only fail by panicking; surface it unchanged.
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl std::fmt::Debug for BackgroundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundCommand")
            .field("command", &self.command)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LoginPlan, Prompt, Session, SessionConfig};
    use crate::transport::mock::{ConnectScript, ScriptedConnector, ScriptedTransport};
    use std::sync::Arc;
    use std::time::Duration;

    const PROMPT: &str = "SRX shelf 7> ";

    async fn connected(transport: ScriptedTransport) -> Session {
        let connector = Arc::new(ScriptedConnector::new(vec![ConnectScript::Transport(
            transport.chunk(format!("\r\n{PROMPT}").as_bytes()),
        )]));
        let mut config = SessionConfig::new("shelf7", Prompt::literal(PROMPT));
        config.timeout = Duration::from_millis(500);
        let mut session = Session::new(connector, LoginPlan::ssh(), config).unwrap();
        session.connect().await.unwrap();
        session
    }

    #[test]
    fn test_background_run_returns_session_and_result() {
        tokio_test::block_on(async {
            let transport = ScriptedTransport::new()
                .on_send(b"disk zero", format!("disk zero\r\ndone\r\n{PROMPT}"));
            let session = connected(transport).await;

            let bg = BackgroundCommand::spawn(session, "disk zero", RunOptions::default());
            assert_eq!(bg.command(), "disk zero");
            let (mut session, result) = bg.wait().await;
            assert_eq!(result.unwrap().message(), "done");

            // The returned session is still connected and usable.
            assert!(session.is_connected());
            session.disconnect().await;
        });
    }

    #[test]
    fn test_background_error_comes_back_on_wait() {
        tokio_test::block_on(async {
            // No scripted response: the prompt never comes back.
            let transport = ScriptedTransport::new();
            let mut session = connected(transport).await;
            session.set_timeout(Duration::from_millis(50));

            let bg = BackgroundCommand::spawn(session, "hang", RunOptions::default());
            let (_, result) = bg.wait().await;
            assert!(result.is_err());
        });
    }
}
