//! Session construction.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::Result;
use crate::transport::{
    AuthMethod, Connector, ProcessConfig, ProcessConnector, SshConfig, SshConnector,
};

use super::login::LoginPlan;
use super::{Prompt, Session, SessionConfig};

enum Endpoint {
    Ssh { host: String },
    Telnet { host: String },
    Cec { shelf: String, iface: String },
}

/// Builder assembling a [`Session`] from an endpoint and its credentials.
///
/// ```no_run
/// use otto::{Prompt, SessionBuilder};
///
/// # async fn demo() -> otto::Result<()> {
/// let mut shelf = SessionBuilder::ssh("srx-7")
///     .username("admin")
///     .password("admin")
///     .prompt(Prompt::pattern(r"SRX shelf \d+> "))
///     .build()?;
/// shelf.connect().await?;
/// let status = shelf.run("sos").await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    endpoint: Endpoint,
    port: Option<u16>,
    username: Option<String>,
    password: Option<SecretString>,
    private_key: Option<(PathBuf, Option<SecretString>)>,
    prompt: Prompt,
    timeout: Duration,
    failure_patterns: Vec<String>,
    async_messages: Vec<String>,
}

impl SessionBuilder {
    fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            port: None,
            username: None,
            password: None,
            private_key: None,
            prompt: Prompt::pattern(r"[>#\$] $"),
            timeout: Duration::from_secs(10),
            failure_patterns: Vec::new(),
            async_messages: Vec::new(),
        }
    }

    /// A native SSH session to `host`.
    pub fn ssh(host: impl Into<String>) -> Self {
        Self::new(Endpoint::Ssh { host: host.into() })
    }

    /// A telnet session to `host`, driven through a spawned telnet client.
    pub fn telnet(host: impl Into<String>) -> Self {
        Self::new(Endpoint::Telnet { host: host.into() })
    }

    /// A console session to shelf `shelf` over ethernet interface `iface`,
    /// driven through the vendor cec client.
    pub fn cec(shelf: impl Into<String>, iface: impl Into<String>) -> Self {
        Self::new(Endpoint::Cec {
            shelf: shelf.into(),
            iface: iface.into(),
        })
    }

    /// Override the port (ssh defaults to 22; telnet PDU serial consoles
    /// often listen on high raw-TCP ports).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into().into());
        self
    }

    /// Authenticate SSH with a private key file instead of a password.
    pub fn private_key(
        mut self,
        path: impl Into<PathBuf>,
        passphrase: Option<SecretString>,
    ) -> Self {
        self.private_key = Some((path.into(), passphrase));
        self
    }

    /// The prompt ending every command response. Defaults to a generic
    /// shell-prompt pattern; set it for anything real.
    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Default timeout for connect and each run() wait.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Treat responses containing `pattern` as command failures.
    pub fn failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.failure_patterns.push(pattern.into());
        self
    }

    /// Extend the async-message table with an extra pattern.
    pub fn async_message(mut self, pattern: impl Into<String>) -> Self {
        self.async_messages.push(pattern.into());
        self
    }

    pub fn build(self) -> Result<Session> {
        let (connector, plan, host): (Arc<dyn Connector>, LoginPlan, String) = match self.endpoint
        {
            Endpoint::Ssh { host } => {
                let mut config =
                    SshConfig::new(&host, self.username.clone().unwrap_or_default());
                if let Some(port) = self.port {
                    config.port = port;
                }
                config.timeout = self.timeout;
                config.auth = match (&self.private_key, &self.password) {
                    (Some((path, passphrase)), _) => AuthMethod::PrivateKey {
                        path: path.clone(),
                        passphrase: passphrase.clone(),
                    },
                    (None, Some(password)) => AuthMethod::Password(password.clone()),
                    (None, None) => AuthMethod::None,
                };
                (Arc::new(SshConnector::new(config)), LoginPlan::ssh(), host)
            }
            Endpoint::Telnet { host } => {
                let config = ProcessConfig::telnet(&host, self.port);
                (
                    Arc::new(ProcessConnector::new(config)),
                    LoginPlan::telnet(),
                    host,
                )
            }
            Endpoint::Cec { shelf, iface } => {
                let config = ProcessConfig::cec(&shelf, &iface);
                (
                    Arc::new(ProcessConnector::new(config)),
                    LoginPlan::cec(),
                    shelf,
                )
            }
        };

        let mut config = SessionConfig::new(host, self.prompt);
        config.username = self.username;
        config.credential = self.password;
        config.timeout = self.timeout;

        let mut session = Session::new(connector, plan, config)?;
        for pattern in self.failure_patterns {
            session.add_failure_pattern(pattern);
        }
        for pattern in &self.async_messages {
            session.add_async_message(pattern)?;
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_builder() {
        let session = SessionBuilder::ssh("srx-7")
            .username("admin")
            .password("admin")
            .prompt(Prompt::pattern(r"SRX shelf \d+> "))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(session.host(), "srx-7");
        assert_eq!(session.timeout(), Duration::from_secs(30));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_cec_builder() {
        let session = SessionBuilder::cec("7", "eth0")
            .prompt(Prompt::literal(">>> "))
            .build()
            .unwrap();
        assert_eq!(session.host(), "7");
    }

    #[test]
    fn test_bad_prompt_pattern_rejected() {
        let err = SessionBuilder::telnet("pdu1")
            .prompt(Prompt::pattern(r"unclosed ["))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn test_bad_async_pattern_rejected() {
        let err = SessionBuilder::ssh("srx-7")
            .async_message(r"bad (group")
            .build();
        assert!(err.is_err());
    }
}
