//! Transport connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
///
/// The lab default is `Disabled`, matching the hardened flags the spawned
/// ssh client was always given (`-o StrictHostKeyChecking=no`,
/// `-o UserKnownHostsFile=/dev/null`) - appliances get reflashed and
/// re-keyed constantly.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    AcceptNew,

    /// Accept all keys without checking. For lab use.
    #[default]
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Terminal width for the PTY. Wide enough that long commands don't
    /// wrap and break echo matching.
    pub terminal_width: u32,

    /// Terminal height for the PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth: AuthMethod::None,
            timeout: Duration::from_secs(10),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication method for SSH connections.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication (for testing only).
    None,

    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

/// Configuration for a spawned CLI client (telnet, cec).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Program to spawn.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,
}

impl ProcessConfig {
    /// A telnet client pointed at `host` (and optionally a raw TCP port,
    /// used by serial console servers and some PDUs).
    pub fn telnet(host: impl Into<String>, port: Option<u16>) -> Self {
        let mut args = vec![host.into()];
        if let Some(port) = port {
            args.push(port.to_string());
        }
        Self {
            program: "telnet".to_string(),
            args,
        }
    }

    /// The vendor cec console-redirection client, attached to `shelf`
    /// over ethernet interface `iface`.
    pub fn cec(shelf: impl Into<String>, iface: impl Into<String>) -> Self {
        Self {
            program: "cec".to_string(),
            args: vec![format!("-s{}", shelf.into()), iface.into()],
        }
    }
}
