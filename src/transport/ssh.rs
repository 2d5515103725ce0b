//! SSH transport implementation using russh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::{Connector, Transport};
use crate::error::TransportError;

/// SSH transport wrapping a russh PTY channel.
pub struct SshTransport {
    session: Handle<SshHandler>,
    channel: Channel<Msg>,
    open: bool,
}

impl SshTransport {
    /// Connect, authenticate, and open a shell on a PTY channel.
    pub async fn connect(config: &SshConfig) -> Result<Self, TransportError> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
        };

        debug!("ssh {}@{}", config.username, config.socket_addr());
        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(TransportError::Ssh)?;

        Self::authenticate(&mut session, config).await?;

        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                config.terminal_width,
                config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(Self {
            session,
            channel,
            open: true,
        })
    }

    async fn authenticate(
        session: &mut Handle<SshHandler>,
        config: &SshConfig,
    ) -> Result<(), TransportError> {
        let success = match &config.auth {
            AuthMethod::None => session
                .authenticate_none(&config.username)
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::Password(password) => session
                .authenticate_password(&config.username, password.expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
            AuthMethod::PrivateKey { path, passphrase } => {
                let key = load_secret_key(path, passphrase.as_ref().map(|p| p.expose_secret()))
                    .map_err(|e| {
                        TransportError::Io(std::io::Error::other(format!("ssh key: {e}")))
                    })?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        &config.username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Bytes, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        loop {
            let msg = tokio::time::timeout(timeout, self.channel.wait())
                .await
                .map_err(|_| TransportError::Timeout(timeout))?;

            match msg {
                Some(ChannelMsg::Data { data }) => return Ok(Bytes::copy_from_slice(&data)),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(Bytes::copy_from_slice(&data))
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    self.open = false;
                    return Err(TransportError::Eof);
                }
                // Window adjusts, exit statuses and the like
                Some(_) => continue,
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.channel.data(data).await.map_err(TransportError::Ssh)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        if let Err(e) = self.channel.eof().await {
            debug!("channel eof on close: {e}");
        }
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// Connector recreating an [`SshTransport`] for each connect attempt.
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, timeout: Duration) -> Result<Box<dyn Transport>, TransportError> {
        let mut config = self.config.clone();
        config.timeout = timeout;
        Ok(Box::new(SshTransport::connect(&config).await?))
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<std::path::PathBuf>,
}

impl SshHandler {
    fn check_known_hosts(&self, pubkey: &PublicKey) -> Result<bool, russh::keys::Error> {
        if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> Result<(), russh::keys::Error> {
        if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("failed to save host key for {}: {e}", self.host);
                    }
                    Ok(true)
                }
                Err(e) => {
                    warn!("host key check for {} failed: {e}", self.host);
                    Ok(false)
                }
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    warn!("unknown host key for {}", self.host);
                    Ok(false)
                }
                Err(e) => {
                    warn!("host key check for {} failed: {e}", self.host);
                    Ok(false)
                }
            },
        }
    }
}
