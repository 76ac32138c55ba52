//! russh-backed protocol engine
//!
//! Runs the SSH handshake over a caller-supplied stream, authenticates, and
//! exposes the resulting connection through [`RemoteConnection`].

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tracing::{debug, error, info};

use super::config::SshConfig;
use super::engine::{BoxedStream, ProtocolEngine, RemoteConnection, RemoteSession};
use super::handler::SshHandler;
use super::session::RusshSession;
use crate::error::{Result, SshClientError};

/// Protocol engine built on russh
#[derive(Clone, Default)]
pub struct RusshEngine {
    config: Arc<client::Config>,
}

impl RusshEngine {
    pub fn new(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ProtocolEngine for RusshEngine {
    async fn handshake(
        &self,
        stream: BoxedStream,
        target: &str,
        config: &SshConfig,
    ) -> Result<Box<dyn RemoteConnection>> {
        debug!("Starting SSH handshake with {}", target);

        let handler = SshHandler::new(config.host_key_policy.clone());
        let mut handle = client::connect_stream(Arc::clone(&self.config), stream, handler)
            .await
            .map_err(|e| {
                error!("SSH handshake with {} failed: {}", target, e);
                SshClientError::protocol(format!("handshake with {} failed: {}", target, e))
            })?;

        authenticate(&mut handle, config).await?;

        info!("Successfully connected to {}@{}", config.username, target);
        Ok(Box::new(RusshConnection { handle }))
    }
}

/// Authenticate with the SSH server
async fn authenticate(handle: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
    // Try password authentication first
    if let Some(ref password) = config.password {
        debug!(
            "Attempting password authentication for user '{}'",
            config.username
        );
        let auth_result = handle
            .authenticate_password(&config.username, password)
            .await
            .map_err(|e| SshClientError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        } else {
            return Err(SshClientError::auth("Password authentication rejected"));
        }
    }

    // Try key authentication
    if let Some(ref key_content) = config.private_key {
        debug!(
            "Attempting key authentication for user '{}'",
            config.username
        );

        let key = russh::keys::decode_secret_key(key_content, config.key_passphrase.as_deref())
            .map_err(|e| SshClientError::SshKey(format!("Failed to parse private key: {}", e)))?;

        // Wrap in PrivateKeyWithHashAlg (None for non-RSA or default hash)
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = handle
            .authenticate_publickey(&config.username, key_with_alg)
            .await
            .map_err(|e| SshClientError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        } else {
            return Err(SshClientError::auth("Key authentication rejected"));
        }
    }

    Err(SshClientError::auth(
        "No authentication method available (require password or private_key)",
    ))
}

/// Authenticated russh connection
pub struct RusshConnection {
    handle: Handle<SshHandler>,
}

#[async_trait]
impl RemoteConnection for RusshConnection {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshClientError::protocol(format!("Failed to open channel: {}", e)))?;

        debug!("Opened session channel {}", channel.id());
        Ok(Box::new(RusshSession::new(channel)))
    }

    async fn close(&self) -> Result<()> {
        if self.handle.is_closed() {
            debug!("SSH connection already gone");
            return Ok(());
        }

        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| SshClientError::connection(format!("Failed to disconnect: {}", e)))?;

        info!("SSH connection closed");
        Ok(())
    }
}

impl std::fmt::Debug for RusshEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshEngine")
            .field("inactivity_timeout", &self.config.inactivity_timeout)
            .finish()
    }
}

impl std::fmt::Debug for RusshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshConnection")
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}
