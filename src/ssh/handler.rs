//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use russh::keys::{HashAlg, PublicKey};
use tracing::{debug, warn};

use super::config::HostKeyPolicy;

/// SSH client handler for russh
///
/// Used by russh to verify the server's host key according to the
/// caller-supplied [`HostKeyPolicy`]. Keys are never persisted or prompted for.
#[derive(Debug, Clone, Default)]
pub struct SshHandler {
    policy: HostKeyPolicy,
}

impl SshHandler {
    /// Create a new SSH handler
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self { policy }
    }

    /// Whether the policy accepts this server key
    pub fn accepts(&self, key: &PublicKey) -> bool {
        match &self.policy {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Fingerprint(expected) => {
                let presented = key.fingerprint(HashAlg::Sha256).to_string();
                if &presented == expected {
                    debug!("Host key {} matches pinned fingerprint", presented);
                    true
                } else {
                    warn!(
                        "Host key mismatch: expected {}, server presented {}",
                        expected, presented
                    );
                    false
                }
            }
        }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.accepts(server_public_key))
    }
}
