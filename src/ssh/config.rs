//! SSH authentication configuration
//!
//! Credentials and host-key acceptance handed to the protocol engine during
//! the handshake. The target address is kept separately by the client.

use std::fmt;

/// How the server's host key is accepted during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents
    #[default]
    AcceptAny,

    /// Accept only the key with this SHA-256 fingerprint (`SHA256:<base64>`)
    Fingerprint(String),
}

impl HostKeyPolicy {
    /// Pin the host key to a SHA-256 fingerprint.
    ///
    /// The `SHA256:` prefix is optional on input.
    pub fn fingerprint(fingerprint: impl AsRef<str>) -> Self {
        let fingerprint = fingerprint.as_ref().trim();
        let digest = fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint);
        HostKeyPolicy::Fingerprint(format!("SHA256:{}", digest.trim_end_matches('=')))
    }
}

/// SSH authentication configuration
#[derive(Clone)]
pub struct SshConfig {
    /// Username for authentication
    pub username: String,

    /// Password for password authentication
    pub password: Option<String>,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<String>,

    /// Passphrase protecting `private_key`
    pub key_passphrase: Option<String>,

    /// Host key acceptance policy
    pub host_key_policy: HostKeyPolicy,
}

impl SshConfig {
    /// Create a new SSH configuration with minimal required fields
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            private_key: None,
            key_passphrase: None,
            host_key_policy: HostKeyPolicy::default(),
        }
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }

    /// Set the passphrase used to decrypt the private key
    pub fn with_key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.key_passphrase = Some(passphrase.into());
        self
    }

    /// Set the host key policy
    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }
}

// Secrets stay out of logs.
impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("host_key_policy", &self.host_key_policy)
            .finish()
    }
}
