//! Error types for the SSH client

use thiserror::Error;

/// Main error type for the SSH client
#[derive(Debug, Error)]
pub enum SshClientError {
    /// Transport-level connection failed (dial, resolution, refused)
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Transport-level connect did not complete in time
    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    /// The caller's cancellation signal fired before the operation completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Authentication failed (password or key rejected, no method available)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Handshake, channel or request failure reported by the protocol engine
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// An execution operation was called before a successful connect
    #[error("sshclient not connected, call connect() first")]
    NotConnected,

    /// Connect was called on a client that already holds a connection
    #[error("sshclient already connected")]
    AlreadyConnected,

    /// The client finished its life and cannot be reused
    #[error("sshclient already closed and cannot be reused")]
    AlreadyClosed,

    /// Local terminal failure (raw mode, size query)
    #[error("Terminal error: {0}")]
    Terminal(String),

    /// Malformed environment declaration
    #[error("Invalid environment declaration #{index} ({name}): {reason}")]
    InvalidEnv {
        index: usize,
        name: String,
        reason: &'static str,
    },

    /// The remote command or shell exited with a non-zero status
    #[error("Remote process exited with status {status}")]
    RemoteExit { status: u32 },

    /// The remote command or shell was terminated by a signal
    #[error("Remote process killed by signal {signal}")]
    RemoteSignal { signal: String },

    /// The session ended without reporting how the remote process exited
    #[error("Session disconnected: {0}")]
    Disconnected(String),

    /// An operation failed and the cleanup that followed failed as well
    #[error("{source}; cleanup error: {cleanup}")]
    WithCleanup {
        source: Box<SshClientError>,
        cleanup: Box<SshClientError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SshClientError
pub type Result<T> = std::result::Result<T, SshClientError>;

impl SshClientError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        SshClientError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        SshClientError::Authentication(msg.into())
    }

    /// Create a protocol error from a string
    pub fn protocol(msg: impl Into<String>) -> Self {
        SshClientError::Protocol(msg.into())
    }

    /// Create a terminal error from a string
    pub fn terminal(msg: impl Into<String>) -> Self {
        SshClientError::Terminal(msg.into())
    }

    /// Create a disconnected error from a string
    pub fn disconnected(msg: impl Into<String>) -> Self {
        SshClientError::Disconnected(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        SshClientError::Config(msg.into())
    }

    /// Create an environment validation error
    pub fn invalid_env(index: usize, name: impl Into<String>, reason: &'static str) -> Self {
        SshClientError::InvalidEnv {
            index,
            name: name.into(),
            reason,
        }
    }

    /// Attach a cleanup failure to this error, keeping `self` as the primary cause
    pub fn with_cleanup(self, cleanup: SshClientError) -> Self {
        SshClientError::WithCleanup {
            source: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// The primary error, looking through attached cleanup failures
    pub fn primary(&self) -> &SshClientError {
        match self {
            SshClientError::WithCleanup { source, .. } => source.primary(),
            other => other,
        }
    }
}

/// Combine an operation result with the result of the teardown that followed it.
///
/// The operation's error wins; a teardown error is reported on its own when
/// the operation succeeded, or attached as cleanup when both failed.
pub(crate) fn merge_teardown(result: Result<()>, teardown: Result<()>) -> Result<()> {
    match (result, teardown) {
        (Ok(()), teardown) => teardown,
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => Err(err.with_cleanup(cleanup)),
    }
}
