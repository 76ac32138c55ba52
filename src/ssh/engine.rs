//! Collaborator interfaces consumed by [`SshClient`](super::client::SshClient)
//!
//! The client orchestrates connection and session lifecycles; the byte
//! transport and the SSH protocol itself sit behind these traits. The
//! production implementations are [`TcpTransport`](super::transport::TcpTransport)
//! and [`RusshEngine`](super::connection::RusshEngine).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::config::SshConfig;
use crate::error::Result;

/// Bidirectional byte stream produced by a [`Transport`]
pub trait RawStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed raw stream
pub type BoxedStream = Box<dyn RawStream>;

/// Boxed readable stream handed across the session boundary
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable stream handed across the session boundary
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u32,
    pub rows: u32,
}

impl WindowSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self { cols, rows }
    }
}

/// Pseudo-terminal allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value of `TERM` on the remote side
    pub term: String,

    /// Initial size
    pub size: WindowSize,

    /// Whether the remote line discipline echoes input
    pub echo: bool,

    /// Input and output baud rate reported to the remote tty
    pub speed: u32,
}

impl PtyRequest {
    /// An echoing `xterm` at 14400 baud, sized to `size`
    pub fn xterm(size: WindowSize) -> Self {
        Self {
            term: "xterm".to_string(),
            size,
            echo: true,
            speed: 14_400,
        }
    }
}

/// Local streams wired to a session for interactive use
pub struct Stdio {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

/// Opens the raw byte stream to a target address
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `addr` (`host:port`), giving up as soon as `cancel` fires
    async fn dial(&self, addr: &str, cancel: &CancellationToken) -> Result<BoxedStream>;
}

/// Performs the SSH handshake and authentication over a raw stream
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn handshake(
        &self,
        stream: BoxedStream,
        target: &str,
        config: &SshConfig,
    ) -> Result<Box<dyn RemoteConnection>>;
}

/// An authenticated SSH connection
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Open a new session channel
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Write side of a session's standard input
#[async_trait]
pub trait SessionInput: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Signal end-of-input to the remote process
    async fn close(&mut self) -> Result<()>;
}

/// One logical session channel over a [`RemoteConnection`]
///
/// All methods take `&self`: `window_change` is called by the resize worker
/// while the main path is blocked in `wait`.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Take the session's standard input as a pipe
    async fn stdin_pipe(&self) -> Result<Box<dyn SessionInput>>;

    /// Take the session's standard output as a pipe; EOF once the session ends
    async fn stdout_pipe(&self) -> Result<BoxedReader>;

    /// Take the session's standard error as a pipe; EOF once the session ends
    async fn stderr_pipe(&self) -> Result<BoxedReader>;

    /// Wire local streams to the session
    async fn attach(&self, stdio: Stdio) -> Result<()>;

    async fn request_pty(&self, request: &PtyRequest) -> Result<()>;

    async fn window_change(&self, size: WindowSize) -> Result<()>;

    /// Start the remote login shell
    async fn shell(&self) -> Result<()>;

    /// Block until the remote side reports completion.
    ///
    /// Returns `Ok(())` immediately when the shell never started or the
    /// session was already waited on.
    async fn wait(&self) -> Result<()>;
}
