//! SSH connection and session management
//!
//! [`SshClient`] drives one connection and one session through its
//! lifecycle. The wire protocol, the byte transport and the environment
//! prologue are provided by the submodules.

pub mod client;
pub mod config;
pub mod connection;
pub mod engine;
pub mod env;
pub mod handler;
pub mod session;
pub mod shutdown;
pub mod transport;

// Re-exports
pub use client::{LifecycleState, SshClient};
pub use config::{HostKeyPolicy, SshConfig};
pub use connection::{RusshConnection, RusshEngine};
pub use engine::{
    BoxedReader, BoxedStream, BoxedWriter, ProtocolEngine, PtyRequest, RemoteConnection,
    RemoteSession, SessionInput, Stdio, Transport, WindowSize,
};
pub use env::add_env;
pub use handler::SshHandler;
pub use session::RusshSession;
pub use shutdown::ShutdownSignal;
pub use transport::{KillableStream, TcpTransport};
