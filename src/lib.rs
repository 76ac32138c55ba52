//! sshclient - A high-level SSH client for scripted and interactive sessions
//!
//! This crate manages a single SSH connection to one host and exposes two
//! execution modes on it: feeding a shell script to the remote login shell,
//! or running an interactive shell on the local terminal with window-size
//! forwarding. Teardown is guaranteed on every path, and connecting can be
//! aborted through a cancellation token.
//!
//! # Features
//!
//! - Password and key-based authentication, optional host key pinning
//! - Cancellable connect that also unblocks a running session
//! - Script execution with remote exit status reporting
//! - Interactive shell with raw mode and `SIGWINCH` forwarding
//! - Safe environment injection via an exported shell prologue
//!
//! # Example Usage (Library)
//!
//! ```no_run
//! use sshclient::{add_env, SshClient, SshConfig};
//!
//! # async fn run() -> sshclient::Result<()> {
//! let config = SshConfig::new("admin").with_password("secret");
//! let mut client = SshClient::new("192.168.1.100:22", config);
//!
//! client.connect().await?;
//! let script = add_env("echo \"$GREETING\"", &["GREETING=hello world"])?;
//! client.exec_script(&script).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! sshclient --host=192.168.1.100 --user=admin --password=secret --command='uname -a'
//! ```

pub mod config;
pub mod error;
pub mod ssh;
pub mod terminal;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{Result, SshClientError};
pub use ssh::{add_env, HostKeyPolicy, LifecycleState, SshClient, SshConfig};
pub use terminal::{CrosstermTerminal, LocalTerminal, ResizeSource, SignalResizeSource};
