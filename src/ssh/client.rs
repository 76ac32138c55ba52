//! High-level SSH client
//!
//! [`SshClient`] owns exactly one connection and one session to a host and
//! runs through `Unconnected -> Connected -> Closed`. After a successful
//! connect, call exactly one of [`exec_script`](SshClient::exec_script) or
//! [`shell`](SshClient::shell); both tear the connection down before
//! returning, and the client cannot be reused afterwards.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::SshConfig;
use super::connection::RusshEngine;
use super::engine::{
    BoxedReader, BoxedStream, ProtocolEngine, PtyRequest, RemoteConnection, RemoteSession,
    Transport,
};
use super::shutdown::ShutdownSignal;
use super::transport::{KillableStream, TcpTransport};
use crate::error::{merge_teardown, Result, SshClientError};
use crate::terminal::{
    CrosstermTerminal, LocalTerminal, RawModeGuard, ResizeSource, ResizeSubscription,
    SignalResizeSource,
};

/// Observable lifecycle state of an [`SshClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconnected,
    Connected,
    Closed,
}

/// Resources are tied to the state that owns them
enum State {
    Unconnected,
    Connected(Connected),
    Closed,
}

/// Resources of an established connection
struct Connected {
    connection: Box<dyn RemoteConnection>,
    session: Arc<dyn RemoteSession>,
    /// Shared with this connection's cancellation watcher
    gate: ShutdownSignal,
}

/// High-level SSH client for one host
///
/// Not meant for concurrent use: one caller drives one client through its
/// lifecycle.
pub struct SshClient {
    target: String,
    config: SshConfig,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn ProtocolEngine>,
    terminal: Arc<dyn LocalTerminal>,
    resize_source: Arc<dyn ResizeSource>,
    state: State,
    shutdown: ShutdownSignal,
}

impl SshClient {
    /// Create a client for `target` (`host:port`).
    ///
    /// Does not connect; call [`connect`](Self::connect) or
    /// [`connect_with_cancel`](Self::connect_with_cancel).
    pub fn new(target: impl Into<String>, config: SshConfig) -> Self {
        Self {
            target: target.into(),
            config,
            transport: Arc::new(TcpTransport::default()),
            engine: Arc::new(RusshEngine::default()),
            terminal: Arc::new(CrosstermTerminal),
            resize_source: Arc::new(SignalResizeSource),
            state: State::Unconnected,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Replace the transport used to dial the target
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the SSH protocol engine
    pub fn with_engine(mut self, engine: Arc<dyn ProtocolEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Replace the local terminal used by [`shell`](Self::shell)
    pub fn with_terminal(mut self, terminal: Arc<dyn LocalTerminal>) -> Self {
        self.terminal = terminal;
        self
    }

    /// Replace the source of terminal resize notifications
    pub fn with_resize_source(mut self, resize_source: Arc<dyn ResizeSource>) -> Self {
        self.resize_source = resize_source;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> LifecycleState {
        match self.state {
            State::Unconnected => LifecycleState::Unconnected,
            State::Connected(_) => LifecycleState::Connected,
            State::Closed => LifecycleState::Closed,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    /// Connect and open the session, without external cancellation.
    ///
    /// After a successful connect, the client must be finished with an
    /// execution operation or [`close`](Self::close).
    pub async fn connect(&mut self) -> Result<()> {
        self.dial(None).await
    }

    /// Connect and open the session, aborting when `cancel` fires.
    ///
    /// A connect aborted this way returns [`SshClientError::Cancelled`] and
    /// leaves the client unconnected, so it can be retried with a fresh
    /// token. Once connected, cancellation severs the raw connection at any point until the client
    /// is closed, so it also unblocks a running execution operation. It is
    /// local only: a script already sent to the host may keep running there.
    /// For `"sleep 20 && touch /tmp/foo"` cancelled after 10s, `/tmp/foo`
    /// may still appear.
    pub async fn connect_with_cancel(&mut self, cancel: CancellationToken) -> Result<()> {
        self.dial(Some(cancel)).await
    }

    async fn dial(&mut self, cancel: Option<CancellationToken>) -> Result<()> {
        match self.state {
            State::Unconnected => {}
            State::Connected(_) => return Err(SshClientError::AlreadyConnected),
            State::Closed => return Err(SshClientError::AlreadyClosed),
        }

        info!("Connecting to {}...", self.target);
        match self.establish(cancel).await {
            Ok(connected) => {
                self.state = State::Connected(connected);
                Ok(())
            }
            Err(e) => {
                if matches!(e, SshClientError::Cancelled) {
                    info!("Connect to {} cancelled", self.target);
                }
                Err(e)
            }
        }
    }

    async fn establish(&self, cancel: Option<CancellationToken>) -> Result<Connected> {
        let never = CancellationToken::new();
        let stream = self
            .transport
            .dial(&self.target, cancel.as_ref().unwrap_or(&never))
            .await?;

        let kill = CancellationToken::new();
        let stream: BoxedStream = Box::new(KillableStream::new(stream, kill.clone()));

        let gate = self.shutdown.child();
        if let Some(ref cancel) = cancel {
            spawn_cancel_watcher(cancel.clone(), gate.clone(), kill.clone());
        }

        let connection = match self.handshake(stream, cancel.as_ref()).await {
            Ok(connection) => connection,
            Err(e) => {
                // Whoever wins the gate on a cancelled attempt severs the stream
                if gate.fire() && matches!(e, SshClientError::Cancelled) {
                    kill.cancel();
                }
                return Err(e);
            }
        };

        match connection.open_session().await {
            Ok(session) => {
                debug!("Session ready on {}", self.target);
                Ok(Connected {
                    connection,
                    session: Arc::from(session),
                    gate,
                })
            }
            Err(e) => {
                gate.fire();
                warn!("Session open failed, closing connection: {}", e);
                match connection.close().await {
                    Ok(()) => Err(e),
                    Err(cleanup) => Err(e.with_cleanup(cleanup)),
                }
            }
        }
    }

    async fn handshake(
        &self,
        stream: BoxedStream,
        cancel: Option<&CancellationToken>,
    ) -> Result<Box<dyn RemoteConnection>> {
        let handshake = self.engine.handshake(stream, &self.target, &self.config);
        let Some(cancel) = cancel else {
            return handshake.await;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SshClientError::Cancelled),
            result = handshake => match result {
                Err(_) if cancel.is_cancelled() => Err(SshClientError::Cancelled),
                other => other,
            },
        }
    }

    fn session(&self) -> Result<&Arc<dyn RemoteSession>> {
        match &self.state {
            State::Connected(connected) => Ok(&connected.session),
            State::Unconnected => Err(SshClientError::NotConnected),
            State::Closed => Err(SshClientError::AlreadyClosed),
        }
    }

    /// Remote standard output of the script run by [`exec_script`](Self::exec_script).
    ///
    /// Read it concurrently with `exec_script`; the pipe has a bounded
    /// buffer and the session stalls while it is full.
    pub async fn stdout_pipe(&self) -> Result<BoxedReader> {
        self.session()?.stdout_pipe().await
    }

    /// Remote standard error, see [`stdout_pipe`](Self::stdout_pipe)
    pub async fn stderr_pipe(&self) -> Result<BoxedReader> {
        self.session()?.stderr_pipe().await
    }

    /// Take the connected resources, leaving the client Closed
    fn take_connected(&mut self) -> Result<Connected> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(connected) => Ok(connected),
            State::Unconnected => {
                self.state = State::Unconnected;
                Err(SshClientError::NotConnected)
            }
            State::Closed => Err(SshClientError::AlreadyClosed),
        }
    }

    /// Execute a shell script on the remote host.
    ///
    /// The script is fed as one block to the remote login shell's standard
    /// input, followed by a newline and EOF, so multi-line scripts behave as
    /// piped input would. A non-zero exit is reported as
    /// [`SshClientError::RemoteExit`]. The client is closed on return.
    pub async fn exec_script(&mut self, script: &str) -> Result<()> {
        let connected = self.take_connected()?;
        info!("Executing script on {} ({} bytes)", self.target, script.len());

        let result = run_script(connected.session.as_ref(), script).await;
        self.finish(connected, result).await
    }

    /// Run an interactive shell on the local terminal.
    ///
    /// The terminal is in raw mode for the duration and local resizes are
    /// forwarded to the remote PTY. The client is closed on return.
    pub async fn shell(&mut self) -> Result<()> {
        let connected = self.take_connected()?;
        info!("Starting interactive shell on {}", self.target);

        let result = self.run_shell(&connected.session).await;
        self.finish(connected, result).await
    }

    async fn run_shell(&self, session: &Arc<dyn RemoteSession>) -> Result<()> {
        let raw_mode = RawModeGuard::enter(Arc::clone(&self.terminal))?;

        let size = self.terminal.size()?;
        session.request_pty(&PtyRequest::xterm(size)).await?;
        // Before the shell starts, so no early resize is missed
        let resizes = self.resize_source.subscribe()?;
        let closer = resizes.closer();
        if let Err(e) = self.start_shell(session).await {
            closer.cancel();
            return merge_teardown(Err(e), raw_mode.restore());
        }

        let worker = spawn_resize_worker(
            Arc::clone(session),
            Arc::clone(&self.terminal),
            resizes,
        );

        let result = session.wait().await;

        closer.cancel();
        if let Err(e) = worker.await {
            warn!("Resize worker failed: {}", e);
        }

        merge_teardown(result, raw_mode.restore())
    }

    async fn start_shell(&self, session: &Arc<dyn RemoteSession>) -> Result<()> {
        session.attach(self.terminal.stdio()).await?;
        session.shell().await
    }

    /// Tear down after an execution operation and merge its result
    async fn finish(&mut self, connected: Connected, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => info!("Remote session on {} finished", self.target),
            Err(e) => debug!("Remote session on {} failed: {}", self.target, e),
        }

        let teardown = teardown(&connected).await;
        self.shutdown.fire();
        merge_teardown(result, teardown)
    }

    /// Close the session and connection.
    ///
    /// Blocks until a started session finishes (this is how a pending
    /// command's exit status is collected), then closes the connection.
    /// Idempotent: later calls return `Ok(())`. Closing alone cannot abandon
    /// a running session; use the cancellation signal for that.
    pub async fn close(&mut self) -> Result<()> {
        let result = match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(connected) => teardown(&connected).await,
            State::Unconnected | State::Closed => Ok(()),
        };
        self.shutdown.fire();
        result
    }
}

impl Drop for SshClient {
    fn drop(&mut self) {
        // Releases the cancellation watcher of a client abandoned without close()
        self.shutdown.fire();
    }
}

impl fmt::Debug for SshClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshClient")
            .field("target", &self.target)
            .field("username", &self.config.username)
            .field("state", &self.state())
            .field("shutdown", &self.shutdown.is_fired())
            .finish()
    }
}

/// Feed a script to the remote shell while waiting for it
///
/// Feeding runs alongside `wait`: a script larger than the remote window only
/// goes through while the session's output keeps being drained.
async fn run_script(session: &dyn RemoteSession, script: &str) -> Result<()> {
    let mut input = session.stdin_pipe().await?;
    session.shell().await?;

    let feed = async {
        let written = input.write_all(format!("{}\n", script).as_bytes()).await;
        // EOF even after a failed write, otherwise the remote shell never exits
        let closed = input.close().await;
        written.and(closed)
    };
    let (fed, waited) = tokio::join!(feed, session.wait());

    waited.and(fed)
}

/// Wait for the session, then close the connection
///
/// The connection is closed even when waiting fails; the wait error takes
/// precedence.
async fn teardown(connected: &Connected) -> Result<()> {
    let waited = connected.session.wait().await;
    // From here on a late cancellation has nothing left to sever
    connected.gate.fire();
    let closed = connected.connection.close().await;
    merge_teardown(waited, closed)
}

/// Sever the raw connection when `cancel` fires before the attempt's gate
fn spawn_cancel_watcher(
    cancel: CancellationToken,
    gate: ShutdownSignal,
    kill: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = gate.fired() => {
                debug!("Cancellation watcher released");
            }
            _ = cancel.cancelled() => {
                if gate.fire() {
                    info!("Cancelled, closing raw connection");
                    kill.cancel();
                } else {
                    debug!("Cancelled after teardown, nothing to close");
                }
            }
        }
    })
}

/// Forward each local resize to the remote PTY until the queue closes
fn spawn_resize_worker(
    session: Arc<dyn RemoteSession>,
    terminal: Arc<dyn LocalTerminal>,
    mut resizes: ResizeSubscription,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while resizes.next().await.is_some() {
            match terminal.size() {
                Ok(size) => {
                    if let Err(e) = session.window_change(size).await {
                        debug!("Failed to forward window change: {}", e);
                    }
                }
                Err(e) => debug!("Failed to query terminal size: {}", e),
            }
        }
        debug!("Resize worker stopped");
    })
}
