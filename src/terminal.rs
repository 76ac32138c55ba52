//! Local terminal and resize notifications
//!
//! [`LocalTerminal`] covers raw mode, size queries and the local standard
//! streams; [`ResizeSource`] delivers terminal resize notifications. The
//! defaults are [`CrosstermTerminal`] and [`SignalResizeSource`] (`SIGWINCH`).

use std::io::Read;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SshClientError};
use crate::ssh::engine::{Stdio, WindowSize};

/// Opaque token describing the terminal mode before raw mode was entered
#[derive(Debug, Default)]
pub struct TerminalState {
    _private: (),
}

impl TerminalState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The local terminal an interactive session runs in
pub trait LocalTerminal: Send + Sync {
    /// Switch to raw mode, returning what is needed to undo it
    fn make_raw(&self) -> Result<TerminalState>;

    fn restore(&self, state: TerminalState) -> Result<()>;

    fn size(&self) -> Result<WindowSize>;

    /// Standard streams to wire to the remote session
    fn stdio(&self) -> Stdio;
}

/// Process terminal driven through crossterm
#[derive(Debug, Clone, Copy, Default)]
pub struct CrosstermTerminal;

impl LocalTerminal for CrosstermTerminal {
    fn make_raw(&self) -> Result<TerminalState> {
        crossterm::terminal::enable_raw_mode()
            .map_err(|e| SshClientError::terminal(format!("failed to enter raw mode: {}", e)))?;
        Ok(TerminalState::new())
    }

    fn restore(&self, _state: TerminalState) -> Result<()> {
        crossterm::terminal::disable_raw_mode()
            .map_err(|e| SshClientError::terminal(format!("failed to restore terminal: {}", e)))
    }

    fn size(&self) -> Result<WindowSize> {
        let (cols, rows) = crossterm::terminal::size()
            .map_err(|e| SshClientError::terminal(format!("failed to query size: {}", e)))?;
        Ok(WindowSize::new(cols.into(), rows.into()))
    }

    fn stdio(&self) -> Stdio {
        Stdio {
            stdin: Box::new(ThreadReader::spawn(std::io::stdin(), "sshclient-stdin")),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

const READ_CHUNK: usize = 4096;

/// Async reader fed by a detached OS thread doing blocking reads
///
/// `tokio::io::stdin` reads on the blocking pool, and the runtime waits for
/// that read on shutdown, so a session that ended while the user was idle
/// would keep the process alive until the next keypress. The thread here is
/// never joined; it exits on its next read once this reader is dropped.
pub struct ThreadReader {
    rx: mpsc::Receiver<std::io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ThreadReader {
    pub fn spawn<R>(mut reader: R, name: &str) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut buf = vec![0u8; READ_CHUNK];
                loop {
                    let chunk = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || failed {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            // The sender went down with the closure, so reads see EOF
            warn!("Failed to start {} reader thread: {}", name, e);
        }

        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl AsyncRead for ThreadReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos >= self.pending.len() {
            match self.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(chunk))) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
            }
        }

        let this = &mut *self;
        let n = buf.remaining().min(this.pending.len() - this.pos);
        buf.put_slice(&this.pending[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

/// Keeps the terminal in raw mode until restored or dropped
pub struct RawModeGuard {
    terminal: Arc<dyn LocalTerminal>,
    state: Option<TerminalState>,
}

impl RawModeGuard {
    pub fn enter(terminal: Arc<dyn LocalTerminal>) -> Result<Self> {
        let state = terminal.make_raw()?;
        Ok(Self {
            terminal,
            state: Some(state),
        })
    }

    /// Restore the previous mode, reporting failure
    pub fn restore(mut self) -> Result<()> {
        match self.state.take() {
            Some(state) => self.terminal.restore(state),
            None => Ok(()),
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if let Err(e) = self.terminal.restore(state) {
                warn!("Failed to restore terminal mode: {}", e);
            }
        }
    }
}

/// Source of terminal resize notifications
pub trait ResizeSource: Send + Sync {
    fn subscribe(&self) -> Result<ResizeSubscription>;
}

/// Queue of pending resize notifications
///
/// Holds at most one pending notification; further ones coalesce into it.
/// Firing the [`closer`](Self::closer) token makes [`next`](Self::next)
/// return `None` immediately, whatever is still queued.
pub struct ResizeSubscription {
    rx: mpsc::Receiver<()>,
    stop: CancellationToken,
}

/// Producer side of a [`ResizeSubscription`]
#[derive(Debug, Clone)]
pub struct ResizeNotifier {
    tx: mpsc::Sender<()>,
    stop: CancellationToken,
}

impl ResizeSubscription {
    pub fn channel() -> (ResizeNotifier, ResizeSubscription) {
        let (tx, rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        (
            ResizeNotifier {
                tx,
                stop: stop.clone(),
            },
            ResizeSubscription { rx, stop },
        )
    }

    /// Token that closes the subscription when cancelled
    pub fn closer(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub async fn next(&mut self) -> Option<()> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            notification = self.rx.recv() => notification,
        }
    }
}

impl ResizeNotifier {
    /// Queue a notification. Returns `false` once the subscription is closed.
    pub fn notify(&self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the subscription is closed
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.stop.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }
}

/// `SIGWINCH`-driven resize notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalResizeSource;

impl ResizeSource for SignalResizeSource {
    #[cfg(unix)]
    fn subscribe(&self) -> Result<ResizeSubscription> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut winch = signal(SignalKind::window_change())?;
        let (notifier, subscription) = ResizeSubscription::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notifier.closed() => break,
                    received = winch.recv() => {
                        if received.is_none() || !notifier.notify() {
                            break;
                        }
                    }
                }
            }
            debug!("Stopped listening for SIGWINCH");
        });

        Ok(subscription)
    }

    #[cfg(not(unix))]
    fn subscribe(&self) -> Result<ResizeSubscription> {
        // No resize signal here; the queue stays empty until closed
        let (notifier, subscription) = ResizeSubscription::channel();
        tokio::spawn(async move { notifier.closed().await });
        Ok(subscription)
    }
}
