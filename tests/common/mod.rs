//! In-memory collaborators for driving `SshClient` without a network
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use sshclient::error::{Result, SshClientError};
use sshclient::ssh::engine::{
    BoxedReader, BoxedStream, ProtocolEngine, PtyRequest, RemoteConnection, RemoteSession,
    SessionInput, Stdio, Transport, WindowSize,
};
use sshclient::ssh::{SshClient, SshConfig};
use sshclient::terminal::{
    LocalTerminal, ResizeNotifier, ResizeSource, ResizeSubscription, TerminalState,
};

/// How the mock handshake behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Handshake {
    #[default]
    Succeed,
    /// Never completes
    Hang,
    /// Rejects the credentials
    Fail,
}

/// Knobs for the mock collaborators
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Number of initial dials that fail
    pub failing_dials: usize,
    /// Dials block until cancelled
    pub hang_dial: bool,
    pub handshake: Handshake,
    pub open_session_fails: bool,
    pub close_fails: bool,
    pub pty_fails: bool,
    pub raw_mode_fails: bool,
    pub subscribe_fails: bool,
    /// The remote shell exits as soon as its stdin is closed
    pub exit_on_eof: bool,
    pub exit_status: u32,
    /// Written to the stdout pipe when the remote side finishes
    pub stdout_data: Vec<u8>,
    pub terminal_size: WindowSize,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            failing_dials: 0,
            hang_dial: false,
            handshake: Handshake::Succeed,
            open_session_fails: false,
            close_fails: false,
            pty_fails: false,
            raw_mode_fails: false,
            subscribe_fails: false,
            exit_on_eof: true,
            exit_status: 0,
            stdout_data: Vec::new(),
            terminal_size: WindowSize::new(80, 24),
        }
    }
}

/// Everything the mocks observed, shared between them and the test
#[derive(Default)]
pub struct Recorder {
    pub behavior: Mutex<Behavior>,

    pub dials: AtomicUsize,
    pub handshakes: AtomicUsize,
    pub sessions_opened: AtomicUsize,
    pub connection_closes: AtomicUsize,

    /// Cancelled when the raw stream under the connection was severed
    pub wire_aborted: CancellationToken,

    pub stdin: Mutex<Vec<u8>>,
    pub stdin_closed: AtomicBool,
    pub shell_started: AtomicBool,
    pub attached: AtomicBool,
    pub pty: Mutex<Option<PtyRequest>>,
    pub window_changes: Mutex<Vec<WindowSize>>,
    pub waits: AtomicUsize,

    /// Cancel to make the remote shell exit
    pub release: CancellationToken,

    pub raw_entered: AtomicUsize,
    pub restored: AtomicUsize,

    /// Ordered log of notable calls
    pub events: Mutex<Vec<&'static str>>,
}

impl Recorder {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            ..Default::default()
        })
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }

    pub fn set_terminal_size(&self, size: WindowSize) {
        self.behavior.lock().unwrap().terminal_size = size;
    }

    pub fn record(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn stdin_text(&self) -> String {
        String::from_utf8(self.stdin.lock().unwrap().clone()).unwrap()
    }

    pub fn window_changes(&self) -> Vec<WindowSize> {
        self.window_changes.lock().unwrap().clone()
    }
}

/// Hands out in-memory streams, keeping the far ends open
pub struct MockTransport {
    recorder: Arc<Recorder>,
    peers: Mutex<Vec<DuplexStream>>,
}

impl MockTransport {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            peers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn dial(&self, addr: &str, cancel: &CancellationToken) -> Result<BoxedStream> {
        let attempt = self.recorder.dials.fetch_add(1, Ordering::SeqCst);
        let behavior = self.recorder.behavior();

        if attempt < behavior.failing_dials {
            return Err(SshClientError::connection(format!(
                "failed to connect to {}: connection refused",
                addr
            )));
        }

        if behavior.hang_dial {
            cancel.cancelled().await;
            return Err(SshClientError::Cancelled);
        }

        let (near, far) = tokio::io::duplex(4096);
        self.peers.lock().unwrap().push(far);
        Ok(Box::new(near))
    }
}

pub struct MockEngine {
    recorder: Arc<Recorder>,
}

impl MockEngine {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    async fn handshake(
        &self,
        mut stream: BoxedStream,
        _target: &str,
        _config: &SshConfig,
    ) -> Result<Box<dyn RemoteConnection>> {
        self.recorder.handshakes.fetch_add(1, Ordering::SeqCst);

        // Reads until the stream is severed underneath us
        let aborted = self.recorder.wire_aborted.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(_) => {
                        aborted.cancel();
                        break;
                    }
                }
            }
        });

        match self.recorder.behavior().handshake {
            Handshake::Succeed => Ok(Box::new(MockConnection {
                recorder: Arc::clone(&self.recorder),
            })),
            Handshake::Hang => std::future::pending().await,
            Handshake::Fail => Err(SshClientError::auth("Password authentication rejected")),
        }
    }
}

pub struct MockConnection {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>> {
        if self.recorder.behavior().open_session_fails {
            return Err(SshClientError::protocol("Failed to open channel"));
        }
        self.recorder.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            recorder: Arc::clone(&self.recorder),
            stdout: Mutex::new(None),
            waited: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.recorder.connection_closes.fetch_add(1, Ordering::SeqCst);
        self.recorder.record("close");
        if self.recorder.behavior().close_fails {
            return Err(SshClientError::connection("Failed to disconnect: broken pipe"));
        }
        Ok(())
    }
}

pub struct MockSession {
    recorder: Arc<Recorder>,
    stdout: Mutex<Option<DuplexStream>>,
    waited: AtomicBool,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn stdin_pipe(&self) -> Result<Box<dyn SessionInput>> {
        Ok(Box::new(MockInput {
            recorder: Arc::clone(&self.recorder),
        }))
    }

    async fn stdout_pipe(&self) -> Result<BoxedReader> {
        let (reader, writer) = tokio::io::duplex(4096);
        *self.stdout.lock().unwrap() = Some(writer);
        Ok(Box::new(reader))
    }

    async fn stderr_pipe(&self) -> Result<BoxedReader> {
        Ok(Box::new(tokio::io::empty()))
    }

    async fn attach(&self, _stdio: Stdio) -> Result<()> {
        self.recorder.attached.store(true, Ordering::SeqCst);
        self.recorder.record("attach");
        Ok(())
    }

    async fn request_pty(&self, request: &PtyRequest) -> Result<()> {
        self.recorder.record("pty");
        if self.recorder.behavior().pty_fails {
            return Err(SshClientError::protocol("server rejected pty-req request"));
        }
        *self.recorder.pty.lock().unwrap() = Some(request.clone());
        Ok(())
    }

    async fn window_change(&self, size: WindowSize) -> Result<()> {
        self.recorder.window_changes.lock().unwrap().push(size);
        Ok(())
    }

    async fn shell(&self) -> Result<()> {
        self.recorder.shell_started.store(true, Ordering::SeqCst);
        self.recorder.record("shell");
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        self.recorder.waits.fetch_add(1, Ordering::SeqCst);
        let started = self.recorder.shell_started.load(Ordering::SeqCst);
        if !started || self.waited.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tokio::select! {
            _ = self.recorder.release.cancelled() => {}
            _ = self.recorder.wire_aborted.cancelled() => {
                return Err(SshClientError::disconnected("session ended without exit status"));
            }
        }
        self.recorder.record("exit");

        let behavior = self.recorder.behavior();
        let stdout = self.stdout.lock().unwrap().take();
        if let Some(mut writer) = stdout {
            writer.write_all(&behavior.stdout_data).await?;
        }

        match behavior.exit_status {
            0 => Ok(()),
            status => Err(SshClientError::RemoteExit { status }),
        }
    }
}

pub struct MockInput {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl SessionInput for MockInput {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.recorder.stdin.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.recorder.stdin_closed.store(true, Ordering::SeqCst);
        if self.recorder.behavior().exit_on_eof {
            self.recorder.release.cancel();
        }
        Ok(())
    }
}

pub struct MockTerminal {
    recorder: Arc<Recorder>,
}

impl LocalTerminal for MockTerminal {
    fn make_raw(&self) -> Result<TerminalState> {
        if self.recorder.behavior().raw_mode_fails {
            return Err(SshClientError::terminal("failed to enter raw mode: not a tty"));
        }
        self.recorder.raw_entered.fetch_add(1, Ordering::SeqCst);
        self.recorder.record("raw");
        Ok(TerminalState::new())
    }

    fn restore(&self, _state: TerminalState) -> Result<()> {
        self.recorder.restored.fetch_add(1, Ordering::SeqCst);
        self.recorder.record("restore");
        Ok(())
    }

    fn size(&self) -> Result<WindowSize> {
        Ok(self.recorder.behavior().terminal_size)
    }

    fn stdio(&self) -> Stdio {
        Stdio {
            stdin: Box::new(tokio::io::empty()),
            stdout: Box::new(tokio::io::sink()),
            stderr: Box::new(tokio::io::sink()),
        }
    }
}

/// Resize source whose notifications are triggered by the test
pub struct MockResizeSource {
    recorder: Arc<Recorder>,
    notifier: Mutex<Option<ResizeNotifier>>,
}

impl MockResizeSource {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self {
            recorder,
            notifier: Mutex::new(None),
        }
    }

    /// The notifier of the current subscription, once the shell subscribed
    pub async fn notifier(&self) -> ResizeNotifier {
        loop {
            if let Some(notifier) = self.notifier.lock().unwrap().clone() {
                return notifier;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl ResizeSource for MockResizeSource {
    fn subscribe(&self) -> Result<ResizeSubscription> {
        self.recorder.record("subscribe");
        if self.recorder.behavior().subscribe_fails {
            return Err(SshClientError::terminal("resize signal unavailable"));
        }
        let (notifier, subscription) = ResizeSubscription::channel();
        *self.notifier.lock().unwrap() = Some(notifier);
        Ok(subscription)
    }
}

/// A client wired to mocks sharing one recorder
pub struct Harness {
    pub recorder: Arc<Recorder>,
    pub resize: Arc<MockResizeSource>,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        let recorder = Recorder::new(behavior);
        Self {
            recorder: Arc::clone(&recorder),
            resize: Arc::new(MockResizeSource::new(Arc::clone(&recorder))),
        }
    }

    pub fn client(&self) -> SshClient {
        let config = SshConfig::new("testuser").with_password("testpass");
        SshClient::new("mock.invalid:22", config)
            .with_transport(Arc::new(MockTransport::new(Arc::clone(&self.recorder))))
            .with_engine(Arc::new(MockEngine::new(Arc::clone(&self.recorder))))
            .with_terminal(Arc::new(MockTerminal {
                recorder: Arc::clone(&self.recorder),
            }))
            .with_resize_source(self.resize.clone())
    }
}

/// Wait until `condition` holds, panicking after a second
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
