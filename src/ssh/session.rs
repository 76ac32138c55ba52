//! Session channel over russh
//!
//! Provides the [`RemoteSession`] implementation: standard stream plumbing,
//! PTY / shell requests, and the pump that drives a running session until
//! the remote side reports completion.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Pty};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::engine::{
    BoxedReader, BoxedWriter, PtyRequest, RemoteSession, SessionInput, Stdio, WindowSize,
};
use crate::error::{Result, SshClientError};

/// Buffer size of the in-memory stdin/stdout/stderr pipes
const PIPE_CAPACITY: usize = 64 * 1024;

/// Channel halves plus the messages that arrived while waiting for a request reply
struct ChannelState {
    reader: ChannelReadHalf,
    writer: ChannelWriteHalf<Msg>,
    pending: VecDeque<ChannelMsg>,
}

#[derive(Default)]
struct SessionIo {
    stdin: Option<BoxedReader>,
    stdout: Option<BoxedWriter>,
    stderr: Option<BoxedWriter>,
}

/// How the remote process ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exit {
    Status(u32),
    Signal(String),
}

/// Session channel backed by russh
pub struct RusshSession {
    state: Mutex<Option<ChannelState>>,
    io: Mutex<SessionIo>,
    started: AtomicBool,
    resize_tx: mpsc::UnboundedSender<WindowSize>,
    resize_rx: Mutex<Option<mpsc::UnboundedReceiver<WindowSize>>>,
}

impl RusshSession {
    pub fn new(channel: Channel<Msg>) -> Self {
        let (reader, writer) = channel.split();
        let (resize_tx, resize_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(Some(ChannelState {
                reader,
                writer,
                pending: VecDeque::new(),
            })),
            io: Mutex::new(SessionIo::default()),
            started: AtomicBool::new(false),
            resize_tx,
            resize_rx: Mutex::new(Some(resize_rx)),
        }
    }
}

fn finished() -> SshClientError {
    SshClientError::disconnected("session already finished")
}

/// Wait for the reply to a `want_reply` request, keeping unrelated messages
async fn await_reply(
    reader: &mut ChannelReadHalf,
    pending: &mut VecDeque<ChannelMsg>,
    request: &str,
) -> Result<()> {
    loop {
        match reader.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => {
                return Err(SshClientError::protocol(format!(
                    "server rejected {} request",
                    request
                )))
            }
            Some(ChannelMsg::Close) | None => {
                return Err(SshClientError::disconnected(format!(
                    "channel closed while waiting for {} reply",
                    request
                )))
            }
            Some(other) => pending.push_back(other),
        }
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn stdin_pipe(&self) -> Result<Box<dyn SessionInput>> {
        let mut io = self.io.lock().await;
        if io.stdin.is_some() {
            return Err(SshClientError::protocol("stdin already set"));
        }
        // Bytes written here are forwarded by the pump in `wait`
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        io.stdin = Some(Box::new(reader));
        Ok(Box::new(PipedInput {
            writer: Some(writer),
        }))
    }

    async fn stdout_pipe(&self) -> Result<BoxedReader> {
        let mut io = self.io.lock().await;
        if io.stdout.is_some() {
            return Err(SshClientError::protocol("stdout already set"));
        }
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        io.stdout = Some(Box::new(writer));
        Ok(Box::new(reader))
    }

    async fn stderr_pipe(&self) -> Result<BoxedReader> {
        let mut io = self.io.lock().await;
        if io.stderr.is_some() {
            return Err(SshClientError::protocol("stderr already set"));
        }
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        io.stderr = Some(Box::new(writer));
        Ok(Box::new(reader))
    }

    async fn attach(&self, stdio: Stdio) -> Result<()> {
        let mut io = self.io.lock().await;
        if io.stdin.is_some() || io.stdout.is_some() || io.stderr.is_some() {
            return Err(SshClientError::protocol("session streams already set"));
        }
        io.stdin = Some(stdio.stdin);
        io.stdout = Some(stdio.stdout);
        io.stderr = Some(stdio.stderr);
        Ok(())
    }

    async fn request_pty(&self, request: &PtyRequest) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(finished)?;

        let modes = [
            (Pty::ECHO, u32::from(request.echo)),
            (Pty::TTY_OP_ISPEED, request.speed),
            (Pty::TTY_OP_OSPEED, request.speed),
        ];
        state
            .writer
            .request_pty(
                true,
                &request.term,
                request.size.cols,
                request.size.rows,
                0,
                0,
                &modes,
            )
            .await
            .map_err(|e| SshClientError::protocol(format!("Failed to request PTY: {}", e)))?;

        await_reply(&mut state.reader, &mut state.pending, "pty-req").await?;
        debug!(
            "PTY allocated ({}, {}x{})",
            request.term, request.size.cols, request.size.rows
        );
        Ok(())
    }

    async fn window_change(&self, size: WindowSize) -> Result<()> {
        // Applied by the pump in `wait`, which owns the channel while it runs
        self.resize_tx.send(size).map_err(|_| finished())
    }

    async fn shell(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(finished)?;
        if self.started.load(Ordering::SeqCst) {
            return Err(SshClientError::protocol("shell already started"));
        }

        state
            .writer
            .request_shell(true)
            .await
            .map_err(|e| SshClientError::protocol(format!("Failed to request shell: {}", e)))?;

        await_reply(&mut state.reader, &mut state.pending, "shell").await?;
        self.started.store(true, Ordering::SeqCst);
        debug!("Remote shell started");
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(state) = self.state.lock().await.take() else {
            return Ok(());
        };

        let resizes = self.resize_rx.lock().await.take();
        let (stdin, stdout, stderr) = {
            let mut io = self.io.lock().await;
            (io.stdin.take(), io.stdout.take(), io.stderr.take())
        };

        let mut pump = Pump {
            stdout,
            stderr,
            exit: None,
        };
        let exit = pump.run(state, stdin, resizes).await;
        pump.finish().await;

        exit_result(exit)
    }
}

fn exit_result(exit: Option<Exit>) -> Result<()> {
    match exit {
        Some(Exit::Status(0)) => Ok(()),
        Some(Exit::Status(status)) => Err(SshClientError::RemoteExit { status }),
        Some(Exit::Signal(signal)) => Err(SshClientError::RemoteSignal { signal }),
        None => Err(SshClientError::disconnected(
            "session ended without exit status",
        )),
    }
}

/// Delivers remote output to the local sinks and records how the session ended
struct Pump {
    stdout: Option<BoxedWriter>,
    stderr: Option<BoxedWriter>,
    exit: Option<Exit>,
}

impl Pump {
    /// Drain the channel until it closes, forwarding input alongside.
    ///
    /// Input runs concurrently with draining: writes can wait for window
    /// space, and the window only reopens while incoming messages are read.
    async fn run(
        &mut self,
        state: ChannelState,
        stdin: Option<BoxedReader>,
        resizes: Option<mpsc::UnboundedReceiver<WindowSize>>,
    ) -> Option<Exit> {
        let ChannelState {
            mut reader,
            writer,
            pending,
        } = state;

        for msg in pending {
            if self.handle(msg).await {
                return self.exit.take();
            }
        }

        let input = forward_input(&writer, stdin, resizes);
        tokio::pin!(input);
        let mut input_done = false;

        loop {
            tokio::select! {
                _ = &mut input, if !input_done => input_done = true,
                msg = reader.wait() => match msg {
                    Some(msg) => {
                        if self.handle(msg).await {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        self.exit.take()
    }

    /// Returns `true` once the channel is closed
    async fn handle(&mut self, msg: ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => forward(&mut self.stdout, &data, "stdout").await,
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    forward(&mut self.stderr, &data, "stderr").await
                } else {
                    forward(&mut self.stdout, &data, "stdout").await
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                debug!("Remote exit status {}", exit_status);
                self.exit = Some(Exit::Status(exit_status));
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                debug!("Remote exit signal {:?}", signal_name);
                self.exit = Some(Exit::Signal(format!("{:?}", signal_name)));
            }
            ChannelMsg::Eof => debug!("Remote EOF"),
            ChannelMsg::Close => return true,
            _ => {}
        }
        false
    }

    /// Signal EOF to pipe readers
    async fn finish(&mut self) {
        for sink in [&mut self.stdout, &mut self.stderr] {
            if let Some(mut writer) = sink.take() {
                let _ = writer.shutdown().await;
            }
        }
    }
}

/// Forward local input and window changes until both sources are exhausted
async fn forward_input(
    writer: &ChannelWriteHalf<Msg>,
    mut stdin: Option<BoxedReader>,
    mut resizes: Option<mpsc::UnboundedReceiver<WindowSize>>,
) {
    let mut buf = vec![0u8; 8192];
    while stdin.is_some() || resizes.is_some() {
        tokio::select! {
            read = read_input(&mut stdin, &mut buf) => match read {
                Ok(0) => {
                    stdin = None;
                    if let Err(e) = writer.eof().await {
                        debug!("Failed to send EOF: {}", e);
                    }
                }
                Ok(n) => {
                    if let Err(e) = writer.data(&buf[..n]).await {
                        debug!("Failed to forward input: {}", e);
                        stdin = None;
                    }
                }
                Err(e) => {
                    warn!("Local input failed: {}", e);
                    stdin = None;
                }
            },
            resize = next_resize(&mut resizes) => match resize {
                Some(size) => {
                    debug!("Forwarding window change {}x{}", size.cols, size.rows);
                    if let Err(e) = writer.window_change(size.cols, size.rows, 0, 0).await {
                        debug!("Failed to send window change: {}", e);
                    }
                }
                None => resizes = None,
            },
        }
    }
}

async fn read_input(input: &mut Option<BoxedReader>, buf: &mut [u8]) -> std::io::Result<usize> {
    match input {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn next_resize(
    resizes: &mut Option<mpsc::UnboundedReceiver<WindowSize>>,
) -> Option<WindowSize> {
    match resizes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Write to an output sink, dropping it when the reader went away
async fn forward(sink: &mut Option<BoxedWriter>, data: &[u8], name: &str) {
    let Some(writer) = sink.as_mut() else {
        return;
    };
    let result = async {
        writer.write_all(data).await?;
        writer.flush().await
    }
    .await;

    if let Err(e) = result {
        debug!("Discarding remote {} from now on: {}", name, e);
        *sink = None;
    }
}

/// Standard input pipe of a [`RusshSession`]
///
/// Writes block once the pipe is full until `wait` drains it, so feed it
/// concurrently with waiting.
struct PipedInput {
    writer: Option<DuplexStream>,
}

#[async_trait]
impl SessionInput for PipedInput {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SshClientError::protocol("stdin already closed"))?;
        writer
            .write_all(data)
            .await
            .map_err(|e| SshClientError::disconnected(format!("Failed to write stdin: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer
                .shutdown()
                .await
                .map_err(|e| SshClientError::disconnected(format!("Failed to close stdin: {}", e))),
            None => Ok(()),
        }
    }
}
