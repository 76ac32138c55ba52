//! Transport layer
//!
//! [`TcpTransport`] dials the raw TCP stream. [`KillableStream`] wraps any
//! raw stream so that a background task can sever it without owning it: once
//! the kill token fires, every pending and future read or write fails.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, error};

use super::engine::{BoxedStream, Transport};
use crate::config::DEFAULT_CONNECT_TIMEOUT_MS;
use crate::error::{Result, SshClientError};

/// Plain TCP transport with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self, addr: &str, cancel: &CancellationToken) -> Result<BoxedStream> {
        debug!("Dialing {}...", addr);

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Dial to {} cancelled", addr);
                return Err(SshClientError::Cancelled);
            }
            result = timeout(self.connect_timeout, TcpStream::connect(addr)) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    error!("TCP connection to {} failed: {}", addr, e);
                    return Err(SshClientError::connection(format!(
                        "failed to connect to {}: {}",
                        addr, e
                    )));
                }
                Err(_) => {
                    let millis = self.connect_timeout.as_millis() as u64;
                    error!("TCP connection to {} timed out after {}ms", addr, millis);
                    return Err(SshClientError::Timeout(millis));
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        Ok(Box::new(stream))
    }
}

/// Raw stream that can be severed through a [`CancellationToken`]
///
/// Read and write sides each hold their own wait future so a pending read is
/// woken by the kill even while writes are polled from another task.
pub struct KillableStream<S> {
    inner: S,
    read_kill: Pin<Box<WaitForCancellationFutureOwned>>,
    write_kill: Pin<Box<WaitForCancellationFutureOwned>>,
    killed: bool,
}

impl<S> KillableStream<S> {
    pub fn new(inner: S, kill: CancellationToken) -> Self {
        Self {
            inner,
            read_kill: Box::pin(kill.clone().cancelled_owned()),
            write_kill: Box::pin(kill.cancelled_owned()),
            killed: false,
        }
    }

    fn poll_read_killed(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.killed && self.read_kill.as_mut().poll(cx).is_ready() {
            self.killed = true;
        }
        self.killed
    }

    fn poll_write_killed(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.killed && self.write_kill.as_mut().poll(cx).is_ready() {
            self.killed = true;
        }
        self.killed
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed by cancellation")
}

impl<S: AsyncRead + Unpin> AsyncRead for KillableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_read_killed(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for KillableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.poll_write_killed(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_write_killed(cx) {
            return Poll::Ready(Err(aborted()));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.poll_write_killed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
