//! One-shot teardown broadcast
//!
//! Fired exactly once when a client's life ends. Each connect attempt gets a
//! [`child`] signal: background watchers wait on it to stop without leaking,
//! and the raw connection's two possible closers (normal teardown and the
//! cancellation watcher) race on its [`fire`] so only the winner acts.
//!
//! [`child`]: ShutdownSignal::child
//! [`fire`]: ShutdownSignal::fire

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    token: CancellationToken,
}

/// Idempotent one-shot shutdown broadcast
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    ///
    /// Returns `true` only for the single call that actually fired it.
    pub fn fire(&self) -> bool {
        if self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.token.cancel();
            true
        } else {
            false
        }
    }

    /// Also `true` once a parent signal has fired
    pub fn is_fired(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the signal has fired
    pub async fn fired(&self) {
        self.inner.token.cancelled().await
    }

    /// A signal scoped to one connect attempt.
    ///
    /// It fires along with its parent, but firing it leaves the parent
    /// untouched, so a failed attempt can be wound down on its own.
    pub fn child(&self) -> ShutdownSignal {
        ShutdownSignal {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                token: self.inner.token.child_token(),
            }),
        }
    }
}
