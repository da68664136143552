//! Per-call cancellation.
//!
//! A [`CallContext`] travels with every mutating CSI call.  Waiting for a
//! per-volume lock races against [`CallContext::cancelled`], so a caller that
//! gives up never leaves a mutation behind.

use tokio::sync::watch;

/// Cloneable view of a call's cancellation state.
#[derive(Debug, Clone)]
pub struct CallContext {
    rx: watch::Receiver<bool>,
}

/// Owning side of a [`CallContext`]; cancelling it wakes every clone.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CallContext {
    /// Create a context together with the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, CancelHandle { tx })
    }

    /// A context that is never cancelled.
    pub fn background() -> Self {
        // With the sender gone `wait_for` errors out, which `cancelled`
        // treats as "never".
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation has already been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the call is cancelled; pends forever for contexts that
    /// can no longer be cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    /// Cancel the paired context and all of its clones.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// A fresh context observing this handle.
    pub fn context(&self) -> CallContext {
        CallContext {
            rx: self.tx.subscribe(),
        }
    }
}
