//! Background operation tracking.
//!
//! Every orchestration operation (install job, archive extraction,
//! server-path scan) runs as an independent unit of work, but never as a
//! fire-and-forget task: launching one yields an [`OpHandle`] that can be
//! awaited or cancelled, and a per-key gate guarantees at most one live
//! operation per target key. A second request for a busy key is rejected with
//! [`OpError::Busy`] - callers re-invoke after the active operation settles.
//!
//! Cancellation is cooperative: operations receive a [`CancelToken`] and are
//! expected to check it at their step boundaries (between remote commands,
//! between archive entries). A cancelled operation records a terminal state
//! on its record like any other failure, so the outcome stays observable
//! through the normal status surface.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

/// Target key an operation holds exclusively while it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKey {
    Archive(i64),
    HostComponent(i64, String),
    ServerPath(i64),
    Host(i64),
}

impl std::fmt::Display for OpKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive(id) => write!(f, "archive/{id}"),
            Self::HostComponent(host, component) => write!(f, "host/{host}/{component}"),
            Self::ServerPath(id) => write!(f, "server-path/{id}"),
            Self::Host(id) => write!(f, "host/{id}"),
        }
    }
}

/// Errors from the operation layer.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("an operation for {key} is already running")]
    Busy { key: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Shared cooperative cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Err(`OpError::Cancelled`) once [`cancel`](Self::cancel) has been
    /// called; used at step boundaries.
    pub fn check(&self) -> Result<(), OpError> {
        if self.is_cancelled() {
            Err(OpError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// RAII guard for a key slot; releases the key when dropped.
pub struct OpGuard {
    key: OpKey,
    registry: Arc<Mutex<HashSet<OpKey>>>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
        debug!(key = %self.key, "operation key released");
    }
}

/// Handle to a launched operation: cancellable and awaitable.
///
/// The operation's outcome is reported through its record's status fields;
/// the handle's join result only says whether the task ran to completion.
pub struct OpHandle {
    pub key: OpKey,
    cancel: CancelToken,
    join: JoinHandle<()>,
}

impl OpHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the operation to settle.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Per-key single-flight registry for background operations.
#[derive(Default)]
pub struct OpRegistry {
    active: Arc<Mutex<HashSet<OpKey>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or fail with [`OpError::Busy`] if an operation already
    /// holds it.
    pub fn try_begin(&self, key: OpKey) -> Result<OpGuard, OpError> {
        let mut active = self.active.lock();
        if !active.insert(key.clone()) {
            return Err(OpError::Busy {
                key: key.to_string(),
            });
        }
        debug!(key = %key, "operation key claimed");
        Ok(OpGuard {
            key,
            registry: Arc::clone(&self.active),
        })
    }

    /// Claim `key` and run `work` on the blocking pool (session and archive
    /// I/O are blocking). The guard is held for the task's lifetime; the
    /// returned handle can cancel or await it.
    pub fn spawn<F>(&self, key: OpKey, work: F) -> Result<OpHandle, OpError>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let guard = self.try_begin(key.clone())?;
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let join = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work(token);
        });
        Ok(OpHandle { key, cancel, join })
    }

    pub fn is_busy(&self, key: &OpKey) -> bool {
        self.active.lock().contains(key)
    }
}
