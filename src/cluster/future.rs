//! Asynchronous handle to a submitted remote task's outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::task::TaskOutcome;

struct FutureInner {
    done: AtomicBool,
    cancel: CancellationToken,
    result: Mutex<Option<Result<TaskOutcome>>>,
    /// Completion callbacks capture only a monitor signal sender, never the
    /// task handler, so no handler/future reference cycle can form.
    callbacks: Mutex<Vec<mpsc::Sender<()>>>,
}

/// Cloneable handle shared between the submitter, the task handler, and the
/// worker task that eventually completes it. Status reads never block on the
/// underlying execution.
#[derive(Clone)]
pub struct ClusterFuture {
    inner: Arc<FutureInner>,
}

impl ClusterFuture {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(FutureInner {
                done: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                result: Mutex::new(None),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Request cancellation. Idempotent; the worker observes the token at
    /// its next cooperative cancellation point.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.inner.done.load(Ordering::Acquire)
    }

    /// Token the executing worker watches for cooperative cancellation.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// True when the future completed with an error result.
    pub async fn has_failed(&self) -> bool {
        matches!(&*self.inner.result.lock().await, Some(Err(_)))
    }

    /// Consume the completed result, if any.
    pub async fn take_result(&self) -> Option<Result<TaskOutcome>> {
        self.inner.result.lock().await.take()
    }

    /// Register a completion signal. Fires immediately when the future is
    /// already done.
    pub async fn on_complete(&self, signal: mpsc::Sender<()>) {
        if self.is_done() {
            let _ = signal.try_send(());
            return;
        }
        self.inner.callbacks.lock().await.push(signal);
    }

    /// Install the result and wake every registered listener.
    pub(crate) async fn complete(&self, result: Result<TaskOutcome>) {
        *self.inner.result.lock().await = Some(result);
        self.inner.done.store(true, Ordering::Release);
        for signal in self.inner.callbacks.lock().await.drain(..) {
            let _ = signal.try_send(());
        }
    }
}

impl Default for ClusterFuture {
    fn default() -> Self {
        Self::new()
    }
}
