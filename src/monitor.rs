//! Polling monitor driving handler state checks.
//!
//! Runs on one task at the configured granularity. Future-completion
//! callbacks send on the signal channel to wake the loop early; the monitor
//! keeps its own sender alive so the channel never closes under it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::handler::{TaskHandler, TaskState};

const SIGNAL_BUFFER: usize = 64;

pub struct TaskMonitor {
    poll_interval: Duration,
    handlers: RwLock<Vec<Arc<TaskHandler>>>,
    signal_tx: mpsc::Sender<()>,
    signal_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl TaskMonitor {
    pub fn new(poll_interval_ms: u64) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        Arc::new(Self {
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            handlers: RwLock::new(Vec::new()),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
        })
    }

    /// Sender handed to future-completion callbacks.
    pub fn signal_sender(&self) -> mpsc::Sender<()> {
        self.signal_tx.clone()
    }

    pub async fn register(&self, handler: Arc<TaskHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Number of handlers not yet completed.
    pub async fn pending(&self) -> usize {
        self.handlers
            .read()
            .await
            .iter()
            .filter(|h| h.state() != TaskState::Completed)
            .count()
    }

    /// One pass over all registered handlers; completed ones are dropped
    /// from the set.
    pub async fn poll_once(&self) {
        let handlers = self.handlers.read().await.clone();
        let mut finished = 0usize;
        for handler in handlers {
            if handler.check_if_running().await {
                tracing::debug!(state = %handler.state(), "Task handler advanced");
            }
            if handler.check_if_completed().await {
                finished += 1;
            }
        }
        if finished > 0 {
            self.handlers
                .write()
                .await
                .retain(|h| h.state() != TaskState::Completed);
        }
    }

    /// Poll until the shutdown token fires. Completion signals wake the
    /// loop ahead of the next tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut signal_rx = match self.signal_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                tracing::error!("Task monitor started twice");
                return;
            }
        };

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = signal_rx.recv() => {}
            }
            self.poll_once().await;
        }
        tracing::info!("Task monitor stopped");
    }
}
