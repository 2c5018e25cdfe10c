//! Per-task submitter-side lifecycle state machine.

use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::cluster::{ClusterFuture, Submitter};
use crate::error::{FlowgridError, Result};
use crate::task::envelope::TaskEnvelope;
use crate::task::{TaskContext, TaskKind, TaskOutcome, TaskOutput, TaskRun, CMD_ERR_FILE, CMD_EXIT_FILE, CMD_OUT_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskState {
    New = 0,
    Submitted = 1,
    Running = 2,
    Completed = 3,
}

impl TaskState {
    fn from_u8(value: u8) -> TaskState {
        match value {
            0 => TaskState::New,
            1 => TaskState::Submitted,
            2 => TaskState::Running,
            _ => TaskState::Completed,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::New => write!(f, "new"),
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
        }
    }
}

/// Bridges one task's cluster future to the polling monitor. State only
/// moves forward; the atomic `fetch_max` makes concurrent polls and
/// completion callbacks unable to step a handler backwards.
pub struct TaskHandler {
    task: Arc<RwLock<TaskRun>>,
    kind: TaskKind,
    session_id: Uuid,
    state: AtomicU8,
    future: RwLock<Option<ClusterFuture>>,
    submitter: Arc<Submitter>,
    signal: mpsc::Sender<()>,
}

impl TaskHandler {
    pub fn new(
        task: TaskRun,
        session_id: Uuid,
        submitter: Arc<Submitter>,
        signal: mpsc::Sender<()>,
    ) -> Arc<Self> {
        let kind = task.kind;
        Arc::new(Self {
            task: Arc::new(RwLock::new(task)),
            kind,
            session_id,
            state: AtomicU8::new(TaskState::New as u8),
            future: RwLock::new(None),
            submitter,
            signal,
        })
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, state: TaskState) {
        self.state.fetch_max(state as u8, Ordering::AcqRel);
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn task(&self) -> Arc<RwLock<TaskRun>> {
        self.task.clone()
    }

    /// Package the task into an envelope, submit it under the load-balanced
    /// wrapper, and register the monitor wake-up on the returned future.
    /// Does not block beyond the hand-off; the submit-to-running transition
    /// is observed by polling.
    pub async fn submit(&self) -> Result<()> {
        let (envelope, task_id, name) = {
            let task = self.task.read().await;
            (
                TaskEnvelope::from_task(&task, self.session_id)?,
                task.id,
                task.name.clone(),
            )
        };

        let future = self.submitter.execute(envelope).await?;
        future.on_complete(self.signal.clone()).await;
        *self.future.write().await = Some(future);
        self.advance(TaskState::Submitted);
        tracing::info!(task_id = %task_id, name = %name, "Task submitted");
        Ok(())
    }

    /// The cluster exposes no distinct "started" event; a submitted task
    /// with a live future counts as running from the next poll on.
    pub async fn check_if_running(&self) -> bool {
        if self.state() != TaskState::Submitted {
            return false;
        }
        if self.future.read().await.is_some() {
            self.advance(TaskState::Running);
            return true;
        }
        false
    }

    /// Retrieve the result once the future has settled. Script results are
    /// additionally gated on the shared exit file: the future can be done
    /// before the worker has flushed its artifacts to shared storage, and
    /// consuming the result earlier would read a half-un-staged directory.
    pub async fn check_if_completed(&self) -> bool {
        if self.state() != TaskState::Running {
            return false;
        }
        let guard = self.future.read().await;
        let Some(future) = guard.as_ref() else {
            return false;
        };

        if !future.is_done() {
            if future.is_cancelled() {
                // cancelled before the worker produced any result
                self.finish(|task| {
                    task.error = Some(FlowgridError::Cancelled.to_string());
                })
                .await;
                return true;
            }
            return false;
        }

        if self.kind == TaskKind::Script && !future.has_failed().await {
            let work_dir = self.task.read().await.work_dir.clone();
            if !exit_file_ready(&work_dir) {
                return false;
            }
        }

        let Some(result) = future.take_result().await else {
            return false;
        };

        match result {
            Err(e) => {
                let error = e.to_string();
                self.finish(move |task| {
                    tracing::warn!(task_id = %task.id, error = %error, "Task completed with error");
                    task.error = Some(error);
                })
                .await;
            }
            Ok(TaskOutcome::Script { exit_status }) => {
                self.finish(move |task| {
                    task.exit_status = Some(exit_status);
                    task.stdout = Some(TaskOutput::File(task.work_dir.join(CMD_OUT_FILE)));
                    task.stderr = Some(TaskOutput::File(task.work_dir.join(CMD_ERR_FILE)));
                    tracing::info!(task_id = %task.id, exit_status, "Task completed");
                })
                .await;
            }
            Ok(TaskOutcome::Closure { value, context }) => {
                self.finish(move |task| {
                    task.stdout = Some(TaskOutput::Value(value));
                    task.context = Some(TaskContext::with_holder(context));
                    tracing::info!(task_id = %task.id, "Task completed");
                })
                .await;
            }
        }
        true
    }

    async fn finish(&self, apply: impl FnOnce(&mut TaskRun)) {
        {
            let mut task = self.task.write().await;
            apply(&mut task);
            task.completed_at = Some(Utc::now());
        }
        self.advance(TaskState::Completed);
    }

    /// Cancel the cluster future if one exists. Idempotent.
    pub async fn kill(&self) {
        if let Some(future) = self.future.read().await.as_ref() {
            future.cancel();
        }
    }
}

fn exit_file_ready(work_dir: &Path) -> bool {
    std::fs::metadata(work_dir.join(CMD_EXIT_FILE))
        .and_then(|meta| meta.modified())
        .map(|mtime| mtime > std::time::UNIX_EPOCH)
        .unwrap_or(false)
}
