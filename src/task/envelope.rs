//! The remote task envelope: the serialized, portable unit shipped to a
//! worker, and its stage -> execute -> un-stage lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::LocalCache;
use crate::codec;
use crate::error::{FlowgridError, Result};
use crate::task::closure::{ClosureSpec, SessionRegistry};
use crate::task::script::{BashWrapper, ScriptSpec, WrapperBuilder};
use crate::task::{
    TaskAttrs, TaskKind, TaskOutcome, TaskRun, CMD_ERR_FILE, CMD_EXIT_FILE, CMD_OUT_FILE,
    CMD_TRACE_FILE,
};

/// Worker-process services an envelope executes against. Injected rather
/// than global so tests can substitute per-test directories and registries.
pub struct WorkerContext {
    pub cache: Arc<LocalCache>,
    pub sessions: Arc<SessionRegistry>,
    pub wrapper: Arc<dyn WrapperBuilder>,
}

impl WorkerContext {
    pub fn new(cache: Arc<LocalCache>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            cache,
            sessions,
            wrapper: Arc::new(BashWrapper),
        }
    }

    pub fn with_wrapper(mut self, wrapper: Arc<dyn WrapperBuilder>) -> Self {
        self.wrapper = wrapper;
        self
    }
}

/// Kind-specific wire payload of an envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskSpec {
    Script(ScriptSpec),
    Closure(ClosureSpec),
}

/// A task packaged for execution on a foreign node. Immutable once built on
/// the submitter; only the attribute blob travels, and the worker
/// reconstitutes the live attribute set from it on first access.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskEnvelope {
    session_id: Uuid,
    payload: Vec<u8>,
    spec: TaskSpec,
    #[serde(skip)]
    attrs: Option<TaskAttrs>,
}

impl TaskEnvelope {
    pub fn from_task(task: &TaskRun, session_id: Uuid) -> Result<Self> {
        let attrs = task.attrs();
        let payload = codec::encode(&attrs)?;

        let spec = match task.kind {
            TaskKind::Script => TaskSpec::Script(ScriptSpec {
                shell: task.shell.clone(),
                container: task.container.clone(),
                executable_container: task.executable_container,
                // private copy: parallel submissions sharing a processor
                // must not see mutations through the envelope
                environment: task.env.clone(),
                stdin: task.stdin.clone(),
                script: task.script.clone(),
            }),
            TaskKind::Closure => {
                let code = task.code.clone().ok_or_else(|| {
                    FlowgridError::Internal(format!("closure task '{}' has no code payload", task.name))
                })?;
                let delegate = task.delegate.clone().ok_or_else(|| {
                    FlowgridError::Internal(format!(
                        "closure task '{}' has no delegate payload",
                        task.name
                    ))
                })?;
                TaskSpec::Closure(ClosureSpec { code, delegate })
            }
        };

        Ok(Self {
            session_id,
            payload,
            spec,
            attrs: Some(attrs),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Decode the attribute blob unless the live set is already present.
    fn hydrate(&mut self) -> Result<&TaskAttrs> {
        if self.attrs.is_none() {
            self.attrs = Some(codec::decode(&self.payload)?);
        }
        self.attrs
            .as_ref()
            .ok_or_else(|| FlowgridError::Internal("envelope attributes unavailable".to_string()))
    }

    /// Worker-side entry point: hydrate, stage, execute, un-stage. Every
    /// failure is wrapped with the task name and returned as the job result.
    pub async fn call(
        &mut self,
        worker: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        match self.run(worker, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let task = self
                    .attrs
                    .as_ref()
                    .map(|a| a.name.as_str())
                    .unwrap_or("<undecoded>");
                Err(e.into_process_error(task))
            }
        }
    }

    async fn run(
        &mut self,
        worker: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let attrs = self.hydrate()?.clone();

        let scratch = self.stage(&attrs, worker).await?;
        tracing::debug!(task = %attrs.name, scratch = %scratch.display(), "Task staged");

        let outcome = self.execute0(&attrs, &scratch, worker, cancel).await;
        // stage completed, so un-staging runs on the failure path too
        let unstaged = self.unstage(&attrs, &scratch).await;

        let outcome = outcome?;
        unstaged?;
        Ok(outcome)
    }

    /// Create a fresh scratch dir and symlink every input from its cache
    /// path. A failure mid-staging removes the partial scratch directory.
    async fn stage(&self, attrs: &TaskAttrs, worker: &WorkerContext) -> Result<PathBuf> {
        let scratch = worker.cache.create_scratch_dir().await?;
        if let Err(e) = self.stage_inputs(attrs, &scratch, worker).await {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(e);
        }
        Ok(scratch)
    }

    async fn stage_inputs(
        &self,
        attrs: &TaskAttrs,
        scratch: &Path,
        worker: &WorkerContext,
    ) -> Result<()> {
        for (name, source) in &attrs.input_files {
            let cached = worker.cache.cache_path(self.session_id, source).await?;
            let link = scratch.join(name);
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // symlink, never copy: identical inputs across sibling tasks on
            // this worker share a single on-disk file
            tokio::fs::symlink(&cached, &link).await?;
        }
        Ok(())
    }

    async fn execute0(
        &self,
        attrs: &TaskAttrs,
        scratch: &Path,
        worker: &WorkerContext,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let session_id = self.session_id;
        match &self.spec {
            TaskSpec::Script(spec) => {
                let exit_status = spec
                    .run(&attrs.name, scratch, worker.wrapper.as_ref(), cancel)
                    .await?;
                Ok(TaskOutcome::Script { exit_status })
            }
            TaskSpec::Closure(spec) => {
                let out = spec.run(session_id, &worker.sessions, cancel).await?;
                Ok(TaskOutcome::Closure {
                    value: out.value,
                    context: out.context,
                })
            }
        }
    }

    /// Copy declared outputs from scratch to the target dir, preserving
    /// scratch-relative paths. Unmatched patterns and per-file copy failures
    /// are logged, not fatal; script tasks additionally publish their
    /// artifact files to the shared work dir.
    async fn unstage(&self, attrs: &TaskAttrs, scratch: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&attrs.target_dir).await?;

        let entries = walk_scratch(scratch)?;
        for pattern in &attrs.output_files {
            let compiled = glob::Pattern::new(pattern).map_err(|e| {
                FlowgridError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                }
            })?;
            // recursive patterns collect regular files only; flat patterns
            // accept any entry, directories included
            let files_only = pattern.contains("**");

            let mut matched = 0usize;
            for entry in &entries {
                if files_only && !entry.is_file {
                    continue;
                }
                if !compiled.matches_path(&entry.rel) {
                    continue;
                }
                matched += 1;
                let src = scratch.join(&entry.rel);
                let dest = attrs.target_dir.join(&entry.rel);
                if let Err(e) = copy_entry(&src, &dest, entry.is_file).await {
                    tracing::warn!(
                        task = %attrs.name,
                        file = %entry.rel.display(),
                        error = %e,
                        "Failed to copy output file"
                    );
                }
            }
            if matched == 0 {
                tracing::debug!(task = %attrs.name, pattern = %pattern, "No outputs matched pattern");
            }
        }

        if let TaskSpec::Script(_) = &self.spec {
            self.copy_script_artifacts(attrs, scratch).await?;
        }
        Ok(())
    }

    /// Publish the script artifact files to the shared work dir. The exit
    /// and stdout files are required; stderr and trace are optional.
    async fn copy_script_artifacts(&self, attrs: &TaskAttrs, scratch: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&attrs.work_dir).await?;
        let artifacts = [
            (CMD_EXIT_FILE, true),
            (CMD_OUT_FILE, true),
            (CMD_ERR_FILE, false),
            (CMD_TRACE_FILE, false),
        ];
        for (name, required) in artifacts {
            let src = scratch.join(name);
            match tokio::fs::copy(&src, attrs.work_dir.join(name)).await {
                Ok(_) => {}
                Err(_) if !required => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(FlowgridError::MissingArtifact(src));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

struct ScratchEntry {
    rel: PathBuf,
    is_file: bool,
}

/// All entries under `scratch` as scratch-relative paths, sorted for
/// deterministic un-staging order.
fn walk_scratch(scratch: &Path) -> Result<Vec<ScratchEntry>> {
    let mut entries = Vec::new();
    collect_entries(scratch, scratch, &mut entries)?;
    entries.sort_by(|a, b| a.rel.cmp(&b.rel));
    Ok(entries)
}

fn collect_entries(root: &Path, dir: &Path, out: &mut Vec<ScratchEntry>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map_err(|_| FlowgridError::Internal(format!("entry escaped scratch: {}", path.display())))?
            .to_path_buf();
        let meta = std::fs::metadata(&path)?;
        out.push(ScratchEntry {
            rel,
            is_file: meta.is_file(),
        });
        if meta.is_dir() {
            collect_entries(root, &path, out)?;
        }
    }
    Ok(())
}

async fn copy_entry(src: &Path, dest: &Path, is_file: bool) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if is_file {
        tokio::fs::copy(src, dest).await?;
    } else {
        tokio::fs::create_dir_all(dest).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::task::TaskRun;

    fn worker(root: &Path) -> WorkerContext {
        WorkerContext::new(
            Arc::new(LocalCache::new(root).unwrap()),
            Arc::new(SessionRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_hydrate_after_wire_round_trip() {
        let task = TaskRun::script("t1", "/w", "/t", "true").with_input("in.txt", "/shared/abc");
        let envelope = TaskEnvelope::from_task(&task, Uuid::new_v4()).unwrap();

        // live attribute set is discarded from the wire representation
        let bytes = codec::encode(&envelope).unwrap();
        let mut shipped: TaskEnvelope = codec::decode(&bytes).unwrap();
        assert!(shipped.attrs.is_none());

        let attrs = shipped.hydrate().unwrap();
        assert_eq!(attrs.name, "t1");
        assert_eq!(
            attrs.input_files.get("in.txt"),
            Some(&PathBuf::from("/shared/abc"))
        );
    }

    #[tokio::test]
    async fn test_stage_failure_leaves_no_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let worker = worker(root.path());
        let session = Uuid::new_v4();

        let task = TaskRun::script("t", "/w", "/t", "true")
            .with_input("in.txt", root.path().join("does-not-exist"));
        let mut envelope = TaskEnvelope::from_task(&task, session).unwrap();

        let result = envelope.call(&worker, &CancellationToken::new()).await;
        assert!(result.is_err());

        let scratch_parent = root.path().join("scratch");
        let leftover = std::fs::read_dir(&scratch_parent).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_failed_execution_is_wrapped_with_task_name() {
        let root = tempfile::tempdir().unwrap();
        let worker = worker(root.path());

        // closure task against an unbound session fails in execute0
        let task = TaskRun::closure(
            "broken",
            root.path().join("work"),
            root.path().join("target"),
            &crate::task::closure::OperatorCall::new("x", serde_json::Value::Null),
            &crate::task::TaskContext::new(),
        )
        .unwrap();
        let mut envelope = TaskEnvelope::from_task(&task, Uuid::new_v4()).unwrap();

        let err = envelope
            .call(&worker, &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            FlowgridError::ProcessExecution { task, .. } => assert_eq!(task, "broken"),
            other => panic!("expected ProcessExecution, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_output_pattern_is_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let worker = worker(root.path());

        let task = TaskRun::script(
            "t",
            root.path().join("work"),
            root.path().join("target"),
            "true",
        )
        .with_output_pattern("missing-*.txt");
        let mut envelope = TaskEnvelope::from_task(&task, Uuid::new_v4()).unwrap();

        let outcome = envelope
            .call(&worker, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, TaskOutcome::Script { exit_status: 0 }));
    }
}
