//! Task model: the abstract task description, its on-the-wire attribute set,
//! and the remote execution envelope.
//!
//! # Components
//!
//! - [`TaskRun`]: submitter-side task description, mutated by the task
//!   handler on completion
//! - [`envelope::TaskEnvelope`]: the portable stage/execute/un-stage unit
//!   shipped to a worker
//! - [`script`]: shell-script task kind (subprocess, exit status)
//! - [`closure`]: serialized-operator task kind (value + mutated context)

pub mod closure;
pub mod envelope;
pub mod script;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::codec;
use crate::error::Result;
pub use closure::TaskContext;
use closure::OperatorCall;

/// Exit-status file; its presence with a non-zero mtime signals that
/// un-staging to the shared work dir is complete.
pub const CMD_EXIT_FILE: &str = ".command.exit";
pub const CMD_OUT_FILE: &str = ".command.out";
pub const CMD_ERR_FILE: &str = ".command.err";
pub const CMD_TRACE_FILE: &str = ".command.trace";
pub const CMD_SCRIPT_FILE: &str = ".command.sh";
pub const CMD_RUN_FILE: &str = ".command.run";
pub const CMD_IN_FILE: &str = ".command.in";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Script,
    Closure,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Script => write!(f, "script"),
            TaskKind::Closure => write!(f, "closure"),
        }
    }
}

/// The attribute set shipped inside the envelope's payload blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttrs {
    pub task_id: Uuid,
    pub name: String,
    pub work_dir: PathBuf,
    pub target_dir: PathBuf,
    /// Logical name in scratch -> source path on shared storage.
    pub input_files: HashMap<String, PathBuf>,
    /// Patterns matched against scratch-relative paths during un-staging.
    pub output_files: Vec<String>,
}

/// Where a completed task's standard streams ended up: a file on shared
/// storage for script tasks, an in-memory value for closure tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    File(PathBuf),
    Value(Value),
}

impl TaskOutput {
    pub fn as_path(&self) -> Option<&PathBuf> {
        match self {
            TaskOutput::File(path) => Some(path),
            TaskOutput::Value(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            TaskOutput::File(_) => None,
            TaskOutput::Value(value) => Some(value),
        }
    }
}

/// Typed result produced by a remote envelope execution.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Script {
        exit_status: i32,
    },
    Closure {
        value: Value,
        context: HashMap<String, Value>,
    },
}

/// A workflow task as handed to the executor. Descriptive fields are set by
/// the engine before submission; result fields are filled in by the task
/// handler on completion.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub id: Uuid,
    pub name: String,
    pub work_dir: PathBuf,
    pub target_dir: PathBuf,
    pub script: String,
    pub stdin: Option<Vec<u8>>,
    pub shell: Vec<String>,
    pub container: Option<String>,
    pub executable_container: bool,
    pub env: HashMap<String, String>,
    pub input_files: HashMap<String, PathBuf>,
    pub output_patterns: Vec<String>,
    pub kind: TaskKind,
    /// Dehydrated operator call, closure tasks only.
    pub code: Option<Vec<u8>>,
    /// Dehydrated delegate context, closure tasks only.
    pub delegate: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,

    pub exit_status: Option<i32>,
    pub stdout: Option<TaskOutput>,
    pub stderr: Option<TaskOutput>,
    pub error: Option<String>,
    pub context: Option<TaskContext>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    pub fn script(
        name: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            work_dir: work_dir.into(),
            target_dir: target_dir.into(),
            script: script.into(),
            stdin: None,
            shell: vec!["bash".to_string()],
            container: None,
            executable_container: false,
            env: HashMap::new(),
            input_files: HashMap::new(),
            output_patterns: Vec::new(),
            kind: TaskKind::Script,
            code: None,
            delegate: None,
            created_at: Utc::now(),
            exit_status: None,
            stdout: None,
            stderr: None,
            error: None,
            context: None,
            completed_at: None,
        }
    }

    pub fn closure(
        name: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        target_dir: impl Into<PathBuf>,
        call: &OperatorCall,
        delegate: &TaskContext,
    ) -> Result<Self> {
        let mut task = Self::script(name, work_dir, target_dir, String::new());
        task.kind = TaskKind::Closure;
        task.code = Some(codec::encode_object(call)?);
        task.delegate = Some(codec::encode_object(delegate)?);
        Ok(task)
    }

    pub fn with_input(mut self, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        self.input_files.insert(name.into(), source.into());
        self
    }

    pub fn with_output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_patterns.push(pattern.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn with_shell(mut self, shell: Vec<String>) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_container(mut self, image: impl Into<String>, executable: bool) -> Self {
        self.container = Some(image.into());
        self.executable_container = executable;
        self
    }

    /// The attribute set this task contributes to its envelope.
    pub fn attrs(&self) -> TaskAttrs {
        TaskAttrs {
            task_id: self.id,
            name: self.name.clone(),
            work_dir: self.work_dir.clone(),
            target_dir: self.target_dir.clone(),
            input_files: self.input_files.clone(),
            output_files: self.output_patterns.clone(),
        }
    }
}
