use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FlowgridError {
    #[error("Payload codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Closure codec error: {0}")]
    ClosureCodec(#[from] serde_json::Error),

    #[error("Task '{task}' failed: {source}")]
    ProcessExecution {
        task: String,
        #[source]
        source: Box<FlowgridError>,
    },

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),

    #[error("Missing task artifact: {0}")]
    MissingArtifact(PathBuf),

    #[error("Invalid output pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No cluster nodes available")]
    NoNodesAvailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowgridError {
    /// Wrap a worker-side failure with the name of the task it belongs to.
    /// Already-wrapped errors are passed through unchanged.
    pub fn into_process_error(self, task: &str) -> FlowgridError {
        match self {
            e @ FlowgridError::ProcessExecution { .. } => e,
            e => FlowgridError::ProcessExecution {
                task: task.to_string(),
                source: Box::new(e),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            FlowgridError::Cancelled => true,
            FlowgridError::ProcessExecution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowgridError>;
