//! The executor: creates task handlers and owns the connector to the
//! cluster compute service and the polling monitor.

use std::sync::Arc;

use uuid::Uuid;

use crate::cluster::{ClusterFuture, ComputeJob, ComputeService, LoadBalancer, Submitter};
use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::handler::TaskHandler;
use crate::monitor::TaskMonitor;
use crate::task::envelope::TaskEnvelope;
use crate::task::TaskRun;

pub struct TaskExecutor {
    config: ExecutorConfig,
    submitter: Arc<Submitter>,
    monitor: Arc<TaskMonitor>,
}

impl TaskExecutor {
    pub fn new(
        config: ExecutorConfig,
        compute: Arc<dyn ComputeService>,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Self {
        let monitor = TaskMonitor::new(config.poll_interval_ms);
        Self {
            config,
            submitter: Arc::new(Submitter::new(compute, balancer)),
            monitor,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.config.session_id
    }

    pub fn monitor(&self) -> Arc<TaskMonitor> {
        self.monitor.clone()
    }

    /// Build a handler for `task` and register it with the monitor. The
    /// script/closure shape of the envelope is decided by the task's kind
    /// tag at envelope construction.
    pub async fn create_task_handler(&self, task: TaskRun) -> Arc<TaskHandler> {
        let handler = TaskHandler::new(
            task,
            self.config.session_id,
            self.submitter.clone(),
            self.monitor.signal_sender(),
        );
        self.monitor.register(handler.clone()).await;
        handler
    }

    /// Submit an envelope under the single-job load-balanced wrapper.
    pub async fn execute(&self, envelope: TaskEnvelope) -> Result<ClusterFuture> {
        self.submitter.execute(envelope).await
    }

    /// Fire-and-forget submission of an ancillary control job.
    pub async fn call(&self, job: Box<dyn ComputeJob>) -> ClusterFuture {
        self.submitter.call(job).await
    }
}
