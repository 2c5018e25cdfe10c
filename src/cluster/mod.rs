//! Cluster compute facade: the submission-side traits the executor talks
//! to, the single-job load-balanced adapter, and an in-process
//! implementation backing tests and single-machine runs.

pub mod balancer;
pub mod future;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FlowgridError, Result};
use crate::task::envelope::TaskEnvelope;
use crate::task::TaskOutcome;
pub use balancer::{LeastLoadedBalancer, LoadBalancer, NodeLoads};
pub use future::ClusterFuture;
pub use local::LocalComputeService;

/// Identifier of one compute node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterNode {
    pub id: u64,
}

impl ClusterNode {
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

impl std::fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.id)
    }
}

/// An ancillary unit of work submitted outside the envelope lifecycle.
#[async_trait]
pub trait ComputeJob: Send + Sync {
    async fn call(&self) -> Result<TaskOutcome>;

    fn cancel(&self) {}
}

/// The cluster compute service the executor is connected to. Placement,
/// transport, and worker membership live behind this seam.
#[async_trait]
pub trait ComputeService: Send + Sync {
    fn nodes(&self) -> Vec<ClusterNode>;

    /// Run `envelope` on `node`, returning immediately with a future.
    async fn execute(&self, node: ClusterNode, envelope: TaskEnvelope) -> ClusterFuture;

    /// Fire-and-forget submission of an ancillary job.
    async fn call(&self, job: Box<dyn ComputeJob>) -> ClusterFuture;
}

/// Single-job compute task adapter. Its only purpose is to surface the
/// load-balancer dependency: `map` produces the one-element placement for
/// the envelope, `reduce` hands back the sole result.
pub struct BalancedSubmission {
    envelope: TaskEnvelope,
    balancer: Arc<dyn LoadBalancer>,
}

impl BalancedSubmission {
    pub fn new(envelope: TaskEnvelope, balancer: Arc<dyn LoadBalancer>) -> Self {
        Self { envelope, balancer }
    }

    /// Map the single envelope to the node picked by the balancer.
    pub async fn map(self, nodes: &[ClusterNode]) -> Result<(ClusterNode, TaskEnvelope)> {
        let node = self
            .balancer
            .pick(nodes)
            .await
            .ok_or(FlowgridError::NoNodesAvailable)?;
        Ok((node, self.envelope))
    }

    /// Return the sole result of the single-job submission.
    pub fn reduce(mut results: Vec<ClusterFuture>) -> Result<ClusterFuture> {
        results
            .pop()
            .ok_or_else(|| FlowgridError::Internal("single-job submission produced no result".to_string()))
    }
}

/// Submission path shared by the executor and its task handlers: wrap the
/// envelope for load balancing, place it, submit it.
pub struct Submitter {
    compute: Arc<dyn ComputeService>,
    balancer: Arc<dyn LoadBalancer>,
}

impl Submitter {
    pub fn new(compute: Arc<dyn ComputeService>, balancer: Arc<dyn LoadBalancer>) -> Self {
        Self { compute, balancer }
    }

    pub async fn execute(&self, envelope: TaskEnvelope) -> Result<ClusterFuture> {
        let submission = BalancedSubmission::new(envelope, self.balancer.clone());
        let (node, envelope) = submission.map(&self.compute.nodes()).await?;
        tracing::debug!(node = %node, "Envelope placed by load balancer");
        let future = self.compute.execute(node, envelope).await;
        BalancedSubmission::reduce(vec![future])
    }

    pub async fn call(&self, job: Box<dyn ComputeJob>) -> ClusterFuture {
        self.compute.call(job).await
    }
}
