//! In-process cluster: every "node" is a compute slot in this process,
//! sharing one local cache and session registry the way envelopes on a
//! single worker machine would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cluster::{ClusterFuture, ClusterNode, ComputeJob, ComputeService, NodeLoads};
use crate::task::envelope::{TaskEnvelope, WorkerContext};

pub struct LocalComputeService {
    nodes: Vec<ClusterNode>,
    worker: Arc<WorkerContext>,
    loads: NodeLoads,
}

impl LocalComputeService {
    pub fn new(worker: Arc<WorkerContext>, slots: usize) -> Self {
        let nodes = (1..=slots.max(1) as u64).map(ClusterNode::new).collect();
        Self {
            nodes,
            worker,
            loads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Inflight counts, shared with the load balancer.
    pub fn loads(&self) -> NodeLoads {
        self.loads.clone()
    }
}

#[async_trait]
impl ComputeService for LocalComputeService {
    fn nodes(&self) -> Vec<ClusterNode> {
        self.nodes.clone()
    }

    async fn execute(&self, node: ClusterNode, mut envelope: TaskEnvelope) -> ClusterFuture {
        let future = ClusterFuture::new();

        {
            let mut loads = self.loads.write().await;
            *loads.entry(node.id).or_insert(0) += 1;
        }

        let worker = self.worker.clone();
        let loads = self.loads.clone();
        let handle = future.clone();
        tokio::spawn(async move {
            let token = handle.cancellation_token();
            let result = envelope.call(&worker, &token).await;

            {
                let mut loads = loads.write().await;
                if let Some(load) = loads.get_mut(&node.id) {
                    *load = load.saturating_sub(1);
                }
            }

            if let Err(e) = &result {
                tracing::warn!(node = %node, error = %e, "Remote task failed");
            }
            handle.complete(result).await;
        });

        future
    }

    async fn call(&self, job: Box<dyn ComputeJob>) -> ClusterFuture {
        let future = ClusterFuture::new();
        let handle = future.clone();
        tokio::spawn(async move {
            let result = job.call().await;
            handle.complete(result).await;
        });
        future
    }
}
