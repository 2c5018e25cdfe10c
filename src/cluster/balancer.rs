//! Placement policies for single-job submissions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cluster::ClusterNode;

/// Per-node inflight envelope counts, shared between the compute service
/// (which maintains them) and the balancer (which reads them).
pub type NodeLoads = Arc<RwLock<HashMap<u64, usize>>>;

/// Picks the node a single-job submission is placed on.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn pick(&self, nodes: &[ClusterNode]) -> Option<ClusterNode>;
}

/// Places each envelope on the node with the fewest inflight envelopes.
pub struct LeastLoadedBalancer {
    loads: NodeLoads,
}

impl LeastLoadedBalancer {
    pub fn new(loads: NodeLoads) -> Self {
        Self { loads }
    }
}

#[async_trait]
impl LoadBalancer for LeastLoadedBalancer {
    async fn pick(&self, nodes: &[ClusterNode]) -> Option<ClusterNode> {
        let loads = self.loads.read().await;
        nodes
            .iter()
            .min_by_key(|node| loads.get(&node.id).copied().unwrap_or(0))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pick_prefers_least_loaded_node() {
        let loads: NodeLoads = Arc::new(RwLock::new(HashMap::new()));
        {
            let mut map = loads.write().await;
            map.insert(1, 3);
            map.insert(2, 1);
            map.insert(3, 2);
        }

        let balancer = LeastLoadedBalancer::new(loads);
        let nodes = vec![ClusterNode::new(1), ClusterNode::new(2), ClusterNode::new(3)];
        assert_eq!(balancer.pick(&nodes).await, Some(ClusterNode::new(2)));
    }

    #[tokio::test]
    async fn test_pick_on_empty_cluster_is_none() {
        let balancer = LeastLoadedBalancer::new(Arc::new(RwLock::new(HashMap::new())));
        assert_eq!(balancer.pick(&[]).await, None);
    }
}
