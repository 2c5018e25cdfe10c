use std::path::PathBuf;

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Session this executor submits under. One session per engine run;
    /// worker-side operator registries and cache entries are keyed by it.
    pub session_id: Uuid,
    /// Worker-local directory holding scratch dirs and the input cache.
    pub cache_root: PathBuf,
    /// Granularity of the task polling monitor.
    pub poll_interval_ms: u64,
    /// Number of compute slots exposed by the in-process cluster.
    pub worker_slots: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            cache_root: std::env::temp_dir().join("flowgrid"),
            poll_interval_ms: 1000,
            worker_slots: 4,
        }
    }
}

impl ExecutorConfig {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            ..Default::default()
        }
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn with_worker_slots(mut self, slots: usize) -> Self {
        self.worker_slots = slots.max(1);
        self
    }
}
