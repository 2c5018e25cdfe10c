//! Worker-local storage: per-execution scratch directories and the
//! per-session input cache.
//!
//! The cache root is process-wide state. Input files are materialized under
//! `cache/<session>/<sha256(source)>` exactly once per `(session, source)`
//! key; envelopes link inputs from scratch into the cache instead of copying,
//! so identical inputs across sibling tasks share a single on-disk copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;

type CacheKey = (Uuid, PathBuf);

pub struct LocalCache {
    root: PathBuf,
    /// Per-key locks serializing materialization of the same input.
    inflight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl LocalCache {
    /// Create the cache rooted at `root`. The directory tree is created on
    /// first use and removed wholesale at shutdown, scratch dirs included.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("scratch"))?;
        std::fs::create_dir_all(root.join("cache"))?;
        Ok(Self {
            root,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh scratch directory. Never reused across executions.
    pub async fn create_scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join("scratch").join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Resolve the cache path for `(session_id, source)`, materializing the
    /// source file on first access. Concurrent callers for the same key
    /// observe at most one materialization.
    pub async fn cache_path(&self, session_id: Uuid, source: &Path) -> Result<PathBuf> {
        let cached = self.keyed_path(session_id, source);

        if tokio::fs::try_exists(&cached).await? {
            return Ok(cached);
        }

        let key = (session_id, source.to_path_buf());
        let lock = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key).or_default().clone()
        };
        let _guard = lock.lock().await;

        // Another caller may have won the race while we waited.
        if tokio::fs::try_exists(&cached).await? {
            return Ok(cached);
        }

        if let Some(parent) = cached.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, &cached).await?;
        tracing::debug!(
            session_id = %session_id,
            source = %source.display(),
            cached = %cached.display(),
            "Input file materialized in local cache"
        );
        Ok(cached)
    }

    fn keyed_path(&self, session_id: Uuid, source: &Path) -> PathBuf {
        let digest = format!("{:x}", Sha256::digest(source.as_os_str().as_encoded_bytes()));
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "data".to_string());
        self.root
            .join("cache")
            .join(session_id.to_string())
            .join(digest)
            .join(file_name)
    }

    /// Delete the cache root, scratch directories included.
    pub async fn purge(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            tracing::warn!(root = %self.root.display(), error = %e, "Failed to purge local cache");
        } else {
            tracing::info!(root = %self.root.display(), "Local cache purged");
        }
    }

    /// Purge the cache when the shutdown token fires.
    pub fn purge_on_shutdown(self: &Arc<Self>, shutdown: CancellationToken) {
        let cache = self.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            cache.purge().await;
        });
    }
}
