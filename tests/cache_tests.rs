use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use flowgrid::cache::LocalCache;

fn cache() -> (TempDir, Arc<LocalCache>) {
    let root = tempfile::tempdir().unwrap();
    let cache = Arc::new(LocalCache::new(root.path().join("local")).unwrap());
    (root, cache)
}

#[tokio::test]
async fn test_scratch_dirs_are_never_reused() {
    let (_root, cache) = cache();
    let a = cache.create_scratch_dir().await.unwrap();
    let b = cache.create_scratch_dir().await.unwrap();
    assert_ne!(a, b);
    assert!(a.is_dir());
    assert!(b.is_dir());
}

#[tokio::test]
async fn test_cache_path_materializes_source_once() {
    let (root, cache) = cache();
    let source = root.path().join("input.dat");
    std::fs::write(&source, "payload").unwrap();
    let session = Uuid::new_v4();

    let first = cache.cache_path(session, &source).await.unwrap();
    assert_eq!(std::fs::read_to_string(&first).unwrap(), "payload");
    let mtime = std::fs::metadata(&first).unwrap().modified().unwrap();

    // second call reuses the existing file instead of copying again
    let second = cache.cache_path(session, &source).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(std::fs::metadata(&second).unwrap().modified().unwrap(), mtime);
}

#[tokio::test]
async fn test_concurrent_requests_observe_one_materialization() {
    let (root, cache) = cache();
    let source = root.path().join("input.dat");
    std::fs::write(&source, "payload").unwrap();
    let session = Uuid::new_v4();

    let mut joins = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let source = source.clone();
        joins.push(tokio::spawn(async move {
            cache.cache_path(session, &source).await.unwrap()
        }));
    }

    let mut paths = Vec::new();
    for join in joins {
        paths.push(join.await.unwrap());
    }
    paths.dedup();
    assert_eq!(paths.len(), 1);

    let session_dir = cache.root().join("cache").join(session.to_string());
    assert_eq!(count_files(&session_dir), 1);
}

#[tokio::test]
async fn test_sessions_do_not_share_cache_entries() {
    let (root, cache) = cache();
    let source = root.path().join("input.dat");
    std::fs::write(&source, "payload").unwrap();

    let a = cache.cache_path(Uuid::new_v4(), &source).await.unwrap();
    let b = cache.cache_path(Uuid::new_v4(), &source).await.unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn test_purge_removes_the_cache_root() {
    let (root, cache) = cache();
    let source = root.path().join("input.dat");
    std::fs::write(&source, "payload").unwrap();
    cache.cache_path(Uuid::new_v4(), &source).await.unwrap();

    cache.purge().await;
    assert!(!cache.root().exists());
}

fn count_files(dir: &std::path::Path) -> usize {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}
