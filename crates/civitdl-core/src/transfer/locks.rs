//! Destination-path mutual exclusion for concurrent jobs.
//!
//! Two jobs that map to the same destination never verify or write it at
//! the same time; the second waits for the first and then sees its result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Held while a job owns a destination path.
#[derive(Debug)]
pub struct DestinationGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl DestinationGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Registry of in-flight destination paths.
#[derive(Debug, Clone, Default)]
pub struct DestinationLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `path` is free, then claim it.
    pub async fn acquire(&self, path: &Path) -> DestinationGuard {
        let key = canonical_key(path);
        let slot = {
            let mut map = match self.inner.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            // drop slots nobody holds or waits on
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(key.clone()).or_default().clone()
        };

        if slot.try_lock().is_err() {
            debug!("Waiting for another job writing {}", key.display());
        }
        let guard = slot.lock_owned().await;
        DestinationGuard {
            path: key,
            _guard: guard,
        }
    }

    /// Number of tracked paths (held or awaited).
    pub fn in_flight(&self) -> usize {
        match self.inner.lock() {
            Ok(map) => map.values().filter(|s| Arc::strong_count(s) > 1).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|s| Arc::strong_count(s) > 1)
                .count(),
        }
    }
}

/// Normalize a path for locking.
///
/// The file itself may not exist yet, so the parent is canonicalized when
/// possible and the file name re-attached.
fn canonical_key(path: &Path) -> PathBuf {
    if let Ok(full) = path.canonicalize() {
        return full;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = DestinationLocks::new();
        let path = PathBuf::from("/tmp/civitdl-lock-test/model.safetensors");

        let first = locks.acquire(&path).await;
        let locks2 = locks.clone();
        let path2 = path.clone();
        let waiter = tokio::spawn(async move {
            let _second = locks2.acquire(&path2).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let locks = DestinationLocks::new();
        let _a = locks.acquire(Path::new("/tmp/a.bin")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(Path::new("/tmp/b.bin")),
        )
        .await
        .unwrap();
        assert_eq!(locks.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_released_slots_are_pruned() {
        let locks = DestinationLocks::new();
        drop(locks.acquire(Path::new("/tmp/a.bin")).await);
        let _b = locks.acquire(Path::new("/tmp/b.bin")).await;
        assert_eq!(locks.in_flight(), 1);
    }
}
