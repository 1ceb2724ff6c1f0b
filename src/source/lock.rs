//! Per-path write exclusion

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of one mutex per canonical file path.
///
/// Holding a [`PathGuard`] excludes every other writer of the same file;
/// writers of different files never contend. Entries nobody holds are
/// pruned on the next acquisition.
#[derive(Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one path, released on drop.
pub struct PathGuard {
    path: PathBuf,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl PathGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the path is free, then hold it.
    pub fn lock(&self, path: &Path) -> PathGuard {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let entry = {
            let mut inner = self.inner.lock();
            inner.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(inner.entry(path.clone()).or_default())
        };
        // the registry lock is released before waiting on the path
        let guard = entry.lock_arc();
        PathGuard {
            path,
            _guard: guard,
        }
    }

    /// Number of paths currently tracked.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_same_path_is_serialized() {
        let locks = Arc::new(PathLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                std::thread::spawn(move || {
                    let _guard = locks.lock(Path::new("/tmp/same-file.pdf"));
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_paths_do_not_contend() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/tmp/a.pdf"));
        let _b = locks.lock(Path::new("/tmp/b.pdf"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_released_entries_are_pruned() {
        let locks = PathLocks::new();
        drop(locks.lock(Path::new("/tmp/a.pdf")));
        drop(locks.lock(Path::new("/tmp/b.pdf")));
        // acquiring b pruned a; b itself is free again
        assert_eq!(locks.len(), 1);
        let _c = locks.lock(Path::new("/tmp/c.pdf"));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_guard_reports_path() {
        let locks = PathLocks::new();
        let guard = locks.lock(Path::new("/nonexistent/x.pdf"));
        assert_eq!(guard.path(), Path::new("/nonexistent/x.pdf"));
    }
}
