use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::Context as _;
use tracing::{debug, warn};

use crate::error::FuseResult;

/// Owns every transient file created for a single pipeline run.
///
/// Files are registered as they are created and removed exactly once when the
/// run concludes, on success and on every failure path alike. A file can be
/// promoted out of the tracker so cleanup leaves it alone. Deletion failures
/// are logged and never escalated.
pub struct TempTracker {
    files: Mutex<Vec<PathBuf>>,
}

impl TempTracker {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(Vec::new()),
        }
    }

    /// Create a named temp file with the given suffix and register it.
    pub fn create(&self, suffix: &str) -> FuseResult<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix("framefuse_")
            .suffix(suffix)
            .tempfile()
            .context("failed to create temp file")?;
        let (_, path) = file.keep().context("failed to persist temp file")?;
        self.register(path.clone());
        Ok(path)
    }

    /// Register an externally created path for cleanup.
    pub fn register(&self, path: PathBuf) {
        self.lock().push(path);
    }

    /// Release ownership of `path` so cleanup leaves it alone.
    ///
    /// Returns false if the path was never registered.
    pub fn promote(&self, path: &Path) -> bool {
        let mut files = self.lock();
        let before = files.len();
        files.retain(|p| p != path);
        files.len() != before
    }

    /// Remove every registered file. Idempotent; already-deleted files are not
    /// an error.
    pub fn cleanup(&self) {
        let mut files = self.lock();
        for path in files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temp file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PathBuf>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TempTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempTracker {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_removes_registered_files() {
        let tracker = TempTracker::new();
        let a = tracker.create(".png").unwrap();
        let b = tracker.create(".mp4").unwrap();
        assert!(a.is_file());
        assert!(b.is_file());

        tracker.cleanup();
        assert!(!a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn drop_cleans_up() {
        let path = {
            let tracker = TempTracker::new();
            tracker.create(".png").unwrap()
        };
        assert!(!path.exists());
    }

    #[test]
    fn promoted_files_survive_cleanup() {
        let tracker = TempTracker::new();
        let keep = tracker.create(".mp4").unwrap();
        let drop_me = tracker.create(".png").unwrap();

        assert!(tracker.promote(&keep));
        tracker.cleanup();
        assert!(keep.exists());
        assert!(!drop_me.exists());

        std::fs::remove_file(&keep).unwrap();
    }

    #[test]
    fn cleanup_tolerates_already_deleted_files() {
        let tracker = TempTracker::new();
        let path = tracker.create(".png").unwrap();
        std::fs::remove_file(&path).unwrap();
        tracker.cleanup();
    }

    #[test]
    fn promote_of_unknown_path_is_a_noop() {
        let tracker = TempTracker::new();
        assert!(!tracker.promote(Path::new("/nonexistent/artifact.mp4")));
    }
}
