//! In-memory, content-addressed artifact cache.
//!
//! Keys are SHA-256 hashes of the normalized document (see
//! [`crate::svgdoc::cache_key`]); values point at finished MP4 files on disk.
//! Expiry is lazy on lookup and reclaimed for real by [`ArtifactCache::sweep_expired`].
//! The ceiling evicts strictly by insertion order (first inserted goes first),
//! matching the original behavior rather than LRU.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{config::CacheConfig, error::FuseResult};

#[derive(Clone, Debug)]
struct CacheEntry {
    path: PathBuf,
    created: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Live keys in insertion order. A replacing `store` keeps the key's
    /// original position.
    order: VecDeque<String>,
}

/// Process-wide cache shared across concurrent pipeline runs. All mutations
/// happen under one mutex, so eviction and sweeping cannot race each other.
pub struct ArtifactCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl ArtifactCache {
    pub fn new(config: &CacheConfig) -> FuseResult<Self> {
        config.validate()?;
        Ok(Self {
            ttl: config.ttl(),
            max_entries: config.max_entries,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Resolve `key` to its artifact. Entries past the TTL, and entries whose
    /// backing file has vanished, are misses even before a sweep runs.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let inner = self.lock();
        let entry = inner.entries.get(key)?;
        if entry.created.elapsed() > self.ttl {
            debug!(key, "cache entry expired");
            return None;
        }
        if !entry.path.is_file() {
            debug!(key, "cache artifact missing on disk");
            return None;
        }
        debug!(key, "cache hit");
        Some(entry.path.clone())
    }

    /// Insert or replace. When the ceiling is exceeded the oldest entry by
    /// insertion order is evicted immediately, together with its file.
    pub fn store(&self, key: &str, path: PathBuf) {
        let mut inner = self.lock();
        let replaced = inner
            .entries
            .insert(
                key.to_string(),
                CacheEntry {
                    path,
                    created: Instant::now(),
                },
            )
            .is_some();
        if !replaced {
            inner.order.push_back(key.to_string());
        }

        while inner.entries.len() > self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&oldest) {
                remove_artifact(&entry.path);
                debug!(key = %oldest, "evicted oldest cache entry");
            }
        }
    }

    /// Remove every expired entry and its backing file, so storage is
    /// reclaimed even when nothing looks the entries up again.
    pub fn sweep_expired(&self) {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.created.elapsed() > self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                remove_artifact(&entry.path);
                debug!(key = %key, "swept expired cache entry");
            }
        }
        inner.order.retain(|k| !expired.contains(k));
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Best-effort file removal: an already-absent artifact is not an error, and
/// nothing here ever propagates to the caller.
fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed cache artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache artifact"),
    }
}
