//! Gzip output cache
//!
//! Caches compressed bodies for small static files so repeat requests skip
//! the encoder. Files above the size threshold are still compressed on
//! the fly but never cached. Entries invalidate on mtime change.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;

/// Files larger than this are compressed per request, not cached.
pub const CACHEABLE_MAX_SIZE: u64 = 1024 * 1024;

/// Entry bound; overflow evicts the oldest insertion.
const CACHE_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
struct GzipEntry {
    compressed: Bytes,
    mtime: SystemTime,
    inserted_at: Instant,
    original_size: u64,
}

/// Concurrent path-keyed cache of gzip output.
#[derive(Debug, Default)]
pub struct GzipCache {
    entries: DashMap<PathBuf, GzipEntry>,
}

impl GzipCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached compressed bytes, only when the stored mtime still matches.
    #[must_use]
    pub fn get(&self, path: &Path, mtime: SystemTime) -> Option<Bytes> {
        let entry = self.entries.get(path)?;
        if entry.mtime == mtime {
            Some(entry.compressed.clone())
        } else {
            None
        }
    }

    /// Stores compressed output for a file. Callers only insert files at
    /// or below `CACHEABLE_MAX_SIZE`.
    pub fn insert(&self, path: &Path, mtime: SystemTime, compressed: Bytes, original_size: u64) {
        if original_size > CACHEABLE_MAX_SIZE {
            return;
        }
        if self.entries.len() >= CACHE_CAPACITY && !self.entries.contains_key(path) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().inserted_at)
                .map(|e| e.key().clone());
            if let Some(key) = oldest {
                self.entries.remove(&key);
            }
        }
        self.entries.insert(
            path.to_path_buf(),
            GzipEntry { compressed, mtime, inserted_at: Instant::now(), original_size },
        );
    }

    /// Total compressed bytes held, for the readiness check.
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.entries.iter().map(|e| e.value().compressed.len()).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn hit_requires_matching_mtime() {
        let cache = GzipCache::new();
        let path = Path::new("/tmp/a.css");
        let t1 = UNIX_EPOCH + Duration::from_secs(100);
        let t2 = UNIX_EPOCH + Duration::from_secs(200);

        cache.insert(path, t1, Bytes::from_static(b"gz"), 512);
        assert_eq!(cache.get(path, t1), Some(Bytes::from_static(b"gz")));
        assert_eq!(cache.get(path, t2), None);
    }

    #[test]
    fn oversized_files_are_not_cached() {
        let cache = GzipCache::new();
        let path = Path::new("/tmp/big.js");
        let t = UNIX_EPOCH + Duration::from_secs(1);
        cache.insert(path, t, Bytes::from_static(b"gz"), CACHEABLE_MAX_SIZE + 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest_insertion() {
        let cache = GzipCache::new();
        let t = UNIX_EPOCH + Duration::from_secs(1);
        cache.insert(Path::new("/tmp/0.css"), t, Bytes::from_static(b"x"), 10);
        // Keep the first insertion strictly older than the rest.
        std::thread::sleep(Duration::from_millis(5));
        for i in 1..1_000 {
            cache.insert(Path::new(&format!("/tmp/{i}.css")), t, Bytes::from_static(b"x"), 10);
        }
        assert_eq!(cache.len(), 1_000);
        cache.insert(Path::new("/tmp/new.css"), t, Bytes::from_static(b"x"), 10);
        assert_eq!(cache.len(), 1_000);
        assert!(cache.get(Path::new("/tmp/0.css"), t).is_none());
        assert!(cache.get(Path::new("/tmp/new.css"), t).is_some());
    }
}
