//! ETag generation, caching, and conditional request evaluation
//!
//! Strong ETags are the quoted MD5 of the file's bytes, computed by
//! streaming so large files never sit in memory. Files above the strong
//! threshold get a weak validator derived from size and mtime instead.
//! Cached values are valid only while the file's mtime is unchanged.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use http::HeaderMap;
use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Files above this size get a weak size+mtime validator.
pub const STRONG_ETAG_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Entry bound; overflow evicts the oldest insertion.
const CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone)]
struct EtagEntry {
    etag: String,
    mtime: SystemTime,
    inserted_at: Instant,
}

/// Concurrent path-keyed ETag cache.
#[derive(Debug, Default)]
pub struct EtagCache {
    entries: DashMap<PathBuf, EtagEntry>,
}

impl EtagCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ETag for the file, computing and caching it when the
    /// cached value is missing or the mtime moved. Concurrent calls for
    /// the same path may duplicate the hash work; they cannot disagree,
    /// because the value is a pure function of content and mtime.
    pub async fn etag_for(&self, path: &Path, size: u64, mtime: SystemTime) -> Result<String> {
        if let Some(entry) = self.entries.get(path)
            && entry.mtime == mtime
        {
            return Ok(entry.etag.clone());
        }

        let etag = generate(path, size, mtime).await?;

        if self.entries.len() >= CACHE_CAPACITY && !self.entries.contains_key(path) {
            evict_oldest(&self.entries);
        }
        self.entries.insert(
            path.to_path_buf(),
            EtagEntry { etag: etag.clone(), mtime, inserted_at: Instant::now() },
        );
        Ok(etag)
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

/// Computes the validator without touching the cache: strong quoted MD5,
/// or the weak form above the size threshold.
pub async fn generate(path: &Path, size: u64, mtime: SystemTime) -> Result<String> {
    if size > STRONG_ETAG_MAX_SIZE {
        Ok(weak_etag(size, mtime))
    } else {
        strong_etag(path).await
    }
}

/// Streams the file through MD5 and quotes the hex digest.
async fn strong_etag(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(2 + digest.len() * 2);
    hex.push('"');
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.push('"');
    Ok(hex)
}

/// Weak validator for files too large to hash on the request path.
#[must_use]
pub fn weak_etag(size: u64, mtime: SystemTime) -> String {
    let mtime_secs = mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("W/\"{size:x}-{mtime_secs:x}\"")
}

/// Labelled LRU upstream, but eviction is by oldest insertion time and a
/// lookup never refreshes the timestamp. Kept as observed.
fn evict_oldest(entries: &DashMap<PathBuf, EtagEntry>) {
    let oldest = entries
        .iter()
        .min_by_key(|e| e.value().inserted_at)
        .map(|e| e.key().clone());
    if let Some(key) = oldest {
        entries.remove(&key);
    }
}

/// Evaluates the conditional headers against the current validators.
/// `If-None-Match` wins over `If-Modified-Since` when both are present.
#[must_use]
pub fn not_modified(headers: &HeaderMap, etag: &str, mtime: SystemTime) -> bool {
    if let Some(if_none_match) = headers
        .get(http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if if_none_match.trim() == "*" {
            return true;
        }
        return if_none_match
            .split(',')
            .any(|candidate| weak_equal(candidate.trim(), etag));
    }

    if let Some(if_modified_since) = headers
        .get(http::header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        && let Ok(since) = httpdate::parse_http_date(if_modified_since)
    {
        // HTTP dates carry second precision; truncate before comparing.
        let mtime_secs = mtime.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let since_secs = since.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        return mtime_secs <= since_secs;
    }

    false
}

/// Weak comparison: strip any `W/` prefix on both sides, then compare.
fn weak_equal(a: &str, b: &str) -> bool {
    a.strip_prefix("W/").unwrap_or(a) == b.strip_prefix("W/").unwrap_or(b)
}
