//! Traversal-safe path resolution
//!
//! Maps a request path onto a file under the webroot. The guard is
//! deliberately conservative: any `..` substring is rejected, including
//! legitimate names like `file..txt`, and every rejection surfaces as the
//! same 404 so existence is never revealed.

use std::path::{Path, PathBuf};

/// Resolves `request_path` under `webroot`, returning the canonical file
/// path only when it exists and sits inside the webroot.
#[must_use]
pub fn resolve(webroot: &Path, request_path: &str) -> Option<PathBuf> {
    if request_path.contains("..") {
        return None;
    }

    let relative = request_path.trim_start_matches('/');
    if Path::new(relative).is_absolute() {
        return None;
    }

    let root = webroot.canonicalize().ok()?;
    let joined = root.join(relative);
    let canonical = joined.canonicalize().ok()?;

    if !canonical.starts_with(&root) {
        return None;
    }
    Some(canonical)
}
