//! Validator and compressed-body caches
//!
//! Two process-wide concurrent caches keyed by absolute file path: ETags
//! and gzip output. Entries are validated against the file's mtime on
//! every lookup, so a stale write is harmless (last writer wins and the
//! value depends only on content + mtime). Both caches are size-bounded
//! and evict the entry with the oldest insertion time on overflow.

pub mod etag;
pub mod gzip;

pub use etag::EtagCache;
pub use gzip::GzipCache;
