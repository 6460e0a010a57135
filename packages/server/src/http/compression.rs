//! Response compression policy and gzip encoding
//!
//! A response body is gzip-compressed only when the client advertises
//! support, the body is worth compressing, and the content is not already
//! in a compressed container format. Small files compress in one shot and
//! feed the gzip cache; large files stream through an incremental encoder.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use http::HeaderMap;

use crate::error::Result;

/// Bodies below this size are never worth the gzip overhead.
pub const MIN_COMPRESS_SIZE: u64 = 256;

/// Extensions of formats that already carry their own compression.
pub const PRECOMPRESSED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "mp4", "mpeg", "mp3", "ogg", "avi", "mkv", "mov",
    "zip", "gz", "tgz", "bz2", "xz", "7z", "rar", "pdf", "woff", "woff2", "ico",
];

/// MIME families that compress well.
const COMPRESSIBLE_MIME_PREFIXES: &[&str] = &[
    "text/",
    "application/json",
    "application/javascript",
    "application/xml",
    "application/xhtml+xml",
    "application/rss+xml",
    "application/atom+xml",
];

/// True when the request's `Accept-Encoding` lists gzip.
#[must_use]
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|enc| enc.trim().split(';').next().unwrap_or("").trim() == "gzip")
        })
}

/// Full eligibility check for compressing a static file response.
#[must_use]
pub fn should_compress(
    request_headers: &HeaderMap,
    extension: Option<&str>,
    mime: &str,
    body_len: u64,
) -> bool {
    if body_len < MIN_COMPRESS_SIZE {
        return false;
    }
    if !accepts_gzip(request_headers) {
        return false;
    }
    if let Some(ext) = extension {
        let ext = ext.to_ascii_lowercase();
        if PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()) {
            return false;
        }
    }
    is_compressible_mime(mime)
}

/// True when the media type belongs to a compressible family.
#[must_use]
pub fn is_compressible_mime(mime: &str) -> bool {
    let media_type = mime.split(';').next().unwrap_or("").trim();
    COMPRESSIBLE_MIME_PREFIXES
        .iter()
        .any(|prefix| media_type.starts_with(prefix))
}

/// One-shot gzip of an in-memory body.
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Incremental gzip encoder for streaming large bodies. Push chunks in,
/// write whatever comes out, then `finish` for the trailer.
pub struct StreamingGzip {
    encoder: GzEncoder<Vec<u8>>,
}

impl StreamingGzip {
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), Compression::default()),
        }
    }

    /// Feeds one chunk, returning any compressed output ready to send.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.encoder.write_all(chunk)?;
        self.encoder.flush()?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// Ends the stream, returning the remaining output plus trailer.
    pub fn finish(self) -> Result<Vec<u8>> {
        Ok(self.encoder.finish()?)
    }
}

impl Default for StreamingGzip {
    fn default() -> Self {
        Self::new()
    }
}
