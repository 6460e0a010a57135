//! Static file serving
//!
//! The full response pipeline for file GET/HEAD: traversal-safe
//! resolution, index files, size limits, validators and conditional
//! requests, single-range serving, and the compression decision. Every
//! rejection that touches the filesystem answers 404.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::{Method, StatusCode, header};

use crate::cache::gzip::CACHEABLE_MAX_SIZE;
use crate::cache::{EtagCache, GzipCache, etag};
use crate::config::{FeatureFlags, Limits};
use crate::error::Result;
use crate::http::compression::{gzip_bytes, should_compress};
use crate::http::headers::STATIC_CACHE_CONTROL;
use crate::http::{FileSlice, Request, Response, ResponseBody, path};

/// Outcome of parsing a `Range` header against the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeOutcome {
    /// No usable single range; serve the whole file.
    Full,
    /// Inclusive byte range to serve with 206.
    Partial(u64, u64),
    /// Syntactically valid but outside the file; answer 416.
    Unsatisfiable,
}

#[derive(Debug)]
pub struct StaticFiles {
    limits: Limits,
    features: FeatureFlags,
    etag_cache: Arc<EtagCache>,
    gzip_cache: Arc<GzipCache>,
}

impl StaticFiles {
    #[must_use]
    pub fn new(
        limits: Limits,
        features: FeatureFlags,
        etag_cache: Arc<EtagCache>,
        gzip_cache: Arc<GzipCache>,
    ) -> Self {
        Self { limits, features, etag_cache, gzip_cache }
    }

    /// Serves `req.path` from under `webroot`.
    pub async fn serve(&self, req: &Request, webroot: &Path) -> Result<Response> {
        let Some(resolved) = path::resolve(webroot, &req.path) else {
            return Ok(Response::status_page(StatusCode::NOT_FOUND));
        };

        let mut meta = tokio::fs::metadata(&resolved).await?;
        let file_path = if meta.is_dir() {
            let index = resolved.join("index.html");
            match tokio::fs::metadata(&index).await {
                Ok(index_meta) if index_meta.is_file() => {
                    meta = index_meta;
                    index
                }
                _ => return Ok(Response::status_page(StatusCode::NOT_FOUND)),
            }
        } else {
            resolved
        };

        let size = meta.len();
        if size > self.limits.max_file_bytes {
            return Ok(Response::status_page(StatusCode::PAYLOAD_TOO_LARGE));
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let etag_value = if self.features.cache {
            self.etag_cache.etag_for(&file_path, size, mtime).await?
        } else {
            etag::generate(&file_path, size, mtime).await?
        };
        let last_modified = httpdate::fmt_http_date(mtime);

        if etag::not_modified(&req.headers, &etag_value, mtime) {
            let mut resp = Response::new(StatusCode::NOT_MODIFIED);
            resp.set_header(header::ETAG, &etag_value);
            resp.set_header(header::LAST_MODIFIED, &last_modified);
            resp.set_header(header::CACHE_CONTROL, STATIC_CACHE_CONTROL);
            return Ok(resp);
        }

        let mime = mime_guess::from_path(&file_path)
            .first_or_octet_stream()
            .to_string();

        // A single satisfiable range short-circuits the compression path.
        if req.method == Method::GET
            && let Some(range_header) = req.header("range")
        {
            match parse_range(range_header, size) {
                RangeOutcome::Partial(start, end) => {
                    let mut resp = Response::new(StatusCode::PARTIAL_CONTENT);
                    resp.body = ResponseBody::File(FileSlice {
                        path: file_path,
                        offset: start,
                        len: end - start + 1,
                    });
                    resp.set_header(header::CONTENT_TYPE, &mime);
                    resp.set_header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{size}"));
                    resp.set_header(header::ACCEPT_RANGES, "bytes");
                    resp.set_header(header::ETAG, &etag_value);
                    resp.set_header(header::LAST_MODIFIED, &last_modified);
                    return Ok(resp);
                }
                RangeOutcome::Unsatisfiable => {
                    let mut resp = Response::status_page(StatusCode::RANGE_NOT_SATISFIABLE);
                    resp.set_header(header::CONTENT_RANGE, format!("bytes */{size}"));
                    return Ok(resp);
                }
                RangeOutcome::Full => {}
            }
        }

        let extension = file_path.extension().and_then(|e| e.to_str());
        let compress = self.features.compression
            && req.method == Method::GET
            && should_compress(&req.headers, extension, &mime, size);

        let mut resp = Response::new(StatusCode::OK);
        resp.set_header(header::CONTENT_TYPE, &mime);
        resp.set_header(header::ETAG, &etag_value);
        resp.set_header(header::LAST_MODIFIED, &last_modified);
        resp.set_header(header::CACHE_CONTROL, STATIC_CACHE_CONTROL);
        resp.set_header(header::ACCEPT_RANGES, "bytes");

        if compress {
            resp.compressed = true;
            resp.set_header(header::CONTENT_ENCODING, "gzip");
            resp.set_header(header::VARY, "Accept-Encoding");
            if size <= CACHEABLE_MAX_SIZE {
                let compressed = match self
                    .gzip_cache
                    .get(&file_path, mtime)
                    .filter(|_| self.features.cache)
                {
                    Some(hit) => hit,
                    None => {
                        let raw = tokio::fs::read(&file_path).await?;
                        let encoded = Bytes::from(gzip_bytes(&raw)?);
                        if self.features.cache {
                            self.gzip_cache.insert(&file_path, mtime, encoded.clone(), size);
                        }
                        encoded
                    }
                };
                resp.body = ResponseBody::Bytes(compressed);
            } else {
                // Streamed through the incremental encoder by the writer.
                resp.body =
                    ResponseBody::File(FileSlice { path: file_path, offset: 0, len: size });
            }
        } else {
            resp.body = ResponseBody::File(FileSlice { path: file_path, offset: 0, len: size });
        }

        Ok(resp)
    }
}

/// Parses a `Range` header. Multi-range and non-byte units fall back to a
/// full response.
fn parse_range(header: &str, total: u64) -> RangeOutcome {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Full;
    };
    if spec.contains(',') {
        return RangeOutcome::Full;
    }
    let Some((start_raw, end_raw)) = spec.split_once('-') else {
        return RangeOutcome::Full;
    };

    match (start_raw.trim(), end_raw.trim()) {
        // Suffix form: last n bytes.
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) | Err(_) => RangeOutcome::Unsatisfiable,
            Ok(n) => {
                if total == 0 {
                    return RangeOutcome::Unsatisfiable;
                }
                let start = total.saturating_sub(n);
                RangeOutcome::Partial(start, total - 1)
            }
        },
        (start, "") => match start.parse::<u64>() {
            Ok(s) if s < total => RangeOutcome::Partial(s, total - 1),
            Ok(_) => RangeOutcome::Unsatisfiable,
            Err(_) => RangeOutcome::Full,
        },
        (start, end) => match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(s), Ok(e)) if s <= e && s < total => {
                RangeOutcome::Partial(s, e.min(total - 1))
            }
            (Ok(_), Ok(_)) => RangeOutcome::Unsatisfiable,
            _ => RangeOutcome::Full,
        },
    }
}
