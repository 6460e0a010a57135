//! Response representation
//!
//! Status, header map, and a body that is either in-memory bytes or a file
//! slice streamed through the buffer pool. Once an engine starts writing,
//! headers are frozen; everything that mutates headers runs before
//! serialization.

use std::path::PathBuf;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};

/// A byte range of a file on disk, streamed rather than loaded.
#[derive(Debug, Clone)]
pub struct FileSlice {
    pub path: PathBuf,
    pub offset: u64,
    pub len: u64,
}

/// Response body variants.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Empty,
    Bytes(Bytes),
    File(FileSlice),
}

impl ResponseBody {
    /// Known length in bytes. Streaming-compressed file bodies report the
    /// uncompressed length here; the writer switches framing accordingly.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(b) => b.len() as u64,
            Self::File(f) => f.len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One response moving toward the wire.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    /// Body is (or will be) gzip-encoded.
    pub compressed: bool,
    /// Whether the connection may be reused afterwards.
    pub keep_alive: bool,
}

impl Response {
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            compressed: false,
            keep_alive: true,
        }
    }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        resp.body = ResponseBody::Bytes(Bytes::from(body.into()));
        resp
    }

    /// JSON response from an already-serialized value.
    #[must_use]
    pub fn json(status: StatusCode, body: String) -> Self {
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        resp.body = ResponseBody::Bytes(Bytes::from(body));
        resp
    }

    /// Minimal HTML error page for the given status.
    #[must_use]
    pub fn status_page(status: StatusCode) -> Self {
        let reason = status.canonical_reason().unwrap_or("Error");
        let html = format!(
            "<!DOCTYPE html><html><head><title>{code} {reason}</title></head>\
             <body><h1>{code} {reason}</h1></body></html>",
            code = status.as_u16(),
        );
        let mut resp = Self::new(status);
        resp.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        resp.body = ResponseBody::Bytes(Bytes::from(html));
        resp
    }

    /// 503 used while shutting down and on admission-queue overflow.
    #[must_use]
    pub fn unavailable() -> Self {
        let mut resp = Self::status_page(StatusCode::SERVICE_UNAVAILABLE);
        resp.keep_alive = false;
        resp.headers
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
        resp
    }

    /// Sets a header, replacing any existing value.
    pub fn set_header<K: header::IntoHeaderName>(&mut self, name: K, value: impl AsRef<str>) {
        if let Ok(v) = HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(name, v);
        }
    }

    #[must_use]
    pub fn with_header<K: header::IntoHeaderName>(mut self, name: K, value: impl AsRef<str>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_page_contains_code_and_reason() {
        let resp = Response::status_page(StatusCode::NOT_FOUND);
        match &resp.body {
            ResponseBody::Bytes(b) => {
                let text = std::str::from_utf8(b).unwrap();
                assert!(text.contains("404 Not Found"));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn unavailable_closes_connection() {
        let resp = Response::unavailable();
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!resp.keep_alive);
        assert_eq!(resp.headers.get("connection").unwrap(), "close");
    }
}
