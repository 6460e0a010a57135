//! Logical request representation
//!
//! Both connection engines normalize into this shape before the pipeline
//! runs. Headers live in a case-insensitive map; the body, when present,
//! has already been bounded by `max_body_bytes`.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method};

/// Protocol version tag carried through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    H2,
}

impl HttpVersion {
    /// Wire form used in the H/1 status line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
        }
    }
}

/// One logical request. Method and path are validated before any body
/// byte is consumed.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Raw request target as received, including any query string.
    pub target: String,
    /// Percent-decoded path component.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub version: HttpVersion,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub remote_addr: SocketAddr,
    /// Random id attached to log events and 500 responses.
    pub request_id: String,
    /// True when the connection is TLS-terminated.
    pub secure: bool,
}

impl Request {
    /// First header value as UTF-8, `None` when absent or non-text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `Host` header value, or the H2 `:authority` carried in the map.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Declared body length.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Keep-alive disposition: HTTP/1.1 defaults to reuse unless
    /// `Connection: close`; HTTP/1.0 requires `Connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").unwrap_or("");
        match self.version {
            HttpVersion::Http11 => !token_present(connection, "close"),
            HttpVersion::Http10 => token_present(connection, "keep-alive"),
            HttpVersion::H2 => true,
        }
    }

    /// True when the request asks for a protocol upgrade to WebSocket.
    #[must_use]
    pub fn wants_websocket(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
            && token_present(self.header("connection").unwrap_or(""), "upgrade")
    }
}

/// Case-insensitive token search in a comma-separated header value.
fn token_present(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}
