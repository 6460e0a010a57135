//! Error types for the serving runtime
//!
//! Every failure on a request path maps to one of these kinds so the engines
//! can decide between answering with a status code, resetting a stream, or
//! tearing down the connection. A single fall-through `Internal` kind turns
//! into a 500 with the request id logged.

use std::io;

use thiserror::Error;

/// A Result alias where the Err case is `ServerError`.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors surfaced by the connection engines and the request pipeline.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file I/O failure. Closes the connection without a body.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Malformed HTTP/1.1 request line or header section.
    #[error("malformed request: {0}")]
    Parse(String),

    /// A request line, header section, body, or file exceeded its limit.
    #[error("{what} exceeds limit of {limit} bytes")]
    TooLarge { what: &'static str, limit: u64 },

    /// HTTP/2 connection-level protocol violation. Produces a GOAWAY.
    #[error("http/2 connection error: {reason}")]
    H2Connection { code: crate::protocols::h2::ErrorCode, reason: String },

    /// HTTP/2 stream-level violation. Produces an RST_STREAM, the
    /// connection survives.
    #[error("http/2 stream {stream_id} error: {reason}")]
    H2Stream { stream_id: u32, code: crate::protocols::h2::ErrorCode, reason: String },

    /// HPACK decoding failure on a header block.
    #[error("hpack decode error: {0}")]
    Hpack(String),

    /// WebSocket framing or handshake violation with the close code to use.
    #[error("websocket error ({code}): {reason}")]
    WebSocket { code: u16, reason: String },

    /// TLS handshake or configuration failure.
    #[error("tls error: {0}")]
    Tls(String),

    /// Invalid or inconsistent server configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer closed the connection at a frame or request boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Anything not covered above. Answered with a 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Connection-scoped HTTP/2 error with the given code.
    pub fn h2_connection(
        code: crate::protocols::h2::ErrorCode,
        reason: impl Into<String>,
    ) -> Self {
        Self::H2Connection { code, reason: reason.into() }
    }

    /// Stream-scoped HTTP/2 error with the given code.
    pub fn h2_stream(
        stream_id: u32,
        code: crate::protocols::h2::ErrorCode,
        reason: impl Into<String>,
    ) -> Self {
        Self::H2Stream { stream_id, code, reason: reason.into() }
    }

    /// True when the error is an I/O condition that warrants a silent close
    /// rather than an error response.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed)
    }

    /// True when the underlying cause is the peer going away mid-read.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
