//! HTTP/1.1 request head parser
//!
//! Parses the request line and header section out of a growing buffer.
//! The caller keeps reading until `Complete`; limit violations surface as
//! `TooLarge` so the engine can answer 413 and close.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use memchr::memmem;

use crate::config::Limits;
use crate::error::{Result, ServerError};
use crate::http::HttpVersion;

/// Parsed request line and headers.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub version: HttpVersion,
    pub headers: HeaderMap,
}

/// Parser outcome for the bytes seen so far.
#[derive(Debug)]
pub enum ParseStatus {
    /// Head parsed; the request consumed this many bytes of the buffer.
    Complete(Box<RequestHead>, usize),
    /// Need more bytes.
    Partial,
}

/// Attempts to parse a complete head from `buf`.
pub fn parse_head(buf: &[u8], limits: &Limits) -> Result<ParseStatus> {
    let Some(end) = memmem::find(buf, b"\r\n\r\n") else {
        // No terminator yet; bail out early once the buffer cannot
        // possibly hold a conforming head.
        if memmem::find(buf, b"\r\n").is_none() && buf.len() > limits.max_request_line {
            return Err(ServerError::TooLarge {
                what: "request line",
                limit: limits.max_request_line as u64,
            });
        }
        if buf.len() > limits.max_request_line + limits.max_header_bytes {
            return Err(ServerError::TooLarge {
                what: "header section",
                limit: limits.max_header_bytes as u64,
            });
        }
        return Ok(ParseStatus::Partial);
    };

    let head = &buf[..end];
    let consumed = end + 4;

    let line_end = memmem::find(head, b"\r\n").unwrap_or(head.len());
    if line_end > limits.max_request_line {
        return Err(ServerError::TooLarge {
            what: "request line",
            limit: limits.max_request_line as u64,
        });
    }
    if head.len() - line_end > limits.max_header_bytes {
        return Err(ServerError::TooLarge {
            what: "header section",
            limit: limits.max_header_bytes as u64,
        });
    }

    let request_line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| ServerError::Parse("request line is not ascii".into()))?;
    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method_raw), Some(target), Some(version_raw), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ServerError::Parse(format!("malformed request line: {request_line}")));
    };

    let method = Method::from_bytes(method_raw.as_bytes())
        .map_err(|_| ServerError::Parse(format!("bad method: {method_raw}")))?;
    let version = match version_raw {
        "HTTP/1.1" => HttpVersion::Http11,
        "HTTP/1.0" => HttpVersion::Http10,
        other => return Err(ServerError::Parse(format!("unsupported version: {other}"))),
    };

    let mut headers = HeaderMap::new();
    let header_section = &head[line_end..];
    for line in header_section.split(|&b| b == b'\n') {
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }
        let text = std::str::from_utf8(line)
            .map_err(|_| ServerError::Parse("header line is not utf-8".into()))?;
        let Some((name, value)) = text.split_once(':') else {
            return Err(ServerError::Parse(format!("header without colon: {text}")));
        };
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| ServerError::Parse(format!("bad header name: {name}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| ServerError::Parse("bad header value".into()))?;
        headers.append(name, value);
    }

    Ok(ParseStatus::Complete(
        Box::new(RequestHead { method, target: target.to_string(), version, headers }),
        consumed,
    ))
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}
