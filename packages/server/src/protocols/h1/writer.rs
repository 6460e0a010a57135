//! HTTP/1.1 response serialization
//!
//! Emits the status line, headers, and body with the right framing:
//! `Content-Length` for known bodies, chunked transfer coding when a
//! large file is gzip-compressed on the fly, close-delimited as the
//! HTTP/1.0 fallback. File bodies stream through the shared buffer pool.
//! Once the first byte goes out the response headers are frozen by
//! construction: nothing here mutates the response.

use std::io::SeekFrom;

use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::http::compression::StreamingGzip;
use crate::http::headers::apply_common_headers;
use crate::http::{FileSlice, HttpVersion, Response, ResponseBody};
use crate::util::BufferPool;

/// Keep-alive hints advertised alongside `Connection: keep-alive`.
const KEEP_ALIVE_TIMEOUT_SECS: u64 = 30;

/// Outcome of serializing one response.
#[derive(Debug, Clone, Copy)]
pub struct WriteOutcome {
    /// Effective keep-alive disposition; may be stricter than requested
    /// when framing forces a close.
    pub keep_alive: bool,
    /// Bytes put on the wire, headers included.
    pub bytes_sent: u64,
}

/// Writes one response.
pub async fn write_response<W>(
    io: &mut W,
    resp: &Response,
    version: HttpVersion,
    is_head: bool,
    keep_alive: bool,
    max_requests: u32,
    pool: &BufferPool,
) -> Result<WriteOutcome>
where
    W: AsyncWrite + Unpin,
{
    let status = resp.status;
    let suppress_body =
        is_head || status.is_informational() || status == http::StatusCode::NO_CONTENT
            || status == http::StatusCode::NOT_MODIFIED;
    let streaming = resp.compressed && matches!(resp.body, ResponseBody::File(_)) && !suppress_body;

    // Close-delimited gzip streams cannot be followed by another request.
    let keep_alive = keep_alive && !(streaming && version == HttpVersion::Http10);

    let mut head = String::with_capacity(256);
    head.push_str(version.as_str());
    head.push(' ');
    head.push_str(status.as_str());
    head.push(' ');
    head.push_str(status.canonical_reason().unwrap_or("Unknown"));
    head.push_str("\r\n");

    for (name, value) in &resp.headers {
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(value.to_str().unwrap_or(""));
        head.push_str("\r\n");
    }

    let bodyless_status = status.is_informational()
        || status == http::StatusCode::NO_CONTENT
        || status == http::StatusCode::NOT_MODIFIED;
    if !bodyless_status {
        if streaming {
            if version == HttpVersion::Http11 {
                head.push_str("transfer-encoding: chunked\r\n");
            }
        } else {
            head.push_str(&format!("content-length: {}\r\n", resp.body.len()));
        }
    }

    // Upgrade responses already carry their own Connection header.
    if !resp.headers.contains_key(http::header::CONNECTION) {
        if keep_alive {
            head.push_str("connection: keep-alive\r\n");
            head.push_str(&format!(
                "keep-alive: timeout={KEEP_ALIVE_TIMEOUT_SECS}, max={max_requests}\r\n"
            ));
        } else {
            head.push_str("connection: close\r\n");
        }
    }
    head.push_str("\r\n");
    io.write_all(head.as_bytes()).await?;
    let mut bytes_sent = head.len() as u64;

    if !suppress_body {
        match &resp.body {
            ResponseBody::Empty => {}
            ResponseBody::Bytes(bytes) => {
                io.write_all(bytes).await?;
                bytes_sent += bytes.len() as u64;
            }
            ResponseBody::File(slice) => {
                bytes_sent += if streaming {
                    stream_file_gzip(io, slice, version, pool).await?
                } else {
                    stream_file(io, slice, pool).await?
                };
            }
        }
    }

    io.flush().await?;
    Ok(WriteOutcome { keep_alive, bytes_sent })
}

/// Streams a file slice verbatim through a pooled buffer, returning the
/// byte count written.
async fn stream_file<W>(io: &mut W, slice: &FileSlice, pool: &BufferPool) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(&slice.path).await?;
    if slice.offset > 0 {
        file.seek(SeekFrom::Start(slice.offset)).await?;
    }

    let mut buf = pool.acquire();
    let mut remaining = slice.len;
    let mut written = 0u64;
    let result = async {
        while remaining > 0 {
            let want = (buf.len() as u64).min(remaining) as usize;
            let n = tokio::io::AsyncReadExt::read(&mut file, &mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            io.write_all(&buf[..n]).await?;
            written += n as u64;
            remaining -= n as u64;
        }
        Ok(written)
    }
    .await;
    pool.release(buf);
    result
}

/// Streams a file through the incremental gzip encoder. HTTP/1.1 frames
/// the output as chunks; HTTP/1.0 falls back to close-delimited.
async fn stream_file_gzip<W>(
    io: &mut W,
    slice: &FileSlice,
    version: HttpVersion,
    pool: &BufferPool,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let chunked = version == HttpVersion::Http11;
    let mut file = tokio::fs::File::open(&slice.path).await?;
    if slice.offset > 0 {
        file.seek(SeekFrom::Start(slice.offset)).await?;
    }

    let mut encoder = StreamingGzip::new();
    let mut buf = pool.acquire();
    let mut remaining = slice.len;
    let mut written = 0u64;
    let result = async {
        while remaining > 0 {
            let want = (buf.len() as u64).min(remaining) as usize;
            let n = tokio::io::AsyncReadExt::read(&mut file, &mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            remaining -= n as u64;
            let compressed = encoder.push(&buf[..n])?;
            written += write_body_piece(io, &compressed, chunked).await?;
        }
        let tail = encoder.finish()?;
        written += write_body_piece(io, &tail, chunked).await?;
        if chunked {
            io.write_all(b"0\r\n\r\n").await?;
            written += 5;
        }
        Ok(written)
    }
    .await;
    pool.release(buf);
    result
}

async fn write_body_piece<W>(io: &mut W, piece: &[u8], chunked: bool) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    if piece.is_empty() {
        return Ok(0);
    }
    if chunked {
        let size_line = format!("{:x}\r\n", piece.len());
        io.write_all(size_line.as_bytes()).await?;
        io.write_all(piece).await?;
        io.write_all(b"\r\n").await?;
        Ok((size_line.len() + piece.len() + 2) as u64)
    } else {
        io.write_all(piece).await?;
        Ok(piece.len() as u64)
    }
}

/// Serializes an engine-level error response (parse failures, oversize)
/// that never reached the pipeline. Always closes.
pub async fn write_error<W>(
    io: &mut W,
    status: http::StatusCode,
    version: HttpVersion,
    secure: bool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut resp = Response::status_page(status);
    resp.keep_alive = false;
    apply_common_headers(&mut resp, secure);
    write_response(io, &resp, version, false, false, 0, &BufferPool::new(1024, 1)).await?;
    Ok(())
}
