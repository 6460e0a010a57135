//! HTTP/1.1 keep-alive connection loop
//!
//! Strictly sequential: read a head, bound and read the body, run the
//! pipeline, write the response, then loop while keep-alive holds, the
//! per-connection request budget lasts, and the server is not draining.
//! Parse errors answer 400 and close; limit violations answer 413 and
//! close; an idle timeout closes silently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;

use crate::error::{Result, ServerError};
use crate::http::escape::percent_decode;
use crate::http::{HttpVersion, Request};
use crate::protocols::{sse, ws};
use crate::routing::{Pipeline, RouteOutcome};
use crate::util;

use super::parser::{self, ParseStatus};
use super::writer;

/// Per-connection accounting reported to the collector on exit.
#[derive(Debug, Default)]
struct ConnStats {
    requests: u32,
    bytes_received: u64,
    bytes_sent: u64,
}

/// Serves one plaintext or TLS connection that demuxed to HTTP/1.1.
pub async fn serve<S>(
    mut io: S,
    remote: SocketAddr,
    secure: bool,
    pipeline: Arc<Pipeline>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let limits = pipeline.config().limits.clone();
    let started = Instant::now();
    let mut stats = ConnStats::default();
    let mut buf = BytesMut::with_capacity(8 * 1024);

    loop {
        // Read until a complete head or a limit trips.
        let head = loop {
            match parser::parse_head(&buf, &limits) {
                Ok(ParseStatus::Complete(head, consumed)) => {
                    let _ = buf.split_to(consumed);
                    break *head;
                }
                Ok(ParseStatus::Partial) => {}
                Err(ServerError::TooLarge { .. }) => {
                    writer::write_error(&mut io, StatusCode::PAYLOAD_TOO_LARGE, HttpVersion::Http11, secure)
                        .await?;
                    record_connection(&pipeline, &stats, started);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(%remote, error = %e, "request parse failed");
                    writer::write_error(&mut io, StatusCode::BAD_REQUEST, HttpVersion::Http11, secure)
                        .await?;
                    record_connection(&pipeline, &stats, started);
                    return Ok(());
                }
            }

            let read = match timeout(limits.idle_timeout, io.read_buf(&mut buf)).await {
                // Idle keep-alive connections close without an error body.
                Err(_) => {
                    record_connection(&pipeline, &stats, started);
                    return Ok(());
                }
                Ok(result) => result?,
            };
            if read == 0 {
                if !buf.is_empty() {
                    writer::write_error(&mut io, StatusCode::BAD_REQUEST, HttpVersion::Http11, secure)
                        .await?;
                }
                record_connection(&pipeline, &stats, started);
                return Ok(());
            }
            stats.bytes_received += read as u64;
        };

        stats.requests += 1;
        let version = head.version;

        // Path and query split before any body byte is consumed.
        let (raw_path, query) = match head.target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (head.target.clone(), None),
        };
        let path = percent_decode(&raw_path, false);

        let content_length = head
            .headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let needs_body = matches!(head.method, Method::POST | Method::PUT | Method::PATCH);
        let body = match content_length {
            Some(len) if len > limits.max_body_bytes => {
                writer::write_error(&mut io, StatusCode::PAYLOAD_TOO_LARGE, version, secure).await?;
                record_connection(&pipeline, &stats, started);
                return Ok(());
            }
            Some(0) | None if needs_body => {
                if content_length.is_none() {
                    writer::write_error(&mut io, StatusCode::LENGTH_REQUIRED, version, secure)
                        .await?;
                    record_connection(&pipeline, &stats, started);
                    return Ok(());
                }
                Some(Bytes::new())
            }
            Some(0) | None => None,
            Some(len) => {
                Some(read_body(&mut io, &mut buf, len as usize, &mut stats).await?)
            }
        };

        let is_head = head.method == Method::HEAD;
        let request = Request {
            method: head.method,
            target: head.target,
            path,
            query,
            version,
            headers: head.headers,
            body,
            remote_addr: remote,
            request_id: util::request_id(),
            secure,
        };
        let client_keep_alive = request.keep_alive();

        match pipeline.handle(request).await {
            RouteOutcome::Response(resp) => {
                let reuse_wanted = resp.keep_alive
                    && client_keep_alive
                    && stats.requests < limits.max_requests_per_connection
                    && !pipeline.shutdown().is_shutting_down();
                let outcome = writer::write_response(
                    &mut io,
                    &resp,
                    version,
                    is_head,
                    reuse_wanted,
                    limits.max_requests_per_connection,
                    pipeline.buffer_pool(),
                )
                .await?;
                stats.bytes_sent += outcome.bytes_sent;
                if !outcome.keep_alive {
                    break;
                }
            }
            RouteOutcome::WebSocket { response } => {
                let outcome = writer::write_response(
                    &mut io,
                    &response,
                    version,
                    false,
                    false,
                    limits.max_requests_per_connection,
                    pipeline.buffer_pool(),
                )
                .await?;
                stats.bytes_sent += outcome.bytes_sent;
                record_connection(&pipeline, &stats, started);
                return ws::WsConnection::run(io, remote, Arc::new(ws::EchoHandler)).await;
            }
            RouteOutcome::Sse { topic } => {
                record_connection(&pipeline, &stats, started);
                return sse::serve_h1(io, &topic, pipeline.sse_hub(), remote, pipeline.shutdown())
                    .await;
            }
        }
    }

    record_connection(&pipeline, &stats, started);
    Ok(())
}

/// Reads exactly `len` body bytes, draining whatever the head read
/// already buffered.
async fn read_body<S>(
    io: &mut S,
    buf: &mut BytesMut,
    len: usize,
    stats: &mut ConnStats,
) -> Result<Bytes>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < len {
        let read = io.read_buf(buf).await?;
        if read == 0 {
            return Err(ServerError::ConnectionClosed);
        }
        stats.bytes_received += read as u64;
    }
    Ok(buf.split_to(len).freeze())
}

fn record_connection(pipeline: &Pipeline, stats: &ConnStats, started: Instant) {
    if !pipeline.config().features.metrics {
        return;
    }
    let metrics = pipeline.metrics();
    metrics.histogram_observe("stratus_connection_requests", &[], f64::from(stats.requests));
    metrics.histogram_observe(
        "stratus_connection_duration_ms",
        &[],
        started.elapsed().as_secs_f64() * 1000.0,
    );
    metrics.counter_add("stratus_bytes_received_total", &[], stats.bytes_received);
    metrics.counter_add("stratus_bytes_sent_total", &[], stats.bytes_sent);
}
