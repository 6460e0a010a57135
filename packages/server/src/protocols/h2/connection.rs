//! HTTP/2 connection loop
//!
//! Frames are processed sequentially on the connection task. Flow-control
//! checks run before any stream state advances; response bodies are
//! chunked to whatever the windows allow and park on the stream until
//! WINDOW_UPDATE credits arrive. Inbound frame length is bounded only by
//! the RFC maximum at parse time, so an oversized DATA burst trips flow
//! control rather than a frame-size check.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Result, ServerError};
use crate::http::escape::percent_decode;
use crate::http::{HttpVersion, Request, Response, ResponseBody};
use crate::routing::{Pipeline, RouteOutcome};
use crate::util;

use super::flow::FlowWindow;
use super::frame::{self, FrameHeader};
use super::hpack;
use super::settings::{DEFAULT_WINDOW_SIZE, Settings};
use super::stream::Stream;
use super::{ErrorCode, PREFACE};

/// Chunk size when refilling a response body from disk.
const FILE_READ_CHUNK: usize = 64 * 1024;

/// Response body still being pushed through a stream.
enum BodySource {
    Done,
    File {
        file: tokio::fs::File,
        remaining: u64,
        gzip: Option<crate::http::compression::StreamingGzip>,
    },
}

/// What the connection loop woke up for.
enum Event {
    Frame(FrameHeader, Bytes),
    Sse(u32, Bytes),
    PeerClosed,
}

/// One HTTP/2 connection.
pub struct H2Connection<S> {
    io: S,
    pipeline: Arc<Pipeline>,
    remote: SocketAddr,
    secure: bool,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
    local_settings: Settings,
    peer_settings: Settings,
    streams: HashMap<u32, Stream>,
    body_sources: HashMap<u32, BodySource>,
    conn_recv: FlowWindow,
    conn_send: FlowWindow,
    highest_stream_id: u32,
    peer_goaway: bool,
    sse_tx: mpsc::Sender<(u32, Bytes)>,
    sse_rx: mpsc::Receiver<(u32, Bytes)>,
    started: std::time::Instant,
    requests: u32,
    bytes_received: u64,
    bytes_sent: u64,
}

impl<S> H2Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[must_use]
    pub fn new(io: S, remote: SocketAddr, secure: bool, pipeline: Arc<Pipeline>) -> Self {
        let local_settings = Settings::server_defaults();
        let peer_settings = Settings::default();
        let (sse_tx, sse_rx) = mpsc::channel(64);
        Self {
            io,
            pipeline,
            remote,
            secure,
            encoder: hpack::Encoder::new(peer_settings.header_table_size as usize),
            decoder: hpack::Decoder::new(local_settings.header_table_size as usize),
            local_settings,
            peer_settings,
            streams: HashMap::new(),
            body_sources: HashMap::new(),
            conn_recv: FlowWindow::new(DEFAULT_WINDOW_SIZE),
            conn_send: FlowWindow::new(DEFAULT_WINDOW_SIZE),
            highest_stream_id: 0,
            peer_goaway: false,
            sse_tx,
            sse_rx,
            started: std::time::Instant::now(),
            requests: 0,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Runs the connection. `preface_consumed` is true when the plaintext
    /// demultiplexer already ate the 24-byte preface; over TLS/ALPN the
    /// engine reads it here.
    pub async fn run(mut self, preface_consumed: bool) -> Result<()> {
        let result = self.run_inner(preface_consumed).await;
        self.record_connection();
        result
    }

    async fn run_inner(&mut self, preface_consumed: bool) -> Result<()> {
        if !preface_consumed && !self.read_preface().await? {
            self.send_goaway(ErrorCode::Protocol, "Invalid preface").await?;
            return Ok(());
        }

        let payload = self.local_settings.encode();
        self.write_frame(frame::FRAME_SETTINGS, 0, 0, &payload).await?;

        loop {
            let event = {
                let io = &mut self.io;
                let sse_rx = &mut self.sse_rx;
                tokio::select! {
                    frame = read_frame(io) => frame,
                    event = sse_rx.recv() => match event {
                        Some((stream_id, bytes)) => Ok(Event::Sse(stream_id, bytes)),
                        None => continue,
                    },
                }
            };

            let result = match event {
                Ok(Event::PeerClosed) => break,
                Ok(Event::Sse(stream_id, bytes)) => self.push_sse(stream_id, bytes).await,
                Ok(Event::Frame(header, payload)) => {
                    self.bytes_received += (frame::HEADER_LEN + payload.len()) as u64;
                    self.handle_frame(header, payload).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {}
                Err(ServerError::H2Stream { stream_id, code, reason }) => {
                    tracing::debug!(remote = %self.remote, stream_id, %code, reason, "stream error");
                    self.reset_stream(stream_id, code).await?;
                }
                Err(ServerError::H2Connection { code, reason }) => {
                    tracing::debug!(remote = %self.remote, %code, reason, "connection error");
                    self.send_goaway(code, &reason).await?;
                    return Ok(());
                }
                Err(e) if e.is_disconnect() => break,
                Err(e) => return Err(e),
            }

            if self.drained() {
                if self.pipeline.shutdown().is_shutting_down() {
                    self.send_goaway(ErrorCode::NoError, "shutting down").await?;
                    return Ok(());
                }
                if self.peer_goaway {
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_preface(&mut self) -> Result<bool> {
        let mut buf = [0u8; PREFACE.len()];
        match self.io.read_exact(&mut buf).await {
            Ok(_) => Ok(buf == *PREFACE),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_frame(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        match header.kind {
            frame::FRAME_SETTINGS => self.on_settings(&header, &payload).await,
            frame::FRAME_PING => self.on_ping(&header, &payload).await,
            frame::FRAME_HEADERS => self.on_headers(header, payload).await,
            frame::FRAME_DATA => self.on_data(header, payload).await,
            frame::FRAME_PRIORITY => self.on_priority(&header, &payload),
            frame::FRAME_RST_STREAM => self.on_rst_stream(&header, &payload),
            frame::FRAME_WINDOW_UPDATE => self.on_window_update(&header, &payload).await,
            frame::FRAME_GOAWAY => {
                self.peer_goaway = true;
                Ok(())
            }
            frame::FRAME_PUSH_PROMISE => {
                // A client must not push; observed behavior is to log and
                // carry on rather than the GOAWAY the RFC calls for.
                tracing::warn!(remote = %self.remote, "ignoring PUSH_PROMISE from client");
                Ok(())
            }
            frame::FRAME_CONTINUATION => Err(ServerError::h2_connection(
                ErrorCode::Protocol,
                "CONTINUATION is not supported",
            )),
            _ => Ok(()), // unknown frame types are ignored
        }
    }

    async fn on_settings(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if header.stream_id != 0 {
            return Err(ServerError::h2_connection(
                ErrorCode::Protocol,
                "SETTINGS on a stream",
            ));
        }
        if header.has_flag(frame::FLAG_ACK) {
            if !payload.is_empty() {
                return Err(ServerError::h2_connection(
                    ErrorCode::FrameSize,
                    "SETTINGS ACK with payload",
                ));
            }
            return Ok(());
        }

        let window_delta = self.peer_settings.apply(payload)?;
        if window_delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window.adjust(window_delta)?;
            }
        }
        self.encoder
            .set_capacity(self.peer_settings.header_table_size as usize);

        self.write_frame(frame::FRAME_SETTINGS, frame::FLAG_ACK, 0, &[]).await
    }

    async fn on_ping(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if header.stream_id != 0 {
            return Err(ServerError::h2_connection(ErrorCode::Protocol, "PING on a stream"));
        }
        if payload.len() != 8 {
            return Err(ServerError::h2_connection(
                ErrorCode::FrameSize,
                "PING payload must be 8 bytes",
            ));
        }
        if header.has_flag(frame::FLAG_ACK) {
            return Ok(());
        }
        self.write_frame(frame::FRAME_PING, frame::FLAG_ACK, 0, payload).await
    }

    async fn on_headers(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 || stream_id % 2 == 0 {
            return Err(ServerError::h2_connection(
                ErrorCode::Protocol,
                "HEADERS on an invalid stream id",
            ));
        }
        if !header.has_flag(frame::FLAG_END_HEADERS) {
            return Err(ServerError::h2_connection(
                ErrorCode::Protocol,
                "fragmented header blocks are not supported",
            ));
        }

        let mut fragment = &payload[..];
        if header.has_flag(frame::FLAG_PADDED) {
            if fragment.is_empty() {
                return Err(ServerError::h2_connection(ErrorCode::Protocol, "bad padding"));
            }
            let pad = fragment[0] as usize;
            fragment = &fragment[1..];
            if pad >= fragment.len() + 1 {
                return Err(ServerError::h2_connection(
                    ErrorCode::Protocol,
                    "padding exceeds payload",
                ));
            }
            fragment = &fragment[..fragment.len() - pad];
        }
        let mut weight = None;
        if header.has_flag(frame::FLAG_PRIORITY) {
            if fragment.len() < 5 {
                return Err(ServerError::h2_connection(
                    ErrorCode::FrameSize,
                    "truncated priority block",
                ));
            }
            weight = Some(fragment[4]);
            fragment = &fragment[5..];
        }

        if self.pipeline.shutdown().is_shutting_down() && !self.streams.contains_key(&stream_id) {
            return Err(ServerError::h2_stream(
                stream_id,
                ErrorCode::RefusedStream,
                "shutting down",
            ));
        }

        let headers = match self.decoder.decode(fragment) {
            Ok(headers) => headers,
            Err(e) => {
                return Err(ServerError::h2_stream(
                    stream_id,
                    ErrorCode::Compression,
                    e.to_string(),
                ));
            }
        };

        let end_stream = header.has_flag(frame::FLAG_END_STREAM);
        let stream = self.streams.entry(stream_id).or_insert_with(|| {
            Stream::new(
                stream_id,
                DEFAULT_WINDOW_SIZE,
                self.peer_settings.initial_window_size,
            )
        });
        stream.recv_headers(end_stream)?;
        stream.request_headers = headers;
        if let Some(weight) = weight {
            stream.weight = weight;
        }
        self.highest_stream_id = self.highest_stream_id.max(stream_id);

        if self.streams[&stream_id].request_complete() {
            self.dispatch(stream_id).await?;
        }
        Ok(())
    }

    async fn on_data(&mut self, header: FrameHeader, payload: Bytes) -> Result<()> {
        let stream_id = header.stream_id;
        if stream_id == 0 {
            return Err(ServerError::h2_connection(ErrorCode::Protocol, "DATA on stream 0"));
        }
        if !self.streams.contains_key(&stream_id) {
            if stream_id <= self.highest_stream_id {
                return Err(ServerError::h2_stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "DATA on a closed stream",
                ));
            }
            return Err(ServerError::h2_connection(ErrorCode::Protocol, "DATA on idle stream"));
        }

        // Both windows are checked before anything advances; only then do
        // the decrements happen.
        let len = header.length;
        if !self.conn_recv.can_consume(len) {
            return Err(ServerError::h2_connection(
                ErrorCode::FlowControl,
                format!("connection window exhausted by {len} byte DATA"),
            ));
        }
        let stream = self.streams.get_mut(&stream_id).expect("checked above");
        if !stream.recv_window.can_consume(len) {
            return Err(ServerError::h2_stream(
                stream_id,
                ErrorCode::FlowControl,
                format!("stream window exhausted by {len} byte DATA"),
            ));
        }
        self.conn_recv.consume(len);
        stream.recv_window.consume(len);

        let mut fragment = &payload[..];
        if header.has_flag(frame::FLAG_PADDED) {
            if fragment.is_empty() {
                return Err(ServerError::h2_connection(ErrorCode::Protocol, "bad padding"));
            }
            let pad = fragment[0] as usize;
            fragment = &fragment[1..];
            if pad >= fragment.len() + 1 {
                return Err(ServerError::h2_connection(
                    ErrorCode::Protocol,
                    "padding exceeds payload",
                ));
            }
            fragment = &fragment[..fragment.len() - pad];
        }

        let end_stream = header.has_flag(frame::FLAG_END_STREAM);
        stream.recv_data(end_stream)?;
        stream.body.extend_from_slice(fragment);
        let body_len = stream.body.len() as u64;

        // Replenish what the buffered body consumed.
        if len > 0 {
            self.conn_recv.credit(len, 0)?;
            self.write_window_update(0, len).await?;
            if !end_stream
                && let Some(stream) = self.streams.get_mut(&stream_id)
            {
                stream.recv_window.credit(len, stream_id)?;
                self.write_window_update(stream_id, len).await?;
            }
        }

        if body_len > self.pipeline.config().limits.max_body_bytes {
            let resp = Response::status_page(http::StatusCode::PAYLOAD_TOO_LARGE);
            self.send_response(stream_id, resp, false).await?;
            self.reset_stream(stream_id, ErrorCode::Cancel).await?;
            return Ok(());
        }

        if self
            .streams
            .get(&stream_id)
            .is_some_and(Stream::request_complete)
        {
            self.dispatch(stream_id).await?;
        }
        Ok(())
    }

    fn on_priority(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if header.stream_id == 0 {
            return Err(ServerError::h2_connection(ErrorCode::Protocol, "PRIORITY on stream 0"));
        }
        if payload.len() != 5 {
            return Err(ServerError::h2_stream(
                header.stream_id,
                ErrorCode::FrameSize,
                "PRIORITY payload must be 5 bytes",
            ));
        }
        if let Some(stream) = self.streams.get_mut(&header.stream_id) {
            stream.weight = payload[4];
        }
        Ok(())
    }

    fn on_rst_stream(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if header.stream_id == 0 {
            return Err(ServerError::h2_connection(ErrorCode::Protocol, "RST_STREAM on stream 0"));
        }
        if payload.len() != 4 {
            return Err(ServerError::h2_connection(
                ErrorCode::FrameSize,
                "RST_STREAM payload must be 4 bytes",
            ));
        }
        self.cleanup_stream(header.stream_id);
        Ok(())
    }

    async fn on_window_update(&mut self, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        if payload.len() != 4 {
            return Err(ServerError::h2_connection(
                ErrorCode::FrameSize,
                "WINDOW_UPDATE payload must be 4 bytes",
            ));
        }
        let increment =
            u32::from_be_bytes([payload[0] & 0x7F, payload[1], payload[2], payload[3]]);
        if increment == 0 {
            return Err(if header.stream_id == 0 {
                ServerError::h2_connection(ErrorCode::Protocol, "zero WINDOW_UPDATE")
            } else {
                ServerError::h2_stream(
                    header.stream_id,
                    ErrorCode::Protocol,
                    "zero WINDOW_UPDATE",
                )
            });
        }

        if header.stream_id == 0 {
            self.conn_send.credit(increment, 0)?;
            let ids: Vec<u32> = self
                .streams
                .iter()
                .filter(|(_, s)| s.pending.is_some())
                .map(|(id, _)| *id)
                .collect();
            for id in ids {
                self.flush_stream(id).await?;
            }
        } else if self.streams.contains_key(&header.stream_id) {
            {
                let stream = self.streams.get_mut(&header.stream_id).expect("checked");
                stream.send_window.credit(increment, header.stream_id)?;
            }
            self.flush_stream(header.stream_id).await?;
        }
        Ok(())
    }

    /// Builds the logical request for a completed stream and runs it
    /// through the pipeline.
    async fn dispatch(&mut self, stream_id: u32) -> Result<()> {
        self.requests += 1;
        let (headers, body) = {
            let stream = self.streams.get_mut(&stream_id).expect("dispatch on live stream");
            let headers = std::mem::take(&mut stream.request_headers);
            let body = stream.body.split().freeze();
            (headers, body)
        };

        let mut method = None;
        let mut path = None;
        let mut authority = None;
        let mut header_map = http::HeaderMap::new();
        for (name, value) in &headers {
            match name.as_str() {
                ":method" => method = Method::from_bytes(value.as_bytes()).ok(),
                ":path" => path = Some(value.clone()),
                ":authority" => authority = Some(value.clone()),
                ":scheme" => {}
                pseudo if pseudo.starts_with(':') => {
                    return Err(ServerError::h2_stream(
                        stream_id,
                        ErrorCode::Protocol,
                        format!("unknown pseudo header {pseudo}"),
                    ));
                }
                _ => {
                    let (Ok(name), Ok(value)) = (
                        http::HeaderName::from_bytes(name.as_bytes()),
                        http::HeaderValue::from_str(value),
                    ) else {
                        return Err(ServerError::h2_stream(
                            stream_id,
                            ErrorCode::Protocol,
                            "malformed header field",
                        ));
                    };
                    header_map.append(name, value);
                }
            }
        }
        let (Some(method), Some(target)) = (method, path) else {
            return Err(ServerError::h2_stream(
                stream_id,
                ErrorCode::Protocol,
                "missing :method or :path",
            ));
        };
        if let Some(authority) = authority
            && !header_map.contains_key(http::header::HOST)
            && let Ok(value) = http::HeaderValue::from_str(&authority)
        {
            header_map.insert(http::header::HOST, value);
        }

        let (raw_path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.clone(), None),
        };

        let is_head = method == Method::HEAD;
        let request = Request {
            method,
            target,
            path: percent_decode(&raw_path, false),
            query,
            version: HttpVersion::H2,
            headers: header_map,
            body: if body.is_empty() { None } else { Some(body) },
            remote_addr: self.remote,
            request_id: util::request_id(),
            secure: self.secure,
        };

        match self.pipeline.handle(request).await {
            RouteOutcome::Response(resp) => self.send_response(stream_id, resp, is_head).await,
            RouteOutcome::WebSocket { .. } => {
                // The pipeline never offers an upgrade on an H2 request.
                let resp = Response::status_page(http::StatusCode::BAD_REQUEST);
                self.send_response(stream_id, resp, false).await
            }
            RouteOutcome::Sse { topic } => self.start_sse(stream_id, &topic).await,
        }
    }

    /// Emits HEADERS and queues the body for window-gated emission.
    async fn send_response(
        &mut self,
        stream_id: u32,
        resp: Response,
        is_head: bool,
    ) -> Result<()> {
        let streaming_gzip =
            resp.compressed && matches!(resp.body, ResponseBody::File(_)) && !is_head;

        let mut fields: Vec<(String, String)> =
            vec![(":status".to_string(), resp.status.as_u16().to_string())];
        for (name, value) in &resp.headers {
            if connection_specific(name.as_str()) {
                continue;
            }
            fields.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or("").to_string(),
            ));
        }
        let body_len = resp.body.len();
        let no_length = resp.status.is_informational()
            || resp.status == http::StatusCode::NO_CONTENT
            || resp.status == http::StatusCode::NOT_MODIFIED;
        if !no_length && !streaming_gzip {
            fields.push(("content-length".to_string(), body_len.to_string()));
        }

        let block = self.encoder.encode(&fields);
        let end_stream = is_head || no_length || body_len == 0;
        let flags = frame::FLAG_END_HEADERS
            | if end_stream { frame::FLAG_END_STREAM } else { 0 };
        self.write_frame(frame::FRAME_HEADERS, flags, stream_id, &block).await?;

        if end_stream {
            self.finish_stream(stream_id);
            return Ok(());
        }

        match resp.body {
            ResponseBody::Empty => unreachable!("empty body ends the stream above"),
            ResponseBody::Bytes(bytes) => {
                let stream = self
                    .streams
                    .get_mut(&stream_id)
                    .expect("responding on live stream");
                stream.pending = Some(super::stream::PendingData {
                    buf: BytesMut::from(&bytes[..]),
                    end_stream: true,
                });
                self.body_sources.insert(stream_id, BodySource::Done);
            }
            ResponseBody::File(slice) => {
                let mut file = tokio::fs::File::open(&slice.path).await?;
                if slice.offset > 0 {
                    use tokio::io::AsyncSeekExt;
                    file.seek(std::io::SeekFrom::Start(slice.offset)).await?;
                }
                let gzip = streaming_gzip.then(crate::http::compression::StreamingGzip::new);
                self.body_sources.insert(
                    stream_id,
                    BodySource::File { file, remaining: slice.len, gzip },
                );
                let stream = self
                    .streams
                    .get_mut(&stream_id)
                    .expect("responding on live stream");
                stream.pending = Some(super::stream::PendingData {
                    buf: BytesMut::new(),
                    end_stream: true,
                });
            }
        }

        self.flush_stream(stream_id).await
    }

    /// Pushes as much pending response data as the windows allow.
    async fn flush_stream(&mut self, stream_id: u32) -> Result<()> {
        enum Action {
            Park,
            Finish { end_stream: bool },
            Send { chunk: BytesMut, last: bool, end_stream: bool },
        }

        loop {
            {
                let Some(stream) = self.streams.get(&stream_id) else {
                    return Ok(());
                };
                if stream.pending.is_none() {
                    return Ok(());
                }
            }
            self.refill_body(stream_id).await?;
            let source_done = matches!(
                self.body_sources.get(&stream_id),
                None | Some(BodySource::Done)
            );

            let conn_window = self.conn_send.available();
            let max_frame = self.peer_settings.max_frame_size as i32;
            let action = {
                let stream = self.streams.get_mut(&stream_id).expect("checked above");
                let pending = stream.pending.as_mut().expect("checked above");
                if pending.buf.is_empty() {
                    if source_done {
                        Action::Finish { end_stream: pending.end_stream }
                    } else {
                        Action::Park
                    }
                } else {
                    let window = conn_window.min(stream.send_window.available()).min(max_frame);
                    if window <= 0 {
                        Action::Park
                    } else {
                        let n = (window as usize).min(pending.buf.len());
                        let chunk = pending.buf.split_to(n);
                        let last = pending.buf.is_empty() && source_done;
                        stream.send_window.consume(n as u32);
                        Action::Send { chunk, last, end_stream: pending.end_stream }
                    }
                }
            };

            match action {
                // Parked until WINDOW_UPDATE credits or more SSE events.
                Action::Park => return Ok(()),
                Action::Finish { end_stream } => {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream.pending = None;
                    }
                    if end_stream {
                        self.write_frame(frame::FRAME_DATA, frame::FLAG_END_STREAM, stream_id, &[])
                            .await?;
                        self.finish_stream(stream_id);
                    }
                    return Ok(());
                }
                Action::Send { chunk, last, end_stream } => {
                    self.conn_send.consume(chunk.len() as u32);
                    let flags =
                        if last && end_stream { frame::FLAG_END_STREAM } else { 0 };
                    self.write_frame(frame::FRAME_DATA, flags, stream_id, &chunk).await?;
                    if last {
                        if let Some(stream) = self.streams.get_mut(&stream_id) {
                            stream.pending = None;
                        }
                        if flags & frame::FLAG_END_STREAM != 0 {
                            self.finish_stream(stream_id);
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reads the next chunk of a file-backed body into the pending buffer,
    /// through the gzip encoder when the response is compressed.
    async fn refill_body(&mut self, stream_id: u32) -> Result<()> {
        let Some(mut source) = self.body_sources.remove(&stream_id) else {
            return Ok(());
        };
        let already_buffered = self
            .streams
            .get(&stream_id)
            .and_then(|s| s.pending.as_ref())
            .map_or(0, |p| p.buf.len());

        let mut collected = BytesMut::new();
        if let BodySource::File { file, remaining, gzip } = &mut source {
            while *remaining > 0 && already_buffered + collected.len() < FILE_READ_CHUNK {
                let want = FILE_READ_CHUNK.min(*remaining as usize);
                let mut chunk = vec![0u8; want];
                let n = file.read(&mut chunk).await?;
                if n == 0 {
                    *remaining = 0;
                    break;
                }
                *remaining -= n as u64;
                match gzip {
                    Some(encoder) => collected.extend_from_slice(&encoder.push(&chunk[..n])?),
                    None => collected.extend_from_slice(&chunk[..n]),
                }
            }
            if *remaining == 0 {
                if let Some(encoder) = gzip.take() {
                    collected.extend_from_slice(&encoder.finish()?);
                }
                source = BodySource::Done;
            }
        }
        self.body_sources.insert(stream_id, source);

        if let Some(stream) = self.streams.get_mut(&stream_id)
            && let Some(pending) = stream.pending.as_mut()
        {
            pending.buf.extend_from_slice(&collected);
        }
        Ok(())
    }

    /// Registers an SSE subscription whose events drain as DATA frames.
    async fn start_sse(&mut self, stream_id: u32, topic: &str) -> Result<()> {
        match self.pipeline.sse_hub().register(topic, self.remote.ip()) {
            Ok((conn, mut rx)) => {
                let fields = vec![
                    (":status".to_string(), "200".to_string()),
                    ("content-type".to_string(), "text/event-stream".to_string()),
                    ("cache-control".to_string(), "no-cache".to_string()),
                ];
                let block = self.encoder.encode(&fields);
                self.write_frame(
                    frame::FRAME_HEADERS,
                    frame::FLAG_END_HEADERS,
                    stream_id,
                    &block,
                )
                .await?;

                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream.sse_topic = Some(topic.to_string());
                    stream.sse_connection_id = Some(conn.id);
                }
                let funnel = self.sse_tx.clone();
                tokio::spawn(async move {
                    while let Some(bytes) = rx.recv().await {
                        if funnel.send((stream_id, bytes)).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(())
            }
            Err(reason) => {
                tracing::debug!(remote = %self.remote, topic, ?reason, "sse subscribe refused");
                let resp = Response::unavailable();
                self.send_response(stream_id, resp, false).await
            }
        }
    }

    /// Queues one SSE event as window-gated DATA.
    async fn push_sse(&mut self, stream_id: u32, bytes: Bytes) -> Result<()> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(()); // subscriber already torn down
        };
        let pending = stream.pending.get_or_insert_with(Default::default);
        pending.buf.extend_from_slice(&bytes);
        self.flush_stream(stream_id).await
    }

    /// Marks the server side done and drops fully closed streams.
    fn finish_stream(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.send_end_stream();
            if stream.is_closed() {
                self.cleanup_stream(stream_id);
            }
        }
    }

    async fn reset_stream(&mut self, stream_id: u32, code: ErrorCode) -> Result<()> {
        let payload = code.as_u32().to_be_bytes();
        self.write_frame(frame::FRAME_RST_STREAM, 0, stream_id, &payload).await?;
        self.cleanup_stream(stream_id);
        Ok(())
    }

    fn cleanup_stream(&mut self, stream_id: u32) {
        if let Some(stream) = self.streams.remove(&stream_id)
            && let (Some(topic), Some(conn_id)) = (stream.sse_topic, stream.sse_connection_id)
        {
            self.pipeline.sse_hub().unregister(&topic, conn_id);
        }
        self.body_sources.remove(&stream_id);
    }

    async fn send_goaway(&mut self, code: ErrorCode, debug: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(8 + debug.len());
        payload.extend_from_slice(&(self.highest_stream_id & 0x7FFF_FFFF).to_be_bytes());
        payload.extend_from_slice(&code.as_u32().to_be_bytes());
        payload.extend_from_slice(debug.as_bytes());
        self.write_frame(frame::FRAME_GOAWAY, 0, 0, &payload).await
    }

    async fn write_window_update(&mut self, stream_id: u32, increment: u32) -> Result<()> {
        let payload = (increment & 0x7FFF_FFFF).to_be_bytes();
        self.write_frame(frame::FRAME_WINDOW_UPDATE, 0, stream_id, &payload).await
    }

    async fn write_frame(
        &mut self,
        kind: u8,
        flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> Result<()> {
        let mut buf = BytesMut::with_capacity(frame::HEADER_LEN + payload.len());
        frame::encode_frame(&mut buf, kind, flags, stream_id, payload);
        self.io.write_all(&buf).await?;
        self.io.flush().await?;
        self.bytes_sent += buf.len() as u64;
        Ok(())
    }

    /// No live streams and no parked response data.
    fn drained(&self) -> bool {
        self.streams.is_empty()
    }

    fn record_connection(&self) {
        if !self.pipeline.config().features.metrics {
            return;
        }
        let metrics = self.pipeline.metrics();
        metrics.histogram_observe("stratus_connection_requests", &[], f64::from(self.requests));
        metrics.histogram_observe(
            "stratus_connection_duration_ms",
            &[],
            self.started.elapsed().as_secs_f64() * 1000.0,
        );
        metrics.counter_add("stratus_bytes_received_total", &[], self.bytes_received);
        metrics.counter_add("stratus_bytes_sent_total", &[], self.bytes_sent);
    }
}

/// Headers that have no place on the HTTP/2 wire.
fn connection_specific(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "upgrade"
    )
}

/// Reads one frame from the socket. EOF at a frame boundary is a clean
/// peer close.
async fn read_frame<S: AsyncRead + Unpin>(io: &mut S) -> Result<Event> {
    let mut head = [0u8; frame::HEADER_LEN];
    let mut filled = 0;
    while filled < head.len() {
        let n = io.read(&mut head[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(Event::PeerClosed);
            }
            return Err(ServerError::ConnectionClosed);
        }
        filled += n;
    }
    let header = frame::parse_header(&head);
    if header.length > frame::MAX_FRAME_PAYLOAD {
        return Err(ServerError::h2_connection(
            ErrorCode::FrameSize,
            "frame length above the protocol maximum",
        ));
    }
    let mut payload = vec![0u8; header.length as usize];
    io.read_exact(&mut payload).await?;
    Ok(Event::Frame(header, Bytes::from(payload)))
}
