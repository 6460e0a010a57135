//! HTTP/2 engine integration tests
//!
//! A hand-rolled client side: raw frames over an in-memory connection,
//! headers encoded with the same HPACK implementation the server uses.

mod common;

use bytes::BytesMut;
use common::pipeline_with;
use stratus_server::protocols::h2::frame::{
    self, FLAG_ACK, FLAG_END_HEADERS, FLAG_END_STREAM, FRAME_DATA, FRAME_GOAWAY, FRAME_HEADERS,
    FRAME_PING, FRAME_SETTINGS, HEADER_LEN,
};
use stratus_server::protocols::h2::hpack;
use stratus_server::protocols::h2::{H2Connection, PREFACE};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

struct H2Client {
    io: DuplexStream,
    decoder: hpack::Decoder,
    encoder: hpack::Encoder,
}

#[derive(Debug)]
struct RawFrame {
    kind: u8,
    flags: u8,
    stream_id: u32,
    payload: Vec<u8>,
}

impl H2Client {
    async fn connect(pipeline: std::sync::Arc<stratus_server::routing::Pipeline>) -> Self {
        let (client, server) = tokio::io::duplex(4 * 1024 * 1024);
        let remote = common::CLIENT_ADDR.parse().unwrap();
        tokio::spawn(H2Connection::new(server, remote, false, pipeline).run(true));

        let mut this = Self {
            io: client,
            decoder: hpack::Decoder::new(4096),
            encoder: hpack::Encoder::new(4096),
        };
        // The engine expects the preface consumed by the demux; nothing
        // to send here. Open with an empty SETTINGS frame.
        this.send_frame(FRAME_SETTINGS, 0, 0, &[]).await;
        this
    }

    async fn connect_with_preface(
        pipeline: std::sync::Arc<stratus_server::routing::Pipeline>,
    ) -> Self {
        let (client, server) = tokio::io::duplex(4 * 1024 * 1024);
        let remote = common::CLIENT_ADDR.parse().unwrap();
        tokio::spawn(H2Connection::new(server, remote, false, pipeline).run(false));

        let mut this = Self {
            io: client,
            decoder: hpack::Decoder::new(4096),
            encoder: hpack::Encoder::new(4096),
        };
        this.io.write_all(PREFACE).await.unwrap();
        this.send_frame(FRAME_SETTINGS, 0, 0, &[]).await;
        this
    }

    async fn send_frame(&mut self, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
        let mut buf = BytesMut::new();
        frame::encode_frame(&mut buf, kind, flags, stream_id, payload);
        self.io.write_all(&buf).await.unwrap();
    }

    async fn send_request(&mut self, stream_id: u32, method: &str, path: &str, end_stream: bool) {
        let fields = vec![
            (":method".to_string(), method.to_string()),
            (":path".to_string(), path.to_string()),
            (":scheme".to_string(), "https".to_string()),
            (":authority".to_string(), "x".to_string()),
        ];
        let block = self.encoder.encode(&fields);
        let flags = FLAG_END_HEADERS | if end_stream { FLAG_END_STREAM } else { 0 };
        self.send_frame(FRAME_HEADERS, flags, stream_id, &block).await;
    }

    async fn read_frame(&mut self) -> RawFrame {
        let mut head = [0u8; HEADER_LEN];
        self.io.read_exact(&mut head).await.unwrap();
        let parsed = frame::parse_header(&head);
        let mut payload = vec![0u8; parsed.length as usize];
        self.io.read_exact(&mut payload).await.unwrap();
        RawFrame {
            kind: parsed.kind,
            flags: parsed.flags,
            stream_id: parsed.stream_id,
            payload,
        }
    }

    /// Reads frames until one of `kind` arrives.
    async fn read_until(&mut self, kind: u8) -> RawFrame {
        loop {
            let frame = self.read_frame().await;
            if frame.kind == kind {
                return frame;
            }
        }
    }
}

#[tokio::test]
async fn minimal_exchange_settings_ack_then_response() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect(pipeline).await;

    // Server SETTINGS first.
    let settings = client.read_frame().await;
    assert_eq!(settings.kind, FRAME_SETTINGS);
    assert_eq!(settings.flags & FLAG_ACK, 0);
    assert_eq!(settings.stream_id, 0);

    // Then the ACK of our empty SETTINGS.
    let ack = client.read_frame().await;
    assert_eq!(ack.kind, FRAME_SETTINGS);
    assert_ne!(ack.flags & FLAG_ACK, 0);
    assert!(ack.payload.is_empty());

    // One GET; nothing exists under the default webroot, so 404.
    client.send_request(1, "GET", "/", true).await;

    let headers = client.read_until(FRAME_HEADERS).await;
    assert_eq!(headers.stream_id, 1);
    assert_ne!(headers.flags & FLAG_END_HEADERS, 0);
    let fields = client.decoder.decode(&headers.payload).unwrap();
    assert_eq!(fields[0], (":status".to_string(), "404".to_string()));

    if headers.flags & FLAG_END_STREAM == 0 {
        let data = client.read_until(FRAME_DATA).await;
        assert_eq!(data.stream_id, 1);
        // The final DATA frame ends the stream.
        let mut last = data;
        while last.flags & FLAG_END_STREAM == 0 {
            last = client.read_until(FRAME_DATA).await;
        }
    }
}

#[tokio::test]
async fn plaintext_preface_is_verified_by_the_engine() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect_with_preface(pipeline).await;
    client.send_request(1, "GET", "/health/live", true).await;
    let headers = client.read_until(FRAME_HEADERS).await;
    let fields = client.decoder.decode(&headers.payload).unwrap();
    assert_eq!(fields[0], (":status".to_string(), "200".to_string()));
}

#[tokio::test]
async fn oversized_data_burst_draws_flow_control_goaway() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect(pipeline).await;

    client.send_request(1, "POST", "/api/upload", false).await;

    // 70000 bytes against a 65535-byte connection window, no
    // WINDOW_UPDATE granted: flow control trips before anything else.
    let payload = vec![0x55u8; 70_000];
    client.send_frame(FRAME_DATA, 0, 1, &payload).await;

    let goaway = client.read_until(FRAME_GOAWAY).await;
    let error_code = u32::from_be_bytes([
        goaway.payload[4],
        goaway.payload[5],
        goaway.payload[6],
        goaway.payload[7],
    ]);
    assert_eq!(error_code, 3, "expected FLOW_CONTROL_ERROR");
}

#[tokio::test]
async fn ping_is_echoed_with_ack() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect(pipeline).await;

    let payload = *b"\x01\x02\x03\x04\x05\x06\x07\x08";
    client.send_frame(FRAME_PING, 0, 0, &payload).await;

    let pong = client.read_until(FRAME_PING).await;
    assert_ne!(pong.flags & FLAG_ACK, 0);
    assert_eq!(pong.payload, payload);
}

#[tokio::test]
async fn bad_ping_length_is_frame_size_goaway() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect(pipeline).await;

    client.send_frame(FRAME_PING, 0, 0, b"short").await;
    let goaway = client.read_until(FRAME_GOAWAY).await;
    let error_code = u32::from_be_bytes([
        goaway.payload[4],
        goaway.payload[5],
        goaway.payload[6],
        goaway.payload[7],
    ]);
    assert_eq!(error_code, 6, "expected FRAME_SIZE_ERROR");
}

#[tokio::test]
async fn post_body_is_dispatched_and_acknowledged() {
    let pipeline = pipeline_with(|_| {});
    let mut client = H2Client::connect(pipeline).await;

    client.send_request(1, "POST", "/api/data/items", false).await;
    client
        .send_frame(FRAME_DATA, FLAG_END_STREAM, 1, br#"{"k":"v"}"#)
        .await;

    let headers = client.read_until(FRAME_HEADERS).await;
    let fields = client.decoder.decode(&headers.payload).unwrap();
    assert_eq!(fields[0], (":status".to_string(), "201".to_string()));
}
