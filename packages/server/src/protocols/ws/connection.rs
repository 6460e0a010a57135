//! WebSocket connection lifecycle
//!
//! Runs the message loop after a successful upgrade: reassembles
//! fragmented messages, answers control frames, enforces the idle timeout
//! and message cap, and drives a handler through its capability set
//! (open, message, close, error). Reads and writes are each serialized;
//! the write lock lets control replies interleave with data replies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Result, ServerError};

use super::close;
use super::frame::{
    self, Frame, OP_BINARY, OP_CLOSE, OP_CONTINUATION, OP_PING, OP_PONG, OP_TEXT,
};

/// Largest reassembled message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Idle read timeout before a 1001 close.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// One complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// Capability set a WebSocket endpoint implements.
pub trait WsHandler: Send + Sync + 'static {
    fn on_open(&self, _remote: SocketAddr) {}

    /// Handles one message; the returned message, if any, is sent back.
    fn on_message(&self, message: Message) -> Option<Message>;

    fn on_close(&self, _code: u16) {}

    fn on_error(&self, _error: &ServerError) {}
}

/// Default handler: prefixes text with `Echo: `, mirrors binary.
#[derive(Debug, Default)]
pub struct EchoHandler;

impl WsHandler for EchoHandler {
    fn on_message(&self, message: Message) -> Option<Message> {
        match message {
            Message::Text(text) => Some(Message::Text(format!("Echo: {text}"))),
            Message::Binary(data) => Some(Message::Binary(data)),
        }
    }
}

/// A live WebSocket connection.
pub struct WsConnection;

impl WsConnection {
    /// Runs the connection until close, error, or idle timeout.
    pub async fn run<S>(io: S, remote: SocketAddr, handler: Arc<dyn WsHandler>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, writer) = tokio::io::split(io);
        let writer = Arc::new(Mutex::new(writer));
        let state = AtomicU8::new(STATE_OPEN);

        handler.on_open(remote);
        tracing::debug!(%remote, "websocket open");

        // In-flight fragmented message: start opcode plus collected bytes.
        let mut assembling: Option<(u8, Vec<u8>)> = None;

        let close_code = loop {
            let frame = match timeout(IDLE_TIMEOUT, frame::read_frame(&mut reader)).await {
                Err(_) => {
                    advance(&state, STATE_CLOSING);
                    let _ = send_close(&writer, close::GOING_AWAY, "idle timeout").await;
                    break close::GOING_AWAY;
                }
                Ok(Err(e)) => {
                    if let ServerError::WebSocket { code, .. } = &e {
                        let code = *code;
                        handler.on_error(&e);
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(&writer, code, "").await;
                        break code;
                    }
                    if !e.is_disconnect() {
                        handler.on_error(&e);
                    }
                    break close::GOING_AWAY;
                }
                Ok(Ok(frame)) => frame,
            };

            if frame.is_control() {
                match frame.opcode {
                    OP_PING => {
                        send(&writer, frame::encode_frame(OP_PONG, &frame.payload, true)).await?;
                        continue;
                    }
                    OP_PONG => continue,
                    OP_CLOSE => {
                        let code = frame::close_code(&frame.payload);
                        if state.load(Ordering::SeqCst) == STATE_OPEN {
                            advance(&state, STATE_CLOSING);
                            let _ = send_close(&writer, code, "").await;
                        }
                        break code;
                    }
                    _ => {
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(&writer, close::PROTOCOL_ERROR, "unknown control").await;
                        break close::PROTOCOL_ERROR;
                    }
                }
            }

            let completed = match frame.opcode {
                OP_TEXT | OP_BINARY => {
                    if assembling.is_some() {
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(
                            &writer,
                            close::PROTOCOL_ERROR,
                            "new message during fragmentation",
                        )
                        .await;
                        break close::PROTOCOL_ERROR;
                    }
                    if frame.fin {
                        Some((frame.opcode, frame.payload))
                    } else {
                        assembling = Some((frame.opcode, frame.payload));
                        None
                    }
                }
                OP_CONTINUATION => {
                    let Some((opcode, mut collected)) = assembling.take() else {
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(
                            &writer,
                            close::PROTOCOL_ERROR,
                            "continuation without start",
                        )
                        .await;
                        break close::PROTOCOL_ERROR;
                    };
                    if collected.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(&writer, close::TOO_BIG, "message too large").await;
                        break close::TOO_BIG;
                    }
                    collected.extend_from_slice(&frame.payload);
                    if frame.fin {
                        Some((opcode, collected))
                    } else {
                        assembling = Some((opcode, collected));
                        None
                    }
                }
                _ => {
                    advance(&state, STATE_CLOSING);
                    let _ = send_close(&writer, close::PROTOCOL_ERROR, "bad opcode").await;
                    break close::PROTOCOL_ERROR;
                }
            };

            let Some((opcode, payload)) = completed else {
                continue;
            };

            let message = if opcode == OP_TEXT {
                match String::from_utf8(payload) {
                    Ok(text) => Message::Text(text),
                    Err(_) => {
                        advance(&state, STATE_CLOSING);
                        let _ = send_close(&writer, close::INVALID_PAYLOAD, "invalid utf-8").await;
                        break close::INVALID_PAYLOAD;
                    }
                }
            } else {
                Message::Binary(payload)
            };

            if let Some(reply) = handler.on_message(message) {
                let bytes = match reply {
                    Message::Text(text) => frame::encode_frame(OP_TEXT, text.as_bytes(), true),
                    Message::Binary(data) => frame::encode_frame(OP_BINARY, &data, true),
                };
                send(&writer, bytes).await?;
            }
        };

        advance(&state, STATE_CLOSED);
        handler.on_close(close_code);
        tracing::debug!(%remote, code = close_code, "websocket closed");
        Ok(())
    }
}

/// State only moves forward.
fn advance(state: &AtomicU8, to: u8) {
    state.fetch_max(to, Ordering::SeqCst);
}

async fn send<W: AsyncWrite + Send>(writer: &Arc<Mutex<WriteHalf<W>>>, bytes: Vec<u8>) -> Result<()>
where
    W: 'static,
{
    let mut guard = writer.lock().await;
    guard.write_all(&bytes).await?;
    guard.flush().await?;
    Ok(())
}

async fn send_close<W: AsyncWrite + Send + 'static>(
    writer: &Arc<Mutex<WriteHalf<W>>>,
    code: u16,
    reason: &str,
) -> Result<()> {
    let payload = frame::close_payload(code, reason);
    send(writer, frame::encode_frame(OP_CLOSE, &payload, true)).await
}
