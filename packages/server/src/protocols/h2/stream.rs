//! HTTP/2 stream state
//!
//! Client-initiated streams carry odd 31-bit ids. State transitions follow
//! the RFC subset a server needs; anything outside it is answered with
//! RST_STREAM(PROTOCOL_ERROR) by the connection.

use bytes::BytesMut;

use crate::error::{Result, ServerError};

use super::ErrorCode;
use super::flow::FlowWindow;

/// Stream lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// Response bytes waiting for window credit, plus whether END_STREAM
/// still needs to go out.
#[derive(Debug, Default)]
pub struct PendingData {
    pub buf: BytesMut,
    pub end_stream: bool,
}

/// One stream's book-keeping on the connection.
#[derive(Debug)]
pub struct Stream {
    pub id: u32,
    pub state: StreamState,
    pub recv_window: FlowWindow,
    pub send_window: FlowWindow,
    /// Request header list as decoded.
    pub request_headers: Vec<(String, String)>,
    /// Request body accumulated from DATA frames.
    pub body: BytesMut,
    pub end_stream_received: bool,
    /// Priority weight, recorded but not used for scheduling.
    pub weight: u8,
    /// Response bytes parked until WINDOW_UPDATE credits arrive.
    pub pending: Option<PendingData>,
    /// Topic and subscriber id when this stream carries an SSE feed.
    pub sse_topic: Option<String>,
    pub sse_connection_id: Option<u64>,
}

impl Stream {
    #[must_use]
    pub fn new(id: u32, recv_window: u32, send_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            recv_window: FlowWindow::new(recv_window),
            send_window: FlowWindow::new(send_window),
            request_headers: Vec::new(),
            body: BytesMut::new(),
            end_stream_received: false,
            weight: 16,
            pending: None,
            sse_topic: None,
            sse_connection_id: None,
        }
    }

    /// HEADERS received on this stream.
    pub fn recv_headers(&mut self, end_stream: bool) -> Result<()> {
        self.state = match self.state {
            StreamState::Idle | StreamState::ReservedRemote => {
                if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                }
            }
            other => return Err(self.protocol_error(other, "HEADERS")),
        };
        self.end_stream_received = end_stream;
        Ok(())
    }

    /// DATA received on this stream.
    pub fn recv_data(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            other => return Err(self.protocol_error(other, "DATA")),
        }
        if end_stream {
            self.end_stream_received = true;
            self.state = match self.state {
                StreamState::Open => StreamState::HalfClosedRemote,
                _ => StreamState::Closed,
            };
        }
        Ok(())
    }

    /// Server sent END_STREAM on this stream.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            _ => StreamState::Closed,
        };
    }

    /// RST_STREAM in either direction.
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    /// The request is complete once the peer half-closed its side.
    #[must_use]
    pub fn request_complete(&self) -> bool {
        self.end_stream_received
    }

    fn protocol_error(&self, state: StreamState, frame: &str) -> ServerError {
        ServerError::h2_stream(
            self.id,
            ErrorCode::Protocol,
            format!("{frame} in state {state:?}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> Stream {
        Stream::new(1, 65_535, 65_535)
    }

    #[test]
    fn headers_open_the_stream() {
        let mut s = stream();
        s.recv_headers(false).unwrap();
        assert_eq!(s.state, StreamState::Open);
        assert!(!s.request_complete());
    }

    #[test]
    fn headers_with_end_stream_half_close() {
        let mut s = stream();
        s.recv_headers(true).unwrap();
        assert_eq!(s.state, StreamState::HalfClosedRemote);
        assert!(s.request_complete());
    }

    #[test]
    fn data_after_end_stream_is_protocol_error() {
        let mut s = stream();
        s.recv_headers(true).unwrap();
        let err = s.recv_data(false).unwrap_err();
        assert!(matches!(
            err,
            ServerError::H2Stream { stream_id: 1, code: ErrorCode::Protocol, .. }
        ));
    }

    #[test]
    fn full_exchange_closes() {
        let mut s = stream();
        s.recv_headers(false).unwrap();
        s.recv_data(true).unwrap();
        assert_eq!(s.state, StreamState::HalfClosedRemote);
        s.send_end_stream();
        assert!(s.is_closed());
    }

    #[test]
    fn double_headers_is_protocol_error() {
        let mut s = stream();
        s.recv_headers(false).unwrap();
        assert!(s.recv_headers(false).is_err());
    }

    #[test]
    fn reset_closes_from_any_state() {
        let mut s = stream();
        s.recv_headers(false).unwrap();
        s.reset();
        assert!(s.is_closed());
    }
}
