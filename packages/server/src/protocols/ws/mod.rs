//! WebSocket engine (RFC 6455)
//!
//! Entered through an HTTP/1.1 upgrade. The handshake module validates the
//! upgrade request and signs the accept key; the frame module is the wire
//! codec; the connection module runs the message loop against a handler.

pub mod connection;
pub mod frame;
pub mod handshake;

pub use connection::{EchoHandler, Message, WsConnection, WsHandler};

/// Close codes used by the engine.
pub mod close {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const POLICY: u16 = 1008;
    pub const TOO_BIG: u16 = 1009;
    pub const INTERNAL: u16 = 1011;
}
