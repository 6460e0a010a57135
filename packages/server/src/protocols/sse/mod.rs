//! Server-Sent Events
//!
//! A process-wide broadcast hub maps topics to subscriber connections.
//! Each subscriber owns a bounded queue drained by its engine: the H/1
//! engine writes the body of a long-lived response, the H/2 engine flushes
//! DATA frames. Whole events only; a failed send closes that one
//! subscriber, never the topic.

pub mod connection;
pub mod event;
pub mod hub;

pub use connection::serve_h1;
pub use event::SseEvent;
pub use hub::{RegisterError, SseConnection, SseHub};
