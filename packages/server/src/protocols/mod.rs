//! Wire-level protocol engines
//!
//! One engine per protocol, each owning its connection state: HTTP/1.1,
//! HTTP/2, WebSocket (entered through an H/1 upgrade), and SSE. The
//! protocol demultiplexer in `server::demux` decides which engine a new
//! connection gets.

pub mod h1;
pub mod h2;
pub mod sse;
pub mod ws;
