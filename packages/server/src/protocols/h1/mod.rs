//! HTTP/1.1 connection engine
//!
//! Sequential request/response cycles on one connection: parse the head,
//! bound and read the body, run the pipeline, serialize the response, then
//! loop while keep-alive holds. Upgrades hand the socket to the WebSocket
//! engine; SSE subscriptions take the connection over for good.

pub mod connection;
pub mod parser;
pub mod writer;

pub use connection::serve;
