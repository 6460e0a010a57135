//! # Stratus serving runtime
//!
//! A self-contained HTTP serving runtime: one listening port speaking
//! HTTP/1.1, HTTP/2, WebSocket, and Server-Sent Events, with the
//! wire-level protocol engines implemented in-tree.
//!
//! ## Architecture
//!
//! - **Acceptor** (`server`): binds listeners, demultiplexes protocols
//!   (ALPN over TLS, preface sniff in plaintext), one task per connection.
//! - **Engines** (`protocols`): HTTP/1.1 keep-alive loop, HTTP/2 frames +
//!   HPACK + flow control, WebSocket framing, SSE broadcast hub.
//! - **Pipeline** (`routing`): rate limit, routing rules, auth, reserved
//!   endpoints, static files; engine-agnostic.
//! - **Request-path services**: ETag and gzip caches, token-bucket rate
//!   limiter, metrics collector, buffer pool, graceful shutdown.
//!
//! The public crate `stratus` re-exports the pieces applications touch;
//! this crate holds the implementation.

pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod protocols;
pub mod routing;
pub mod security;
pub mod server;
pub mod telemetry;
pub mod util;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::Server;
pub use server::shutdown::ShutdownCoordinator;
pub use telemetry::MetricsCollector;
