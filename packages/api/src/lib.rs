//! # Stratus
//!
//! Self-contained HTTP serving runtime: HTTP/1.1, HTTP/2, WebSocket, and
//! Server-Sent Events on a single listening port, with conditional and
//! ranged static file serving, gzip compression, per-IP rate limiting,
//! Prometheus metrics, and graceful shutdown.
//!
//! ## Usage
//!
//! ```no_run
//! use stratus::ServerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ServerBuilder::new()
//!         .port(8080)
//!         .webroot("./public")
//!         .compression(true)
//!         .rate_limit(100, 200)
//!         .build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! Configuration can also come from `STRATUS_*` environment variables via
//! [`ServerConfig::from_env`], which is what the `stratus` binary does.

pub mod builder;
pub mod prelude;

pub use builder::ServerBuilder;
pub use stratus_server::config::ServerConfig;
pub use stratus_server::error::{Result, ServerError};
pub use stratus_server::server::Server;
pub use stratus_server::server::shutdown::ShutdownCoordinator;
pub use stratus_server::telemetry::MetricsCollector;
