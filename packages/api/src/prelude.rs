//! Canonical imports for applications embedding the runtime.

pub use crate::builder::ServerBuilder;
pub use stratus_server::config::{
    AuthConfig, FeatureFlags, Limits, ListenerConfig, RateLimitConfig, ServerConfig,
    ShutdownConfig, SseConfig, TlsSettings,
};
pub use stratus_server::error::{Result, ServerError};
pub use stratus_server::protocols::sse::{SseEvent, SseHub};
pub use stratus_server::protocols::ws::{Message, WsHandler};
pub use stratus_server::server::Server;
pub use stratus_server::telemetry::MetricsCollector;
