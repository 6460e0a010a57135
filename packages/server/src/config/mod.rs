//! Server configuration
//!
//! Nested configuration structs with sensible defaults, environment loading
//! through `STRATUS_*` variables, and a validation pass that rejects
//! inconsistent values before any socket is bound.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod validation;

pub use validation::validate;

use crate::error::{Result, ServerError};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen sockets. At least one is required.
    pub listeners: Vec<ListenerConfig>,
    /// Default webroot for static file serving.
    pub webroot: PathBuf,
    /// Host header to webroot mapping. Unknown hosts fall back to `webroot`.
    pub vhosts: HashMap<String, PathBuf>,
    /// Feature toggles.
    pub features: FeatureFlags,
    /// Request and connection size limits.
    pub limits: Limits,
    /// Token-bucket rate limiting.
    pub rate_limit: RateLimitConfig,
    /// Basic and API-key credentials.
    pub auth: AuthConfig,
    /// Redirect and rewrite rules, one per line in `<status>:<from>:<to>`
    /// or `<from>:<to>` form.
    pub routing_rules: Vec<String>,
    /// SSE hub limits and keepalive cadence.
    pub sse: SseConfig,
    /// Graceful shutdown timing.
    pub shutdown: ShutdownConfig,
    /// Worker threads for the tokio runtime. `None` uses the core count.
    pub worker_threads: Option<usize>,
}

/// One listen socket, optionally TLS-terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub addr: SocketAddr,
    pub tls: Option<TlsSettings>,
}

/// PEM certificate chain and private key paths for a TLS listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Feature toggles for the cross-cutting services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub compression: bool,
    pub cache: bool,
    pub metrics: bool,
    pub rate_limit: bool,
    pub auth: bool,
    pub vhosts: bool,
    pub routing: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            compression: true,
            cache: true,
            metrics: true,
            rate_limit: false,
            auth: false,
            vhosts: false,
            routing: false,
        }
    }
}

/// Hard limits on request framing and bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum request line length in bytes.
    pub max_request_line: usize,
    /// Maximum cumulative header section length in bytes.
    pub max_header_bytes: usize,
    /// Maximum request body length in bytes.
    pub max_body_bytes: u64,
    /// Maximum size of a single served file in bytes.
    pub max_file_bytes: u64,
    /// Maximum requests on one keep-alive connection.
    pub max_requests_per_connection: u32,
    /// Idle read timeout between keep-alive requests.
    pub idle_timeout: Duration,
    /// Admission queue depth in front of the pipeline. Overflow answers 503.
    pub request_queue_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_request_line: 8 * 1024,
            max_header_bytes: 8 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            max_file_bytes: 1024 * 1024 * 1024,
            max_requests_per_connection: 1000,
            idle_timeout: Duration::from_secs(30),
            request_queue_limit: 1024,
        }
    }
}

/// Token-bucket parameters applied per client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per second.
    pub rps: u64,
    /// Bucket capacity.
    pub burst: u64,
    /// IPs that bypass limiting entirely.
    pub whitelist: HashSet<IpAddr>,
    /// Buckets idle for this long are reaped by the sweeper.
    pub idle_eviction: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 100,
            burst: 200,
            whitelist: HashSet::new(),
            idle_eviction: Duration::from_secs(300),
        }
    }
}

/// Credentials accepted by the authentication check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Basic auth username to password.
    pub users: HashMap<String, String>,
    /// Accepted `X-API-Key` values.
    pub api_keys: HashSet<String>,
}

/// SSE hub limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SseConfig {
    pub max_connections_per_topic: usize,
    pub max_connections_per_ip: usize,
    /// Cadence of `:` keepalive comments.
    pub keepalive_interval: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            max_connections_per_topic: 1000,
            max_connections_per_ip: 10,
            keepalive_interval: Duration::from_secs(15),
        }
    }
}

/// Graceful shutdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Pause after the flag flips, letting load balancers deregister.
    pub drain_grace: Duration,
    /// How long to wait for active connections to drain before forcing.
    pub drain_timeout: Duration,
    /// Poll interval while draining.
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: vec![ListenerConfig {
                addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
                tls: None,
            }],
            webroot: PathBuf::from("./webroot"),
            vhosts: HashMap::new(),
            features: FeatureFlags::default(),
            limits: Limits::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            routing_rules: Vec::new(),
            sse: SseConfig::default(),
            shutdown: ShutdownConfig::default(),
            worker_threads: None,
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from `STRATUS_*` environment variables on top
    /// of the defaults, then validates it.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("STRATUS_PORT")? {
            for listener in &mut config.listeners {
                listener.addr.set_port(port);
            }
        }
        if let Some(addr) = env_var("STRATUS_ADDR") {
            let ip: IpAddr = addr
                .parse()
                .map_err(|_| ServerError::Config(format!("invalid STRATUS_ADDR: {addr}")))?;
            for listener in &mut config.listeners {
                listener.addr.set_ip(ip);
            }
        }
        if let Some(webroot) = env_var("STRATUS_WEBROOT") {
            config.webroot = PathBuf::from(webroot);
        }
        match (env_var("STRATUS_TLS_CERT"), env_var("STRATUS_TLS_KEY")) {
            (Some(cert), Some(key)) => {
                let tls = TlsSettings {
                    cert_path: PathBuf::from(cert),
                    key_path: PathBuf::from(key),
                };
                for listener in &mut config.listeners {
                    listener.tls = Some(tls.clone());
                }
            }
            (None, None) => {}
            _ => {
                return Err(ServerError::Config(
                    "STRATUS_TLS_CERT and STRATUS_TLS_KEY must be set together".into(),
                ));
            }
        }

        if let Some(v) = env_parse::<u64>("STRATUS_MAX_BODY_BYTES")? {
            config.limits.max_body_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("STRATUS_REQUEST_QUEUE_LIMIT")? {
            config.limits.request_queue_limit = v;
        }
        if let Some(v) = env_parse::<usize>("STRATUS_WORKER_THREADS")? {
            config.worker_threads = Some(v);
        }

        if let Some(v) = env_parse::<u64>("STRATUS_RATE_RPS")? {
            config.rate_limit.rps = v;
        }
        if let Some(v) = env_parse::<u64>("STRATUS_RATE_BURST")? {
            config.rate_limit.burst = v;
        }
        if let Some(list) = env_var("STRATUS_RATE_WHITELIST") {
            for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let ip: IpAddr = entry.parse().map_err(|_| {
                    ServerError::Config(format!("invalid whitelist entry: {entry}"))
                })?;
                config.rate_limit.whitelist.insert(ip);
            }
        }

        if let Some(v) = env_flag("STRATUS_COMPRESSION") {
            config.features.compression = v;
        }
        if let Some(v) = env_flag("STRATUS_CACHE") {
            config.features.cache = v;
        }
        if let Some(v) = env_flag("STRATUS_METRICS") {
            config.features.metrics = v;
        }
        if let Some(v) = env_flag("STRATUS_RATE_LIMIT") {
            config.features.rate_limit = v;
        }
        if let Some(v) = env_flag("STRATUS_AUTH") {
            config.features.auth = v;
        }
        if let Some(v) = env_flag("STRATUS_VHOSTS") {
            config.features.vhosts = v;
        }
        if let Some(v) = env_flag("STRATUS_ROUTING") {
            config.features.routing = v;
        }

        validate(&config)?;
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ServerError::Config(format!("invalid value for {name}: {raw}"))),
        None => Ok(None),
    }
}

/// Boolean flags accept 1/0, true/false, on/off in any case.
fn env_flag(name: &str) -> Option<bool> {
    env_var(name).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
}
