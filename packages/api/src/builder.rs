//! Fluent server configuration
//!
//! A builder over [`ServerConfig`] for embedding the runtime in an
//! application. Every method returns `self`; `build` runs validation and
//! assembles the server.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use stratus_server::config::{ServerConfig, TlsSettings};
use stratus_server::error::Result;
use stratus_server::server::Server;

/// Fluent builder for a [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { config: ServerConfig::default() }
    }

    /// Starts from an existing configuration (for example one loaded from
    /// the environment) and lets the builder refine it.
    #[must_use]
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Port for every configured listener.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        for listener in &mut self.config.listeners {
            listener.addr.set_port(port);
        }
        self
    }

    /// Replaces the listener list with a single address.
    #[must_use]
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.listeners = vec![stratus_server::config::ListenerConfig { addr, tls: None }];
        self
    }

    /// Adds an additional listener.
    #[must_use]
    pub fn also_listen(mut self, addr: SocketAddr) -> Self {
        self.config
            .listeners
            .push(stratus_server::config::ListenerConfig { addr, tls: None });
        self
    }

    /// PEM certificate chain and key applied to every listener.
    #[must_use]
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        let settings = TlsSettings { cert_path: cert_path.into(), key_path: key_path.into() };
        for listener in &mut self.config.listeners {
            listener.tls = Some(settings.clone());
        }
        self
    }

    /// Default webroot for static serving.
    #[must_use]
    pub fn webroot(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.webroot = path.into();
        self
    }

    /// Maps a host name to its own webroot and enables virtual hosting.
    #[must_use]
    pub fn vhost(mut self, host: impl Into<String>, webroot: impl Into<PathBuf>) -> Self {
        self.config.vhosts.insert(host.into(), webroot.into());
        self.config.features.vhosts = true;
        self
    }

    #[must_use]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.config.features.compression = enabled;
        self
    }

    #[must_use]
    pub fn caching(mut self, enabled: bool) -> Self {
        self.config.features.cache = enabled;
        self
    }

    #[must_use]
    pub fn metrics(mut self, enabled: bool) -> Self {
        self.config.features.metrics = enabled;
        self
    }

    /// Enables per-IP rate limiting with the given refill rate and burst.
    #[must_use]
    pub fn rate_limit(mut self, rps: u64, burst: u64) -> Self {
        self.config.features.rate_limit = true;
        self.config.rate_limit.rps = rps;
        self.config.rate_limit.burst = burst;
        self
    }

    /// Exempts an address from rate limiting.
    #[must_use]
    pub fn whitelist(mut self, ip: IpAddr) -> Self {
        self.config.rate_limit.whitelist.insert(ip);
        self
    }

    /// Enables authentication with a set of Basic users.
    #[must_use]
    pub fn basic_users(mut self, users: HashMap<String, String>) -> Self {
        self.config.features.auth = true;
        self.config.auth.users.extend(users);
        self
    }

    /// Enables authentication with an accepted API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.features.auth = true;
        self.config.auth.api_keys.insert(key.into());
        self
    }

    /// Adds one redirect or rewrite rule line and enables routing.
    #[must_use]
    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.config.routing_rules.push(rule.into());
        self.config.features.routing = true;
        self
    }

    /// Caps request body size in bytes.
    #[must_use]
    pub fn max_body_bytes(mut self, limit: u64) -> Self {
        self.config.limits.max_body_bytes = limit;
        self
    }

    /// Admission queue depth in front of the pipeline.
    #[must_use]
    pub fn request_queue_limit(mut self, depth: usize) -> Self {
        self.config.limits.request_queue_limit = depth;
        self
    }

    /// Access to the underlying configuration for anything the fluent
    /// surface does not cover.
    #[must_use]
    pub fn configure(mut self, f: impl FnOnce(&mut ServerConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Validates and assembles the server.
    pub fn build(self) -> Result<Server> {
        Server::new(self.config)
    }

    /// The configuration as currently built, without assembling a server.
    #[must_use]
    pub fn into_config(self) -> ServerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_composes_config() {
        let config = ServerBuilder::new()
            .port(9090)
            .webroot("/srv/www")
            .compression(false)
            .rate_limit(10, 20)
            .api_key("secret")
            .rule("301:/old:/new")
            .into_config();

        assert_eq!(config.listeners[0].addr.port(), 9090);
        assert_eq!(config.webroot, PathBuf::from("/srv/www"));
        assert!(!config.features.compression);
        assert!(config.features.rate_limit);
        assert_eq!(config.rate_limit.rps, 10);
        assert!(config.features.auth);
        assert!(config.features.routing);
    }

    #[test]
    fn build_validates() {
        // Routing enabled with a malformed rule must fail at build time.
        assert!(ServerBuilder::new().rule("999:/a:/b").build().is_err());
    }
}
