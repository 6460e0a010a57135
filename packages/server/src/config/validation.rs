//! Configuration validation
//!
//! Rejects inconsistent values before bind so misconfiguration fails the
//! process instead of surfacing as runtime errors.

use super::ServerConfig;
use crate::error::{Result, ServerError};

/// Validates a configuration, returning the first inconsistency found.
pub fn validate(config: &ServerConfig) -> Result<()> {
    if config.listeners.is_empty() {
        return Err(ServerError::Config("at least one listener is required".into()));
    }

    if config.limits.max_request_line == 0 {
        return Err(ServerError::Config("max_request_line must be positive".into()));
    }
    if config.limits.max_header_bytes == 0 {
        return Err(ServerError::Config("max_header_bytes must be positive".into()));
    }
    if config.limits.max_body_bytes == 0 {
        return Err(ServerError::Config("max_body_bytes must be positive".into()));
    }
    if config.limits.max_requests_per_connection == 0 {
        return Err(ServerError::Config(
            "max_requests_per_connection must be positive".into(),
        ));
    }
    if config.limits.request_queue_limit == 0 {
        return Err(ServerError::Config("request_queue_limit must be positive".into()));
    }

    if config.features.rate_limit {
        if config.rate_limit.rps == 0 {
            return Err(ServerError::Config("rate_limit.rps must be positive".into()));
        }
        if config.rate_limit.burst == 0 {
            return Err(ServerError::Config("rate_limit.burst must be positive".into()));
        }
    }

    if config.features.auth && config.auth.users.is_empty() && config.auth.api_keys.is_empty() {
        return Err(ServerError::Config(
            "auth is enabled but no users or api keys are configured".into(),
        ));
    }

    for listener in &config.listeners {
        if let Some(tls) = &listener.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err(ServerError::Config(
                    "tls listener requires both cert_path and key_path".into(),
                ));
            }
        }
    }

    if config.sse.max_connections_per_topic == 0 || config.sse.max_connections_per_ip == 0 {
        return Err(ServerError::Config("sse connection caps must be positive".into()));
    }

    for rule in &config.routing_rules {
        crate::routing::rules::parse_rule(rule)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn rejects_empty_listeners() {
        let mut config = ServerConfig::default();
        config.listeners.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_auth_without_credentials() {
        let mut config = ServerConfig::default();
        config.features.auth = true;
        assert!(validate(&config).is_err());

        config.auth.api_keys.insert("secret".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_rate_parameters_when_enabled() {
        let mut config = ServerConfig::default();
        config.features.rate_limit = true;
        config.rate_limit.rps = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_malformed_routing_rule() {
        let mut config = ServerConfig::default();
        config.routing_rules.push("999:/old:/new".into());
        assert!(validate(&config).is_err());
    }
}
