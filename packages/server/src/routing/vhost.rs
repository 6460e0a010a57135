//! Virtual host resolution
//!
//! Maps the request's `Host` header onto a webroot. Normalization:
//! lowercase, strip any port, strip one leading `www.`. Unknown hosts and
//! missing headers fall back to the default webroot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct VirtualHosts {
    default_root: PathBuf,
    map: HashMap<String, PathBuf>,
    enabled: bool,
}

impl VirtualHosts {
    #[must_use]
    pub fn new(default_root: PathBuf, map: HashMap<String, PathBuf>, enabled: bool) -> Self {
        let map = map
            .into_iter()
            .map(|(host, root)| (normalize(&host), root))
            .collect();
        Self { default_root, map, enabled }
    }

    /// Webroot for the given `Host` header value.
    #[must_use]
    pub fn resolve(&self, host: Option<&str>) -> &Path {
        if !self.enabled {
            return &self.default_root;
        }
        match host {
            Some(raw) => self
                .map
                .get(&normalize(raw))
                .map_or(self.default_root.as_path(), PathBuf::as_path),
            None => &self.default_root,
        }
    }

    #[must_use]
    pub fn default_root(&self) -> &Path {
        &self.default_root
    }
}

fn normalize(host: &str) -> String {
    let lower = host.trim().to_ascii_lowercase();
    let without_port = strip_port(&lower);
    without_port
        .strip_prefix("www.")
        .unwrap_or(without_port)
        .to_string()
}

/// Strips `:port`, leaving IPv6 literals like `[::1]` intact.
fn strip_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        // Bracketed IPv6; a port can only follow the bracket.
        return &host[..=end];
    }
    match host.split_once(':') {
        Some((name, _)) => name,
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vhosts() -> VirtualHosts {
        let mut map = HashMap::new();
        map.insert("example.com".to_string(), PathBuf::from("/srv/example"));
        map.insert("other.test".to_string(), PathBuf::from("/srv/other"));
        VirtualHosts::new(PathBuf::from("/srv/default"), map, true)
    }

    #[test]
    fn resolves_with_normalization() {
        let hosts = vhosts();
        assert_eq!(hosts.resolve(Some("example.com")), Path::new("/srv/example"));
        assert_eq!(hosts.resolve(Some("EXAMPLE.COM:8080")), Path::new("/srv/example"));
        assert_eq!(hosts.resolve(Some("www.example.com")), Path::new("/srv/example"));
    }

    #[test]
    fn unknown_host_falls_back() {
        let hosts = vhosts();
        assert_eq!(hosts.resolve(Some("nope.invalid")), Path::new("/srv/default"));
        assert_eq!(hosts.resolve(None), Path::new("/srv/default"));
    }

    #[test]
    fn disabled_always_uses_default() {
        let hosts = VirtualHosts::new(PathBuf::from("/srv/default"), HashMap::new(), false);
        assert_eq!(hosts.resolve(Some("example.com")), Path::new("/srv/default"));
    }

    #[test]
    fn ipv6_literal_keeps_brackets() {
        assert_eq!(strip_port("[::1]:8080"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("host:80"), "host");
    }
}
