//! Request authentication
//!
//! Two credential forms: `Authorization: Basic` with a username/password
//! pair, or an `X-API-Key` header. Health, metrics, and the login path are
//! exempt. Failures answer 401 with a `WWW-Authenticate` challenge.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{StatusCode, header};

use crate::config::AuthConfig;
use crate::http::{Request, Response};

/// Challenge sent with every 401.
pub const WWW_AUTHENTICATE: &str = "Basic realm=\"HTTP Server\"";

/// Paths that never require credentials.
const EXEMPT_PREFIXES: &[&str] = &["/health/", "/auth/login"];
const EXEMPT_EXACT: &[&str] = &["/health", "/metrics"];

#[derive(Debug, Default)]
pub struct Authenticator {
    config: AuthConfig,
}

impl Authenticator {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// True when the path may be served without credentials.
    #[must_use]
    pub fn is_exempt(path: &str) -> bool {
        EXEMPT_EXACT.contains(&path)
            || EXEMPT_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
    }

    /// Checks the request's credentials. `Ok(())` admits the request.
    pub fn check(&self, req: &Request) -> Result<(), Response> {
        if Self::is_exempt(&req.path) {
            return Ok(());
        }

        if let Some(key) = req.header("x-api-key")
            && self.config.api_keys.contains(key)
        {
            return Ok(());
        }

        if let Some(auth) = req.header("authorization")
            && let Some(encoded) = auth.strip_prefix("Basic ")
            && let Ok(decoded) = BASE64.decode(encoded.trim())
            && let Ok(pair) = String::from_utf8(decoded)
            && let Some((user, password)) = pair.split_once(':')
            && self.verify_basic(user, password)
        {
            return Ok(());
        }

        Err(challenge())
    }

    fn verify_basic(&self, user: &str, password: &str) -> bool {
        match self.config.users.get(user) {
            Some(expected) => constant_time_eq(expected.as_bytes(), password.as_bytes()),
            None => false,
        }
    }
}

/// Comparison that does not short-circuit on the first mismatched byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn challenge() -> Response {
    Response::status_page(StatusCode::UNAUTHORIZED)
        .with_header(header::WWW_AUTHENTICATE, WWW_AUTHENTICATE)
}
