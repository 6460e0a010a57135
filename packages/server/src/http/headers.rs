//! Response header stamping
//!
//! Every response leaving the server carries the same base header set:
//! `Date`, `Server`, the security headers, and HSTS when the connection is
//! TLS-terminated. Content headers are owned by whoever built the body.

use std::time::SystemTime;

use http::{HeaderValue, header};

use super::response::Response;

/// Value of the `Server` header.
pub const SERVER_NAME: &str = "stratus/0.1.0";

/// Default Content-Security-Policy applied to every response.
pub const DEFAULT_CSP: &str =
    "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
     img-src 'self' data:; frame-ancestors 'none'";

/// HSTS policy for TLS listeners.
pub const HSTS_POLICY: &str = "max-age=31536000; includeSubDomains";

/// Cache policy stamped on cacheable static responses.
pub const STATIC_CACHE_CONTROL: &str = "public, max-age=3600, must-revalidate";

/// Stamps the headers common to every response. Runs after the handler and
/// before serialization, so handler-set values are not overwritten.
pub fn apply_common_headers(resp: &mut Response, secure: bool) {
    let date = httpdate::fmt_http_date(SystemTime::now());
    if let Ok(v) = HeaderValue::from_str(&date) {
        resp.headers.insert(header::DATE, v);
    }
    resp.headers
        .insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));

    resp.headers
        .entry(header::X_FRAME_OPTIONS)
        .or_insert(HeaderValue::from_static("DENY"));
    resp.headers
        .entry(header::X_CONTENT_TYPE_OPTIONS)
        .or_insert(HeaderValue::from_static("nosniff"));
    resp.headers
        .entry(header::REFERRER_POLICY)
        .or_insert(HeaderValue::from_static("strict-origin-when-cross-origin"));
    resp.headers.entry("permissions-policy").or_insert(HeaderValue::from_static(
        "geolocation=(), microphone=(), camera=()",
    ));
    resp.headers
        .entry(header::CONTENT_SECURITY_POLICY)
        .or_insert(HeaderValue::from_static(DEFAULT_CSP));

    if secure {
        resp.headers
            .entry(header::STRICT_TRANSPORT_SECURITY)
            .or_insert(HeaderValue::from_static(HSTS_POLICY));
    }
}
