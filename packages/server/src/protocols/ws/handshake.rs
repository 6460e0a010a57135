//! WebSocket opening handshake
//!
//! Validates the upgrade request and builds the `101 Switching Protocols`
//! response. The accept key is the base64 SHA-1 of the client key joined
//! with the RFC 6455 GUID. Any validation failure answers 400 and the
//! socket is never upgraded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{StatusCode, header};
use sha1::{Digest, Sha1};

use crate::http::{Request, Response};

/// GUID appended to the client key before hashing.
const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Signs a `Sec-WebSocket-Key` value.
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID);
    BASE64.encode(sha1.finalize())
}

/// Validates the upgrade request, returning the 101 response on success
/// and a 400 on any failure.
pub fn accept_response(req: &Request) -> Result<Response, Response> {
    let version_ok = req
        .header("sec-websocket-version")
        .is_some_and(|v| v.trim() == "13");
    if !version_ok {
        return Err(bad_handshake());
    }

    let Some(key) = req.header("sec-websocket-key").map(str::trim) else {
        return Err(bad_handshake());
    };
    if !is_valid_key(key) {
        return Err(bad_handshake());
    }

    let mut resp = Response::new(StatusCode::SWITCHING_PROTOCOLS);
    resp.set_header(header::UPGRADE, "websocket");
    resp.set_header(header::CONNECTION, "Upgrade");
    resp.set_header("sec-websocket-accept", accept_key(key));

    // Echo the first offered subprotocol, if any.
    if let Some(protocols) = req.header("sec-websocket-protocol")
        && let Some(first) = protocols.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        resp.set_header("sec-websocket-protocol", first);
    }

    resp.keep_alive = false;
    Ok(resp)
}

/// The client key must be exactly 24 base64 characters.
fn is_valid_key(key: &str) -> bool {
    key.len() == 24
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

fn bad_handshake() -> Response {
    Response::status_page(StatusCode::BAD_REQUEST).with_keep_alive(false)
}
