//! Built-in endpoint handlers
//!
//! Health probes, the Prometheus scrape endpoint, and the small API
//! surface (`/api/echo`, `/api/upload`, `/api/data`). Everything here
//! returns a complete `Response`; header stamping happens later in the
//! pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use http::{Method, StatusCode, header};
use serde_json::json;

use crate::http::body::{ParsedBody, parse};
use crate::http::{Request, Response};
use crate::telemetry::{self, MetricsCollector};

/// Liveness: always up while the process runs.
#[must_use]
pub fn health_live() -> Response {
    let body = json!({
        "status": "UP",
        "timestamp": unix_now(),
    });
    Response::json(StatusCode::OK, body.to_string())
}

/// Readiness: the admission queue must have capacity and the webroot must
/// be reachable.
#[must_use]
pub fn health_ready(queue_available: bool, webroot_ok: bool) -> Response {
    let ready = queue_available && webroot_ok;
    let body = json!({
        "status": if ready { "UP" } else { "DOWN" },
        "checks": {
            "threadPool": if queue_available { "UP" } else { "DOWN" },
            "disk": if webroot_ok { "UP" } else { "DOWN" },
        },
        "timestamp": unix_now(),
    });
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    Response::json(status, body.to_string())
}

/// Startup: up once the acceptor is running.
#[must_use]
pub fn health_startup(accepting: &Arc<AtomicBool>) -> Response {
    if accepting.load(Ordering::Relaxed) {
        let body = json!({"status": "UP", "timestamp": unix_now()});
        Response::json(StatusCode::OK, body.to_string())
    } else {
        let body = json!({"status": "STARTING", "timestamp": unix_now()});
        Response::json(StatusCode::SERVICE_UNAVAILABLE, body.to_string())
    }
}

/// Prometheus text exposition.
#[must_use]
pub fn metrics_endpoint(metrics: &MetricsCollector) -> Response {
    let text = telemetry::render(metrics);
    let mut resp = Response::new(StatusCode::OK);
    resp.set_header(
        header::CONTENT_TYPE,
        "text/plain; version=0.0.4; charset=utf-8",
    );
    resp.body = crate::http::ResponseBody::Bytes(bytes::Bytes::from(text));
    resp
}

/// `POST /api/echo`: parse the body and echo it back as JSON.
#[must_use]
pub fn api_echo(req: &Request) -> Response {
    if req.method != Method::POST {
        return method_not_allowed("POST");
    }
    let parsed = parse_request_body(req);
    let body = json!({
        "kind": parsed.kind(),
        "fields": fields_object(&parsed),
        "raw": raw_excerpt(&parsed),
        "bytes": req.body.as_ref().map(|b| b.len()).unwrap_or(0),
    });
    Response::json(StatusCode::OK, body.to_string())
}

/// `POST /api/upload`: acknowledge the body with its size and whatever
/// parameters the parser could infer.
#[must_use]
pub fn api_upload(req: &Request) -> Response {
    if req.method != Method::POST {
        return method_not_allowed("POST");
    }
    let parsed = parse_request_body(req);
    let body = json!({
        "received": req.body.as_ref().map(|b| b.len()).unwrap_or(0),
        "kind": parsed.kind(),
        "parameters": fields_object(&parsed),
    });
    Response::json(StatusCode::OK, body.to_string())
}

/// `POST|PUT|DELETE /api/data[/…]`: acknowledgement stub.
#[must_use]
pub fn api_data(req: &Request) -> Response {
    let (status, action) = match req.method {
        Method::POST => (StatusCode::CREATED, "created"),
        Method::PUT => (StatusCode::OK, "updated"),
        Method::DELETE => (StatusCode::OK, "deleted"),
        _ => return method_not_allowed("POST, PUT, DELETE"),
    };
    let body = json!({
        "status": action,
        "path": req.path,
    });
    Response::json(status, body.to_string())
}

fn parse_request_body(req: &Request) -> ParsedBody {
    match &req.body {
        Some(bytes) => parse(req.header("content-type"), bytes),
        None => ParsedBody::Empty,
    }
}

fn fields_object(parsed: &ParsedBody) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in parsed.fields() {
        map.insert(key.clone(), json!(value));
    }
    serde_json::Value::Object(map)
}

fn raw_excerpt(parsed: &ParsedBody) -> serde_json::Value {
    match parsed {
        ParsedBody::Json { raw, .. } => json!(raw),
        ParsedBody::Text(text) => json!(text),
        _ => serde_json::Value::Null,
    }
}

fn method_not_allowed(allow: &str) -> Response {
    Response::status_page(StatusCode::METHOD_NOT_ALLOWED).with_header(header::ALLOW, allow)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpVersion, ResponseBody};
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue};

    fn post(path: &str, content_type: &'static str, body: &'static [u8]) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static(content_type));
        Request {
            method: Method::POST,
            target: path.into(),
            path: path.into(),
            query: None,
            version: HttpVersion::Http11,
            headers,
            body: Some(Bytes::from_static(body)),
            remote_addr: "127.0.0.1:4000".parse().unwrap(),
            request_id: "cafebabecafebabe".into(),
            secure: false,
        }
    }

    fn body_text(resp: &Response) -> String {
        match &resp.body {
            ResponseBody::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            other => panic!("expected bytes body, got {other:?}"),
        }
    }

    #[test]
    fn live_is_always_up() {
        let resp = health_live();
        assert_eq!(resp.status, StatusCode::OK);
        assert!(body_text(&resp).contains("\"UP\""));
    }

    #[test]
    fn ready_reflects_checks() {
        assert_eq!(health_ready(true, true).status, StatusCode::OK);
        assert_eq!(health_ready(false, true).status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health_ready(true, false).status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn echo_reports_form_fields() {
        let req = post("/api/echo", "application/x-www-form-urlencoded", b"a=1&b=two");
        let resp = api_echo(&req);
        assert_eq!(resp.status, StatusCode::OK);
        let text = body_text(&resp);
        assert!(text.contains("\"kind\":\"form\""));
        assert!(text.contains("\"a\":\"1\""));
        assert!(text.contains("\"b\":\"two\""));
    }

    #[test]
    fn data_statuses_by_method() {
        let mut req = post("/api/data/items", "application/json", b"{}");
        assert_eq!(api_data(&req).status, StatusCode::CREATED);
        req.method = Method::PUT;
        assert_eq!(api_data(&req).status, StatusCode::OK);
        req.method = Method::DELETE;
        assert_eq!(api_data(&req).status, StatusCode::OK);
        req.method = Method::PATCH;
        assert_eq!(api_data(&req).status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn metrics_endpoint_sets_exposition_content_type() {
        let metrics = MetricsCollector::new();
        metrics.counter_add("x_total", &[], 1);
        let resp = metrics_endpoint(&metrics);
        assert_eq!(
            resp.headers.get("content-type").unwrap(),
            "text/plain; version=0.0.4; charset=utf-8"
        );
        assert!(body_text(&resp).contains("x_total 1"));
    }
}
