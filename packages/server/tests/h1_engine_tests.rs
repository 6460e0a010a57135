//! HTTP/1.1 engine integration tests
//!
//! Drives the engine over in-memory connections with literal wire bytes.

mod common;

use common::{h1_exchange, header_value, pipeline_with, split_responses};

fn webroot_with_index() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("index.html"),
        "<html><body>welcome</body></html>",
    )
    .unwrap();
    dir
}

#[tokio::test]
async fn keep_alive_serves_two_requests_then_closes() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());

    let raw = h1_exchange(
        pipeline,
        b"GET / HTTP/1.1\r\nHost: x\r\n\r\n\
          GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;

    let responses = split_responses(&raw);
    assert_eq!(responses.len(), 2, "expected two responses in {raw}");

    let (first_head, first_body) = &responses[0];
    assert!(first_head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(header_value(first_head, "connection"), Some("keep-alive"));
    assert!(first_body.contains("welcome"));

    let (second_head, _) = &responses[1];
    assert!(second_head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(header_value(second_head, "connection"), Some("close"));
}

#[tokio::test]
async fn path_traversal_is_not_found_never_forbidden() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());

    let raw = h1_exchange(
        pipeline,
        b"GET /../etc/passwd HTTP/1.1\r\nHost: x\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 404 Not Found"), "{raw}");
    assert!(!raw.contains("403"));
}

#[tokio::test]
async fn malformed_request_line_gets_400_and_close() {
    let pipeline = pipeline_with(|_| {});
    let raw = h1_exchange(pipeline, b"NOT-A-REQUEST\r\n\r\n").await;
    assert!(raw.starts_with("HTTP/1.1 400 Bad Request"), "{raw}");
    assert_eq!(
        header_value(raw.split("\r\n\r\n").next().unwrap(), "connection"),
        Some("close")
    );
}

#[tokio::test]
async fn oversized_request_line_gets_413() {
    let pipeline = pipeline_with(|_| {});
    let mut raw = b"GET /".to_vec();
    raw.extend(std::iter::repeat_n(b'a', 10_000));
    let out = h1_exchange(pipeline, &raw).await;
    assert!(out.starts_with("HTTP/1.1 413"), "{out}");
}

#[tokio::test]
async fn unsupported_method_gets_405_with_allow() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());
    let raw = h1_exchange(
        pipeline,
        b"TRACE / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 405"), "{raw}");
    assert_eq!(
        header_value(raw.split("\r\n\r\n").next().unwrap(), "allow"),
        Some("GET, HEAD")
    );
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());
    let raw = h1_exchange(
        pipeline,
        b"HEAD / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (head, rest) = raw.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    let declared: usize = header_value(head, "content-length").unwrap().parse().unwrap();
    assert!(declared > 0);
    assert!(rest.is_empty(), "HEAD must carry no body, got {rest:?}");
}

#[tokio::test]
async fn conditional_revalidation_round_trip() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());

    let first = h1_exchange(
        pipeline.clone(),
        b"GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    let head = first.split("\r\n\r\n").next().unwrap();
    let etag = header_value(head, "etag").unwrap().to_string();

    let request = format!(
        "GET /index.html HTTP/1.1\r\nHost: x\r\nIf-None-Match: {etag}\r\nConnection: close\r\n\r\n"
    );
    let second = h1_exchange(pipeline, request.as_bytes()).await;
    assert!(second.starts_with("HTTP/1.1 304 Not Modified"), "{second}");
    let (head, rest) = second.split_once("\r\n\r\n").unwrap();
    assert!(header_value(head, "etag").is_some());
    assert!(rest.is_empty(), "304 must carry no body");
}

#[tokio::test]
async fn security_headers_on_every_response() {
    let webroot = webroot_with_index();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());
    let raw = h1_exchange(
        pipeline,
        b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    let head = raw.split("\r\n\r\n").next().unwrap();
    assert_eq!(header_value(head, "x-frame-options"), Some("DENY"));
    assert_eq!(header_value(head, "x-content-type-options"), Some("nosniff"));
    assert_eq!(
        header_value(head, "referrer-policy"),
        Some("strict-origin-when-cross-origin")
    );
    assert!(header_value(head, "content-security-policy").is_some());
    assert!(header_value(head, "date").is_some());
    assert!(header_value(head, "server").is_some());
    // Plaintext connection: no HSTS.
    assert!(header_value(head, "strict-transport-security").is_none());
}

#[tokio::test]
async fn gzip_response_for_accepting_client() {
    let webroot = tempfile::tempdir().unwrap();
    std::fs::write(
        webroot.path().join("app.css"),
        "body { margin: 0; } ".repeat(100),
    )
    .unwrap();
    let pipeline = pipeline_with(|c| c.webroot = webroot.path().to_path_buf());

    let raw = h1_exchange(
        pipeline,
        b"GET /app.css HTTP/1.1\r\nHost: x\r\nAccept-Encoding: gzip\r\nConnection: close\r\n\r\n",
    )
    .await;
    let head = raw.split("\r\n\r\n").next().unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(header_value(head, "content-encoding"), Some("gzip"));
    assert_eq!(header_value(head, "vary"), Some("Accept-Encoding"));
}

#[tokio::test]
async fn api_echo_round_trips_form_body() {
    let pipeline = pipeline_with(|_| {});
    let body = "name=svc&value=42";
    let request = format!(
        "POST /api/echo HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let raw = h1_exchange(pipeline, request.as_bytes()).await;
    let (head, response_body) = raw.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert!(response_body.contains("\"name\":\"svc\""));
    assert!(response_body.contains("\"value\":\"42\""));
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let pipeline = pipeline_with(|_| {});

    let live = h1_exchange(
        pipeline.clone(),
        b"GET /health/live HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(live.starts_with("HTTP/1.1 200 OK"));
    assert!(live.contains("\"UP\""));

    let metrics = h1_exchange(
        pipeline,
        b"GET /metrics HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(metrics.starts_with("HTTP/1.1 200 OK"));
    assert!(metrics.contains("# TYPE"));
}

#[tokio::test]
async fn body_over_limit_is_rejected_with_413() {
    let pipeline = pipeline_with(|c| c.limits.max_body_bytes = 64);
    let request = format!(
        "POST /api/upload HTTP/1.1\r\nHost: x\r\nContent-Length: 200\r\n\r\n{}",
        "x".repeat(200)
    );
    let raw = h1_exchange(pipeline, request.as_bytes()).await;
    assert!(raw.starts_with("HTTP/1.1 413"), "{raw}");
}

#[tokio::test]
async fn vhost_resolves_per_host_webroot() {
    let default_root = webroot_with_index();
    let other_root = tempfile::tempdir().unwrap();
    std::fs::write(other_root.path().join("index.html"), "other site").unwrap();

    let pipeline = pipeline_with(|c| {
        c.webroot = default_root.path().to_path_buf();
        c.features.vhosts = true;
        c.vhosts
            .insert("other.test".to_string(), other_root.path().to_path_buf());
    });

    let raw = h1_exchange(
        pipeline.clone(),
        b"GET / HTTP/1.1\r\nHost: www.OTHER.test:8080\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(raw.contains("other site"), "{raw}");

    let fallback = h1_exchange(
        pipeline,
        b"GET / HTTP/1.1\r\nHost: unknown.example\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(fallback.contains("welcome"), "{fallback}");
}

#[tokio::test]
async fn redirect_rule_answers_with_location() {
    let pipeline = pipeline_with(|c| {
        c.features.routing = true;
        c.routing_rules.push("301:/old/*:/new/*".to_string());
    });
    let raw = h1_exchange(
        pipeline,
        b"GET /old/page.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    )
    .await;
    let head = raw.split("\r\n\r\n").next().unwrap();
    assert!(head.starts_with("HTTP/1.1 301"), "{raw}");
    assert_eq!(header_value(head, "location"), Some("/new/page.html"));
}
