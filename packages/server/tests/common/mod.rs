//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use stratus_server::config::ServerConfig;
use stratus_server::protocols::h1;
use stratus_server::routing::Pipeline;
use stratus_server::server::shutdown::ShutdownCoordinator;
use stratus_server::telemetry::MetricsCollector;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const CLIENT_ADDR: &str = "192.0.2.10:40000";

/// Builds a pipeline over a customized configuration.
pub fn pipeline_with(customize: impl FnOnce(&mut ServerConfig)) -> Arc<Pipeline> {
    let mut config = ServerConfig::default();
    customize(&mut config);
    Arc::new(
        Pipeline::new(
            Arc::new(config),
            Arc::new(MetricsCollector::new()),
            Arc::new(ShutdownCoordinator::new()),
        )
        .expect("test pipeline"),
    )
}

/// Runs the H/1 engine against an in-memory connection, returning the
/// client half and the serve task.
pub fn spawn_h1(
    pipeline: Arc<Pipeline>,
) -> (DuplexStream, tokio::task::JoinHandle<stratus_server::Result<()>>) {
    let (client, server) = tokio::io::duplex(2 * 1024 * 1024);
    let remote: SocketAddr = CLIENT_ADDR.parse().unwrap();
    let task = tokio::spawn(h1::serve(server, remote, false, pipeline));
    (client, task)
}

/// Writes raw request bytes, reads until the server closes, and returns
/// everything it sent back.
pub async fn h1_exchange(pipeline: Arc<Pipeline>, raw: &[u8]) -> String {
    let (mut client, task) = spawn_h1(pipeline);
    client.write_all(raw).await.unwrap();
    // Half-close so a keep-alive server sees EOF at the next request
    // boundary instead of waiting out the idle timeout.
    client.shutdown().await.unwrap();

    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    drop(client);
    let _ = task.await;
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a raw HTTP/1.1 byte stream into response head/body pairs,
/// assuming every response carries a Content-Length.
pub fn split_responses(raw: &str) -> Vec<(String, String)> {
    let mut responses = Vec::new();
    let mut rest = raw;
    while let Some(head_end) = rest.find("\r\n\r\n") {
        let head = &rest[..head_end];
        let after = &rest[head_end + 4..];
        let length: usize = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse().ok())?
            })
            .unwrap_or(0);
        let body = &after[..length.min(after.len())];
        responses.push((head.to_string(), body.to_string()));
        rest = &after[length.min(after.len())..];
        if rest.is_empty() {
            break;
        }
    }
    responses
}

/// Header value out of a raw response head.
pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (n, v) = line.split_once(':')?;
        n.trim().eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
