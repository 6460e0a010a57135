//! SSE connection serving
//!
//! The long-lived H/1 response: stream headers once, then drain the
//! subscriber queue into the socket, interleaving keepalive comments.
//! The connection ends on client disconnect, a failed write, or server
//! shutdown. H/2 subscribers reuse the same hub queue; their drain loop
//! lives in the H/2 engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::http::headers::SERVER_NAME;
use crate::server::shutdown::ShutdownCoordinator;

use super::event::KEEPALIVE;
use super::hub::{RegisterError, SseHub};

/// Serves one SSE subscription over an HTTP/1.1 connection. Consumes the
/// connection; SSE responses are close-delimited.
pub async fn serve_h1<S>(
    mut io: S,
    topic: &str,
    hub: &Arc<SseHub>,
    remote: SocketAddr,
    shutdown: &Arc<ShutdownCoordinator>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (conn, mut rx) = match hub.register(topic, remote.ip()) {
        Ok(registered) => registered,
        Err(reason) => {
            tracing::debug!(%remote, topic, ?reason, "sse subscribe refused");
            let body = "subscription limit reached";
            let head = format!(
                "HTTP/1.1 503 Service Unavailable\r\nDate: {date}\r\nServer: {SERVER_NAME}\r\n\
                 Content-Type: text/plain; charset=utf-8\r\nContent-Length: {len}\r\n\
                 Connection: close\r\n\r\n{body}",
                date = httpdate::fmt_http_date(SystemTime::now()),
                len = body.len(),
            );
            io.write_all(head.as_bytes()).await?;
            return Ok(());
        }
    };

    let head = format!(
        "HTTP/1.1 200 OK\r\nDate: {date}\r\nServer: {SERVER_NAME}\r\n\
         Content-Type: text/event-stream\r\nCache-Control: no-cache\r\n\
         Connection: close\r\n\r\n",
        date = httpdate::fmt_http_date(SystemTime::now()),
    );
    if let Err(e) = io.write_all(head.as_bytes()).await {
        hub.unregister(topic, conn.id);
        return Err(e.into());
    }

    tracing::debug!(%remote, topic, id = conn.id, "sse subscribed");
    let mut keepalive = tokio::time::interval(hub.keepalive_interval());
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    keepalive.tick().await; // first tick fires immediately

    loop {
        let write_result = tokio::select! {
            event = rx.recv() => match event {
                Some(bytes) => write_flush(&mut io, &bytes).await,
                None => break,
            },
            _ = keepalive.tick() => write_flush(&mut io, KEEPALIVE.as_bytes()).await,
            () = shutdown.wait_begun() => break,
        };
        if write_result.is_err() {
            break;
        }
    }

    conn.close();
    hub.unregister(topic, conn.id);
    tracing::debug!(%remote, topic, id = conn.id, "sse closed");
    Ok(())
}

async fn write_flush<S: AsyncWrite + Unpin>(io: &mut S, bytes: &[u8]) -> std::io::Result<()> {
    io.write_all(bytes).await?;
    io.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SseConfig;
    use crate::protocols::sse::SseEvent;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn streams_headers_and_events() {
        let hub = Arc::new(SseHub::new(SseConfig::default()));
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (server_io, mut client) = tokio::io::duplex(8192);

        let serve = {
            let hub = Arc::clone(&hub);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                serve_h1(
                    server_io,
                    "ticker",
                    &hub,
                    "127.0.0.1:5555".parse().unwrap(),
                    &shutdown,
                )
                .await
            })
        };

        // Wait for the subscription to land, then broadcast.
        while hub.subscriber_count("ticker") == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(hub.broadcast("ticker", &SseEvent::new("tick-1")), 1);

        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&collected).contains("data: tick-1\n\n") {
            let n = client.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection ended early");
            collected.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/event-stream"));

        shutdown.begin();
        serve.await.unwrap().unwrap();
        assert_eq!(hub.subscriber_count("ticker"), 0);
    }

    #[tokio::test]
    async fn refused_subscription_gets_503() {
        let hub = Arc::new(SseHub::new(SseConfig {
            max_connections_per_topic: 0,
            max_connections_per_ip: 1,
            keepalive_interval: Duration::from_secs(15),
        }));
        // A zero cap refuses immediately at validation time in config, but
        // the hub itself also refuses.
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (server_io, mut client) = tokio::io::duplex(4096);

        serve_h1(
            server_io,
            "t",
            &hub,
            "127.0.0.1:5556".parse().unwrap(),
            &shutdown,
        )
        .await
        .unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 503"));
    }
}
