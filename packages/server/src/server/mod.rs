//! Acceptor and connection lifecycle
//!
//! Binds the configured listeners, accepts connections, and hands each to
//! the right engine: ALPN decides for TLS listeners, the plaintext sniff
//! decides otherwise. One tokio task per connection; the shutdown
//! coordinator tracks membership and drives the drain sequence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub mod demux;
pub mod shutdown;
pub mod tls;

use crate::config::{ServerConfig, validate};
use crate::error::{Result, ServerError};
use crate::protocols::h1;
use crate::protocols::h2::H2Connection;
use crate::routing::Pipeline;
use crate::telemetry::MetricsCollector;
use shutdown::ShutdownCoordinator;

/// The serving runtime: configuration, shared services, listeners.
pub struct Server {
    config: Arc<ServerConfig>,
    pipeline: Arc<Pipeline>,
    metrics: Arc<MetricsCollector>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl Server {
    /// Validates the configuration and assembles the request pipeline.
    pub fn new(config: ServerConfig) -> Result<Self> {
        validate(&config)?;
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsCollector::new());
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            Arc::clone(&metrics),
            Arc::clone(&shutdown),
        )?);
        Ok(Self { config, pipeline, metrics, shutdown })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    /// Handle used to trigger a graceful shutdown externally.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.shutdown)
    }

    /// Binds the listeners and serves until shutdown completes. Returns
    /// an error when a bind or TLS setup fails, which the binary maps to
    /// a non-zero exit.
    pub async fn run(&self) -> Result<()> {
        let mut listeners = Vec::with_capacity(self.config.listeners.len());
        for listener_config in &self.config.listeners {
            let listener = bind(listener_config.addr)?;
            let acceptor = match &listener_config.tls {
                Some(settings) => Some(tls::build_acceptor(settings)?),
                None => None,
            };
            let local = listener.local_addr()?;
            tracing::info!(
                addr = %local,
                tls = acceptor.is_some(),
                "listening"
            );
            listeners.push((listener, acceptor));
        }

        if self.config.features.rate_limit {
            let _sweeper = self
                .pipeline
                .rate_limiter()
                .start_sweeper(std::time::Duration::from_secs(60));
        }

        let mut accept_tasks = Vec::with_capacity(listeners.len());
        for (listener, acceptor) in listeners {
            let pipeline = Arc::clone(&self.pipeline);
            let shutdown = Arc::clone(&self.shutdown);
            let metrics = Arc::clone(&self.metrics);
            accept_tasks.push(tokio::spawn(accept_loop(
                listener, acceptor, pipeline, shutdown, metrics,
            )));
        }
        self.pipeline.accepting_flag().store(true, Ordering::Relaxed);

        // The signal hook begins the drain; new connections get 503s from
        // the accept loops from that point on.
        {
            let shutdown = Arc::clone(&self.shutdown);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    shutdown.begin();
                }
            });
        }

        self.shutdown.wait_begun().await;
        let drained = self.shutdown.drain(&self.config.shutdown).await;
        if !drained {
            tracing::warn!(
                active = self.shutdown.active_connections(),
                "drain deadline reached, forcing close"
            );
        }
        for task in accept_tasks {
            task.abort();
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Binds one listener with address reuse and a deep backlog.
fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() { socket2::Domain::IPV4 } else { socket2::Domain::IPV6 };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
        .map_err(ServerError::Io)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Config(format!("cannot bind {addr}: {e}")))?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into()).map_err(ServerError::Io)
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    pipeline: Arc<Pipeline>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Arc<MetricsCollector>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };

        if shutdown.is_shutting_down() {
            tokio::spawn(refuse(stream));
            continue;
        }

        let guard = shutdown.register();
        metrics.gauge_inc("stratus_active_connections", &[]);
        metrics.counter_add("stratus_connections_total", &[], 1);

        let pipeline = Arc::clone(&pipeline);
        let acceptor = acceptor.clone();
        let metrics = Arc::clone(&metrics);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = handle_connection(stream, remote, acceptor, pipeline).await
                && !e.is_disconnect()
            {
                tracing::debug!(%remote, error = %e, "connection ended with error");
            }
            metrics.gauge_dec("stratus_active_connections", &[]);
        });
    }
}

/// Minimal 503 for connections arriving mid-drain.
async fn refuse(mut stream: TcpStream) {
    let _ = stream
        .write_all(
            b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
    let _ = stream.shutdown().await;
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    pipeline: Arc<Pipeline>,
) -> Result<()> {
    let _ = stream.set_nodelay(true);

    match acceptor {
        Some(acceptor) => {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| ServerError::Tls(format!("handshake failed: {e}")))?;
            let negotiated_h2 = tls_stream
                .get_ref()
                .1
                .alpn_protocol()
                .is_some_and(|proto| proto == tls::ALPN_H2);
            if negotiated_h2 {
                tracing::debug!(%remote, "alpn selected h2");
                H2Connection::new(tls_stream, remote, true, pipeline).run(false).await
            } else {
                // http/1.1 negotiated, or no ALPN at all.
                tracing::debug!(%remote, "alpn selected http/1.1");
                h1::serve(tls_stream, remote, true, pipeline).await
            }
        }
        None => match demux::sniff(stream).await? {
            None => Ok(()),
            Some((demux::Protocol::Http2, rewound)) => {
                tracing::debug!(%remote, "preface selected h2");
                H2Connection::new(rewound, remote, false, pipeline).run(true).await
            }
            Some((demux::Protocol::Http1, rewound)) => {
                h1::serve(rewound, remote, false, pipeline).await
            }
        },
    }
}
