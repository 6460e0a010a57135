//! Engine-agnostic request pipeline
//!
//! Both connection engines hand every completed request to [`Pipeline::handle`]
//! and get back either a finished response or an upgrade decision. Order on
//! the request path: shutdown gate, admission, rate limit, routing rules,
//! auth, then dispatch (reserved endpoints, WebSocket upgrade, SSE
//! subscribe, static files). Header stamping runs last so nothing mutates
//! headers after serialization starts.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use http::{Method, StatusCode, header};
use tokio::sync::Semaphore;

pub mod handlers;
pub mod rules;
pub mod static_files;
pub mod vhost;

use crate::cache::{EtagCache, GzipCache};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::http::headers::apply_common_headers;
use crate::http::{HttpVersion, Request, Response};
use crate::protocols::sse::SseHub;
use crate::protocols::ws::handshake;
use crate::security::{Authenticator, RateDecision, RateLimiter};
use crate::server::shutdown::ShutdownCoordinator;
use crate::telemetry::MetricsCollector;
use crate::util::BufferPool;

use rules::{RoutingRules, RuleAction};
use static_files::StaticFiles;
use vhost::VirtualHosts;

/// What the engine should do with the connection after this request.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Write the response and continue per its keep-alive disposition.
    Response(Response),
    /// Write the 101 response, then hand the socket to the WebSocket
    /// engine.
    WebSocket { response: Response },
    /// Write SSE headers, then register the connection on the topic.
    Sse { topic: String },
}

/// Shared request-path services plus dispatch.
pub struct Pipeline {
    config: Arc<ServerConfig>,
    metrics: Arc<MetricsCollector>,
    rate_limiter: Arc<RateLimiter>,
    authenticator: Authenticator,
    vhosts: VirtualHosts,
    rules: RoutingRules,
    statics: StaticFiles,
    sse_hub: Arc<SseHub>,
    shutdown: Arc<ShutdownCoordinator>,
    admission: Arc<Semaphore>,
    accepting: Arc<AtomicBool>,
    buffer_pool: Arc<BufferPool>,
}

impl Pipeline {
    pub fn new(
        config: Arc<ServerConfig>,
        metrics: Arc<MetricsCollector>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> crate::error::Result<Self> {
        let etag_cache = Arc::new(EtagCache::new());
        let gzip_cache = Arc::new(GzipCache::new());
        let statics = StaticFiles::new(
            config.limits.clone(),
            config.features.clone(),
            etag_cache,
            gzip_cache,
        );
        let rules = RoutingRules::parse(&config.routing_rules)?;
        let vhosts = VirtualHosts::new(
            config.webroot.clone(),
            config.vhosts.clone(),
            config.features.vhosts,
        );
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let authenticator = Authenticator::new(config.auth.clone());
        let admission = Arc::new(Semaphore::new(config.limits.request_queue_limit));
        let sse_hub = Arc::new(SseHub::new(config.sse.clone()));

        Ok(Self {
            config,
            metrics,
            rate_limiter,
            authenticator,
            vhosts,
            rules,
            statics,
            sse_hub,
            shutdown,
            admission,
            accepting: Arc::new(AtomicBool::new(false)),
            buffer_pool: Arc::new(BufferPool::default()),
        })
    }

    /// Runs one request through the pipeline.
    pub async fn handle(&self, mut req: Request) -> RouteOutcome {
        let started = Instant::now();

        if self.shutdown.is_shutting_down() {
            let mut resp = Response::unavailable();
            apply_common_headers(&mut resp, req.secure);
            return RouteOutcome::Response(resp);
        }

        let Ok(_permit) = self.admission.try_acquire() else {
            self.metrics.counter_add("stratus_admission_rejected_total", &[], 1);
            let mut resp = Response::unavailable();
            apply_common_headers(&mut resp, req.secure);
            return RouteOutcome::Response(resp);
        };

        let rate = if self.config.features.rate_limit {
            let decision = self.rate_limiter.try_acquire(req.remote_addr.ip());
            if !decision.allowed {
                self.metrics.counter_add("stratus_rate_limited_total", &[], 1);
                let mut resp = Response::status_page(StatusCode::TOO_MANY_REQUESTS);
                resp.set_header(header::RETRY_AFTER, decision.retry_after_secs.to_string());
                apply_rate_headers(&mut resp, &decision);
                apply_common_headers(&mut resp, req.secure);
                return RouteOutcome::Response(resp);
            }
            Some(decision)
        } else {
            None
        };

        if self.config.features.routing
            && let Some(action) = self.rules.apply(&req.path)
        {
            match action {
                RuleAction::Redirect { status, location } => {
                    let mut resp = redirect_response(status, &location);
                    finish(&mut resp, &req, rate.as_ref());
                    self.record(&req, &resp, started);
                    return RouteOutcome::Response(resp);
                }
                RuleAction::Rewrite { path } => {
                    tracing::debug!(request_id = %req.request_id, from = %req.path, to = %path, "rewrite");
                    req.path = path;
                    // Routing restarts once; a second rewrite is not
                    // followed, but a redirect on the rewritten path is.
                    if let Some(RuleAction::Redirect { status, location }) =
                        self.rules.apply(&req.path)
                    {
                        let mut resp = redirect_response(status, &location);
                        finish(&mut resp, &req, rate.as_ref());
                        self.record(&req, &resp, started);
                        return RouteOutcome::Response(resp);
                    }
                }
            }
        }

        if self.config.features.auth
            && let Err(mut challenge) = self.authenticator.check(&req)
        {
            finish(&mut challenge, &req, rate.as_ref());
            self.record(&req, &challenge, started);
            return RouteOutcome::Response(challenge);
        }

        if req.version != HttpVersion::H2 && req.method == Method::GET && req.wants_websocket() {
            match handshake::accept_response(&req) {
                Ok(response) => return RouteOutcome::WebSocket { response },
                Err(mut reject) => {
                    finish(&mut reject, &req, rate.as_ref());
                    self.record(&req, &reject, started);
                    return RouteOutcome::Response(reject);
                }
            }
        }

        if req.method == Method::GET
            && let Some(topic) = sse_topic(&req.path)
        {
            return RouteOutcome::Sse { topic };
        }

        let mut resp = self.dispatch(&req).await;
        finish(&mut resp, &req, rate.as_ref());
        self.record(&req, &resp, started);
        RouteOutcome::Response(resp)
    }

    async fn dispatch(&self, req: &Request) -> Response {
        match req.path.as_str() {
            "/health/live" => gated_get(req, handlers::health_live),
            "/health/ready" => gated_get(req, || {
                let queue_available = self.admission.available_permits() > 0;
                let webroot_ok = std::fs::metadata(self.vhosts.default_root()).is_ok();
                handlers::health_ready(queue_available, webroot_ok)
            }),
            "/health/startup" => gated_get(req, || handlers::health_startup(&self.accepting)),
            "/metrics" if self.config.features.metrics => {
                gated_get(req, || handlers::metrics_endpoint(&self.metrics))
            }
            "/api/echo" => handlers::api_echo(req),
            "/api/upload" => handlers::api_upload(req),
            path if path == "/api/data" || path.starts_with("/api/data/") => {
                handlers::api_data(req)
            }
            _ => self.serve_static(req).await,
        }
    }

    async fn serve_static(&self, req: &Request) -> Response {
        match req.method {
            Method::GET | Method::HEAD => {
                let webroot = self.vhosts.resolve(req.host());
                match self.statics.serve(req, webroot).await {
                    Ok(resp) => resp,
                    Err(ServerError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                        Response::status_page(StatusCode::NOT_FOUND)
                    }
                    Err(e) => {
                        tracing::error!(request_id = %req.request_id, error = %e, "static serve failed");
                        Response::status_page(StatusCode::INTERNAL_SERVER_ERROR)
                    }
                }
            }
            Method::OPTIONS => Response::new(StatusCode::NO_CONTENT)
                .with_header(header::ALLOW, "GET, HEAD, OPTIONS"),
            _ => Response::status_page(StatusCode::METHOD_NOT_ALLOWED)
                .with_header(header::ALLOW, "GET, HEAD"),
        }
    }

    fn record(&self, req: &Request, resp: &Response, started: Instant) {
        if !self.config.features.metrics {
            return;
        }
        let status = resp.status.as_u16().to_string();
        self.metrics.counter_add(
            "stratus_requests_total",
            &[("method", req.method.as_str()), ("status", &status)],
            1,
        );
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .histogram_observe("stratus_request_duration_ms", &[], elapsed_ms);
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[must_use]
    pub fn sse_hub(&self) -> &Arc<SseHub> {
        &self.sse_hub
    }

    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    #[must_use]
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    #[must_use]
    pub fn accepting_flag(&self) -> &Arc<AtomicBool> {
        &self.accepting
    }
}

/// GET-only endpoints answer 405 to everything else.
fn gated_get(req: &Request, build: impl FnOnce() -> Response) -> Response {
    if req.method == Method::GET {
        build()
    } else {
        Response::status_page(StatusCode::METHOD_NOT_ALLOWED).with_header(header::ALLOW, "GET")
    }
}

/// `/events` or `/events/{topic}`.
fn sse_topic(path: &str) -> Option<String> {
    if path == "/events" {
        return Some("events".to_string());
    }
    path.strip_prefix("/events/")
        .filter(|topic| !topic.is_empty())
        .map(str::to_string)
}

fn redirect_response(status: StatusCode, location: &str) -> Response {
    let html = format!(
        "<!DOCTYPE html><html><head><title>{code}</title></head>\
         <body><a href=\"{location}\">{location}</a></body></html>",
        code = status.as_u16(),
    );
    let mut resp = Response::new(status);
    resp.set_header(header::LOCATION, location);
    resp.set_header(header::CONTENT_TYPE, "text/html; charset=utf-8");
    resp.body = crate::http::ResponseBody::Bytes(bytes::Bytes::from(html));
    resp
}

fn apply_rate_headers(resp: &mut Response, decision: &RateDecision) {
    resp.set_header("x-ratelimit-limit", decision.limit.to_string());
    resp.set_header("x-ratelimit-remaining", decision.remaining.to_string());
    resp.set_header(
        "x-ratelimit-reset",
        decision.retry_after_secs.max(1).to_string(),
    );
}

/// Final mutations before serialization: rate headers, keep-alive
/// disposition, and the common header set.
fn finish(resp: &mut Response, req: &Request, rate: Option<&RateDecision>) {
    if let Some(decision) = rate {
        apply_rate_headers(resp, decision);
    }
    if !req.keep_alive() {
        resp.keep_alive = false;
    }
    apply_common_headers(resp, req.secure);
}
