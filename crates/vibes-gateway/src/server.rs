//! Gateway HTTP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Instrument};
use vibes_core::{Clock, CorrelationId, CredentialVerifier, IdentityClaims, PathClassifier, SystemClock};
use vibes_middleware::stages::{AccessMiddleware, IdentityMiddleware, RateLimitMiddleware};
use vibes_middleware::{
    FixedWindowLimiter, Middleware, MiddlewareContext, Pipeline, Rejection, Request, Response, ResponseExt,
};
use vibes_telemetry::metrics::{record_auth_failure, record_rate_limited, record_request, run_upkeep};
use vibes_telemetry::InFlightGuard;

use crate::config::GatewayConfig;
use crate::endpoints::{self, SelfEndpoint};
use crate::error::{ErrorResponse, GatewayError, GatewayResult};
use crate::headers::forward_headers;
use crate::health::HealthChecker;
use crate::proxy::{ProxyClient, ProxyRequest};
use crate::registry::{ServiceLocator, ServiceRegistry};
use crate::routes::RouteTable;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every request handler.
#[derive(Debug)]
struct GatewayState {
    config: GatewayConfig,
    locator: Arc<dyn ServiceLocator>,
    routes: RouteTable,
    proxy: ProxyClient,
    health: HealthChecker,
    gateway_name: HeaderValue,
}

impl GatewayState {
    async fn dispatch(
        &self,
        request: Request,
        identity: Option<IdentityClaims>,
        correlation_id: CorrelationId,
    ) -> Response {
        if let Some(endpoint) = SelfEndpoint::match_request(request.method(), request.uri().path()) {
            return self.serve_endpoint(endpoint, identity.as_ref(), request.uri().path()).await;
        }

        match self.forward(request, identity.as_ref(), correlation_id).await {
            Ok(response) => response,
            Err(e) => error_response(&e, correlation_id),
        }
    }

    async fn serve_endpoint(
        &self,
        endpoint: SelfEndpoint,
        identity: Option<&IdentityClaims>,
        path: &str,
    ) -> Response {
        match endpoint {
            SelfEndpoint::Root => endpoints::root(self.locator.as_ref()),
            SelfEndpoint::Health | SelfEndpoint::Alive => endpoints::liveness(&self.health),
            SelfEndpoint::Test => endpoints::downstream(&self.health).await,
            SelfEndpoint::Routes => {
                let base = format!(
                    "http://{}:{}",
                    self.config.server.listen_addr, self.config.server.listen_port
                );
                endpoints::routes(&self.routes, self.locator.as_ref(), &base)
            }
            SelfEndpoint::Me => endpoints::me(identity, path),
            SelfEndpoint::Metrics => endpoints::metrics(self.config.telemetry.metrics_enabled),
        }
    }

    async fn forward(
        &self,
        request: Request,
        identity: Option<&IdentityClaims>,
        correlation_id: CorrelationId,
    ) -> GatewayResult<Response> {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        let route = self
            .routes
            .resolve(path_and_query)
            .ok_or_else(|| GatewayError::route_not_found(request.uri().path()))?;

        let base_url = self.locator.resolve(route.service)?;
        let url = format!("{base_url}{}", route.upstream_path);
        let headers = forward_headers(request.headers(), identity, correlation_id, &self.gateway_name);

        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        let proxy_request = ProxyRequest {
            service: route.service,
            url,
            method: parts.method,
            headers,
            body,
        };
        self.proxy.forward(proxy_request, &parts.headers).await
    }

    fn route_label(&self, method: &Method, path: &str) -> String {
        if let Some(endpoint) = SelfEndpoint::match_request(method, path) {
            return endpoint.label().to_string();
        }
        self.routes
            .resolve(path)
            .map_or_else(|| "unmatched".to_string(), |route| route.prefix.to_string())
    }
}

/// Create an error response.
fn error_response(error: &GatewayError, correlation_id: CorrelationId) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = ErrorResponse::from(error).with_correlation_id(correlation_id);
    let value = serde_json::to_value(&body).unwrap_or_default();
    Response::json(status, &value)
}

/// A request body, either already buffered or still on the connection.
enum RequestBody {
    Buffered(Full<Bytes>),
    Streaming(Incoming),
}

/// The request handler: pipeline, self endpoints and forwarding.
///
/// Cheap to share behind an `Arc`; all state is immutable or internally
/// synchronized.
#[derive(Debug)]
pub struct Gateway {
    state: Arc<GatewayState>,
    admission: Option<RateLimitMiddleware>,
    pipeline: Pipeline,
}

impl Gateway {
    /// Start building a gateway from validated configuration.
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            locator: None,
            clock: None,
        }
    }

    /// The configuration the gateway was built with.
    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }

    /// The installed stages, in order. Admission runs on the request head,
    /// the rest on the buffered request.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.admission
            .iter()
            .map(Middleware::name)
            .chain(self.pipeline.stage_names())
            .collect()
    }

    /// The rate limiter, when rate limiting is enabled.
    pub fn limiter(&self) -> Option<&Arc<FixedWindowLimiter>> {
        self.admission.as_ref().map(RateLimitMiddleware::limiter)
    }

    /// Handle one buffered request.
    pub async fn handle(&self, request: Request, peer: Option<SocketAddr>) -> Response {
        let (parts, body) = request.into_parts();
        self.process(parts, RequestBody::Buffered(body), peer).await
    }

    async fn handle_incoming(&self, request: http::Request<Incoming>, peer: SocketAddr) -> Response {
        let (parts, body) = request.into_parts();
        self.process(parts, RequestBody::Streaming(body), Some(peer)).await
    }

    async fn process(&self, parts: Parts, body: RequestBody, peer: Option<SocketAddr>) -> Response {
        let _in_flight = InFlightGuard::new();
        let mut ctx = MiddlewareContext::new().with_client_addr(peer);
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();

        let span = tracing::info_span!(
            "request",
            correlation_id = %ctx.correlation_id(),
            method = %method,
            path = %path,
            peer = %peer.map(|p| p.to_string()).unwrap_or_default(),
        );

        async move {
            let response = self.respond(&mut ctx, parts, body).await;
            self.observe(&ctx, &method, &path, response.status());
            response
        }
        .instrument(span)
        .await
    }

    async fn respond(&self, ctx: &mut MiddlewareContext, parts: Parts, body: RequestBody) -> Response {
        // A throttled request is answered before its body is read.
        if let Some(admission) = &self.admission {
            if let Some(rejected) = admission.check_admission(&parts.headers, &parts.uri, ctx) {
                return rejected;
            }
        }

        let body = match self.read_body(body).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Rejected request body");
                return error_response(&e, ctx.correlation_id());
            }
        };

        let state = self.state.clone();
        self.pipeline
            .process(ctx, Request::from_parts(parts, body), move |ctx, request| {
                let identity = ctx.identity().cloned();
                let correlation_id = ctx.correlation_id();
                Box::pin(async move { state.dispatch(request, identity, correlation_id).await })
            })
            .await
    }

    async fn read_body(&self, body: RequestBody) -> GatewayResult<Full<Bytes>> {
        let limit = self.state.config.server.max_request_body_size;
        match body {
            RequestBody::Buffered(body) => Ok(body),
            RequestBody::Streaming(body) => match Limited::new(body, limit).collect().await {
                Ok(collected) => Ok(Full::new(collected.to_bytes())),
                Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                    Err(GatewayError::PayloadTooLarge { limit })
                }
                Err(e) => Err(GatewayError::server(format!("failed to read request body: {e}"))),
            },
        }
    }

    fn observe(&self, ctx: &MiddlewareContext, method: &Method, path: &str, status: StatusCode) {
        if ctx.rejection() == Some(Rejection::RateLimited) {
            record_rate_limited();
        }
        if let Some(failure) = ctx.auth_failure() {
            record_auth_failure(failure.reason());
        }

        let duration = ctx.elapsed();
        record_request(&self.state.route_label(method, path), status.as_u16(), duration);

        info!(
            status = status.as_u16(),
            duration_ms = %duration.as_millis(),
            rejection = ctx.rejection().map(Rejection::as_str),
            user = ctx.identity().map(IdentityClaims::log_id).as_deref(),
            "Request completed"
        );
    }
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    locator: Option<Arc<dyn ServiceLocator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GatewayBuilder {
    /// Use a custom service locator instead of the configured registry.
    #[must_use]
    pub fn locator(mut self, locator: Arc<dyn ServiceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Use a custom clock for token lifetimes and rate windows.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate configuration, resolve every routed service and assemble
    /// the pipeline.
    pub fn build(self) -> GatewayResult<Gateway> {
        let config = self.config;
        config.validate()?;

        let locator = self
            .locator
            .unwrap_or_else(|| Arc::new(ServiceRegistry::from_settings(&config.services)));
        let routes = RouteTable::new(&config.routes);
        let services: Vec<String> = routes.services().into_iter().map(str::to_string).collect();
        for service in &services {
            let url = locator.resolve(service)?;
            info!(service = %service, url = %url, "Resolved upstream service");
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let verifier = CredentialVerifier::with_algorithm(
            config.jwt.key.as_bytes(),
            config.jwt.algorithm.into(),
            &config.jwt.issuer,
            &config.jwt.audience,
        )
        .with_clock(clock.clone());
        let classifier = PathClassifier::new(&config.access.public_prefixes);

        let limiter = config.rate_limit.enabled.then(|| {
            Arc::new(
                FixedWindowLimiter::new(config.rate_limit.permit_limit, config.rate_limit.window)
                    .with_clock(clock.clone()),
            )
        });

        let admission = limiter.map(|limiter| {
            RateLimitMiddleware::new(limiter).key_extractor(config.rate_limit.partition.into())
        });
        let pipeline = Pipeline::builder()
            .stage(IdentityMiddleware::new(Arc::new(verifier)))
            .stage(AccessMiddleware::new(Arc::new(classifier)))
            .build();

        let gateway_name = HeaderValue::from_str(&config.server.gateway_name)
            .map_err(|_| GatewayError::config("server.gateway_name is not a valid header value"))?;
        let proxy = ProxyClient::new(config.server.upstream_timeout)?;
        let health = HealthChecker::new(locator.clone(), services)?;

        Ok(Gateway {
            state: Arc::new(GatewayState {
                config,
                locator,
                routes,
                proxy,
                health,
                gateway_name,
            }),
            admission,
            pipeline,
        })
    }
}

/// Gateway server.
pub struct GatewayServer {
    gateway: Arc<Gateway>,
    listener: TcpListener,
}

impl GatewayServer {
    /// Bind to the configured listen address.
    pub async fn bind(gateway: Gateway) -> GatewayResult<Self> {
        let server = &gateway.config().server;
        let addr = SocketAddr::new(
            server
                .listen_addr
                .parse()
                .map_err(|e| GatewayError::config(format!("invalid listen address: {e}")))?,
            server.listen_port,
        );
        Self::bind_to(gateway, addr).await
    }

    /// Bind to an explicit address. Port `0` picks a free port.
    pub async fn bind_to(gateway: Gateway, addr: SocketAddr) -> GatewayResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::server(format!("failed to bind {addr}: {e}")))?;

        Ok(Self {
            gateway: Arc::new(gateway),
            listener,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> GatewayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes, then drain open connections.
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        info!("UITVibes gateway listening on {}", addr);

        let maintenance = self
            .gateway
            .limiter()
            .cloned()
            .map(|limiter| tokio::spawn(maintain(limiter)));

        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown signal received, draining connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let gateway = self.gateway.clone();
                    let service = service_fn(move |req| {
                        let gateway = gateway.clone();
                        async move { Ok::<_, Infallible>(gateway.handle_incoming(req, peer_addr).await) }
                    });

                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            debug!("Connection error: {}", e);
                        }
                    });
                }
            }
        }

        if let Some(task) = maintenance {
            task.abort();
        }

        if tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown()).await.is_err() {
            warn!("Timed out waiting for connections to close");
        }
        info!("Gateway stopped");
        Ok(())
    }
}

/// Periodically drops expired rate windows and drains metric buffers.
async fn maintain(limiter: Arc<FixedWindowLimiter>) {
    let mut interval = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let purged = limiter.purge_expired();
        if purged > 0 {
            debug!(purged, remaining = limiter.tracked_keys(), "Purged expired rate windows");
        }
        run_upkeep();
    }
}
