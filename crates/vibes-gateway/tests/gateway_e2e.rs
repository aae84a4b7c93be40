//! End-to-end gateway tests against a local upstream.
//!
//! A small hyper server stands in for every downstream service and records
//! what it receives. The gateway runs with a manual clock and a locator that
//! counts resolutions.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use vibes_core::{Clock, ManualClock};
use vibes_gateway::{Gateway, GatewayConfig, GatewayError, GatewayResult, GatewayServer, ServiceLocator};
use vibes_middleware::{Request, Response};

const SECRET: &str = "gateway-e2e-signing-key-0123456789abcdef";
const ISSUER: &str = "UITVibes.AuthService";
const AUDIENCE: &str = "UITVibes.Clients";

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Upstream that echoes requests and misbehaves on demand.
///
/// - paths ending in `/slow` answer after two seconds
/// - paths ending in `/teapot` answer 418 with a custom header
struct Upstream {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

impl Upstream {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let log = log.clone();
                let service = service_fn(move |req: http::Request<Incoming>| {
                    let log = log.clone();
                    async move { Ok::<_, Infallible>(answer(req, &log).await) }
                });
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, seen }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn seen(&self) -> Vec<Recorded> {
        self.seen.lock().clone()
    }
}

async fn answer(req: http::Request<Incoming>, log: &Mutex<Vec<Recorded>>) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
    let path = parts.uri.path().to_string();
    log.lock().push(Recorded {
        method: parts.method,
        uri: parts.uri.to_string(),
        headers: parts.headers,
        body,
    });

    if path.ends_with("/slow") {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    if path.ends_with("/teapot") {
        return http::Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .header("x-upstream", "teapot")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from_static(b"short and stout")))
            .unwrap();
    }

    http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(json!({ "path": path }).to_string())))
        .unwrap()
}

/// Resolves every service to one URL and counts lookups.
#[derive(Debug)]
struct SpyLocator {
    url: String,
    calls: AtomicUsize,
}

impl SpyLocator {
    fn new(url: String) -> Arc<Self> {
        Arc::new(Self {
            url,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ServiceLocator for SpyLocator {
    fn resolve(&self, name: &str) -> GatewayResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if name.is_empty() {
            return Err(GatewayError::unknown_service(name));
        }
        Ok(self.url.clone())
    }
}

struct Harness {
    gateway: Gateway,
    clock: ManualClock,
    locator: Arc<SpyLocator>,
}

impl Harness {
    fn new(upstream_url: String, permits: u64) -> Self {
        let config = GatewayConfig::builder()
            .jwt(SECRET, ISSUER, AUDIENCE)
            .rate_limit(permits, Duration::from_secs(60))
            .upstream_timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let clock = ManualClock::default();
        let locator = SpyLocator::new(upstream_url);
        let gateway = Gateway::builder(config)
            .locator(locator.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        Self {
            gateway,
            clock,
            locator,
        }
    }

    fn token(&self, sub: &str) -> String {
        let claims = json!({
            "sub": sub,
            "email": format!("{sub}@uitvibes.dev"),
            "name": sub,
            "iss": ISSUER,
            "aud": AUDIENCE,
            "exp": self.clock.unix_seconds() + 3600,
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    async fn send(&self, request: Request) -> Response {
        let peer: SocketAddr = "192.0.2.44:40000".parse().unwrap();
        self.gateway.handle(request, Some(peer)).await
    }
}

fn request(method: Method, uri: &str, token: Option<&str>) -> Request {
    let mut builder = http::Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

async fn json_body(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn test_startup_resolves_every_routed_service() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    // authservice, userservice, postservice
    assert_eq!(harness.locator.calls(), 3);
}

#[tokio::test]
async fn test_protected_path_without_token_is_rejected_before_routing() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let before = harness.locator.calls();

    let response = harness.send(request(Method::GET, "/user/profile", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = json_body(response).await;
    assert_eq!(json["error"], "Unauthorized");
    assert_eq!(json["path"], "/user/profile");
    assert_eq!(harness.locator.calls(), before);
    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn test_invalid_token_on_protected_path_is_rejected() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    let response = harness
        .send(request(Method::POST, "/post", Some("not.a.token")))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn test_authenticated_request_is_forwarded_once() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-1");
    let before = harness.locator.calls();

    let response = harness
        .send(request(Method::GET, "/user/profile?tab=posts", Some(&token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(harness.locator.calls(), before + 1);

    let seen = upstream.seen();
    assert_eq!(seen.len(), 1);
    let forwarded = &seen[0];
    assert_eq!(forwarded.method, Method::GET);
    assert_eq!(forwarded.uri, "/api/profile?tab=posts");
    assert_eq!(forwarded.headers["x-user-id"], "user-1");
    assert_eq!(forwarded.headers["x-user-email"], "user-1@uitvibes.dev");
    assert_eq!(forwarded.headers["x-gateway"], "UITVibes-API-Gateway");
    assert_eq!(forwarded.headers[header::AUTHORIZATION], format!("Bearer {token}").as_str());
    assert!(forwarded.headers.get("x-correlation-id").is_some());
}

#[tokio::test]
async fn test_request_body_reaches_upstream() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(b"{\"email\":\"a@b.c\"}")))
        .unwrap();
    let response = harness.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = upstream.seen();
    assert_eq!(seen[0].uri, "/api/auth/login");
    assert_eq!(seen[0].body, "{\"email\":\"a@b.c\"}");
}

#[tokio::test]
async fn test_forged_identity_headers_are_stripped() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    let request = http::Request::builder()
        .uri("/auth/refresh")
        .header("x-user-id", "admin")
        .header("x-user-email", "admin@uitvibes.dev")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = harness.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let seen = upstream.seen();
    assert!(seen[0].headers.get("x-user-id").is_none());
    assert!(seen[0].headers.get("x-user-email").is_none());
}

#[tokio::test]
async fn test_public_read_passes_without_token() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    let response = harness.send(request(Method::GET, "/post/hashtag/trending", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.seen()[0].uri, "/api/post/hashtag/trending");
}

#[tokio::test]
async fn test_rate_limit_rejects_then_readmits_next_window() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 3);

    for _ in 0..3 {
        let response = harness.send(request(Method::GET, "/health", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = harness.send(request(Method::GET, "/auth/login", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(upstream.seen().is_empty());

    harness.clock.advance(Duration::from_secs(60));
    let response = harness.send(request(Method::GET, "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_runs_before_authentication() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 1);

    let first = harness.send(request(Method::GET, "/user/profile", None)).await;
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

    let second = harness.send(request(Method::GET, "/user/profile", None)).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_upstream_error_status_is_relayed_verbatim() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-2");

    let response = harness.send(request(Method::GET, "/post/teapot", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers()["x-upstream"], "teapot");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "short and stout");
}

#[tokio::test]
async fn test_slow_upstream_is_gateway_timeout() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-3");

    let response = harness.send(request(Method::GET, "/post/slow", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let json = json_body(response).await;
    assert_eq!(json["error"], "Gateway Timeout");
    assert!(json["correlationId"].is_string());
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let harness = Harness::new(dead_url(), 100);
    let token = harness.token("user-4");

    let response = harness.send(request(Method::GET, "/post/1", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_gateway_me_reports_identity() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-5");

    let response = harness.send(request(Method::GET, "/gateway/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["userId"], "user-5");
    assert_eq!(json["email"], "user-5@uitvibes.dev");

    let anonymous = harness.send(request(Method::GET, "/gateway/me", None)).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert!(upstream.seen().is_empty());
}

#[tokio::test]
async fn test_expired_token_is_anonymous() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-6");

    harness.clock.advance(Duration::from_secs(3601));
    let response = harness.send(request(Method::GET, "/gateway/me", Some(&token))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_server_over_tcp() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);
    let token = harness.token("user-7");

    let server = GatewayServer::bind_to(harness.gateway, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async {
        let _ = stopped.await;
    }));

    let client = reqwest::Client::new();
    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let forwarded = client
        .delete(format!("http://{addr}/post/9"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(forwarded.status(), reqwest::StatusCode::OK);

    let seen = upstream.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::DELETE);
    assert_eq!(seen[0].uri, "/api/post/9");
    assert_eq!(seen[0].headers["x-user-id"], "user-7");

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_body_is_rejected_over_tcp() {
    let upstream = Upstream::start().await;
    let config = GatewayConfig::builder()
        .jwt(SECRET, ISSUER, AUDIENCE)
        .max_request_body_size(16)
        .build()
        .unwrap();
    let gateway = Gateway::builder(config)
        .locator(SpyLocator::new(upstream.url()))
        .build()
        .unwrap();

    let server = GatewayServer::bind_to(gateway, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async {
        let _ = stopped.await;
    }));

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/auth/register"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYLOAD_TOO_LARGE);
    assert!(upstream.seen().is_empty());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_spent_budget_rejects_oversized_body_before_reading_it() {
    let upstream = Upstream::start().await;
    let config = GatewayConfig::builder()
        .jwt(SECRET, ISSUER, AUDIENCE)
        .rate_limit(1, Duration::from_secs(60))
        .max_request_body_size(16)
        .build()
        .unwrap();
    let gateway = Gateway::builder(config)
        .locator(SpyLocator::new(upstream.url()))
        .build()
        .unwrap();

    let server = GatewayServer::bind_to(gateway, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async {
        let _ = stopped.await;
    }));

    let client = reqwest::Client::new();
    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    let response = client
        .post(format!("http://{addr}/auth/register"))
        .body(vec![b'x'; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(reqwest::header::RETRY_AFTER));
    assert!(upstream.seen().is_empty());

    stop.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_percent_encoded_protected_path_requires_token() {
    let upstream = Upstream::start().await;
    let harness = Harness::new(upstream.url(), 100);

    for uri in ["/post/%66eed", "/user/userprofile/%6De"] {
        let response = harness.send(request(Method::GET, uri, None)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
    assert!(upstream.seen().is_empty());
}
