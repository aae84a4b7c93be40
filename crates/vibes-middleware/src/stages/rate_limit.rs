//! Rate limiting middleware.
//!
//! Runs before anything else. A rejected request gets `429 Too Many
//! Requests` with a plain-text body and never reaches authentication,
//! routing or the upstream. Admitted requests pass through untouched.

use std::sync::Arc;

use http::{header, HeaderMap, HeaderValue, StatusCode, Uri};

use crate::context::{MiddlewareContext, Rejection};
use crate::limiter::{Admission, FixedWindowLimiter};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// Body returned on rejection.
pub const RATE_LIMITED_MESSAGE: &str = "Too many requests. Please try again later.";

/// How the partition key is derived from a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyExtractor {
    /// The peer IP address of the connection.
    #[default]
    ClientIp,
    /// The `Host` header.
    Host,
    /// One shared budget for all callers.
    Global,
}

impl KeyExtractor {
    fn extract(self, headers: &HeaderMap, uri: &Uri, ctx: &MiddlewareContext) -> String {
        match self {
            Self::ClientIp => ctx
                .client_addr()
                .map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string()),
            Self::Host => headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_ascii_lowercase)
                .or_else(|| uri.host().map(str::to_ascii_lowercase))
                .unwrap_or_default(),
            Self::Global => "global".to_string(),
        }
    }
}

/// Rejects requests that exceed the partition's budget.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<FixedWindowLimiter>,
    key_extractor: KeyExtractor,
}

impl RateLimitMiddleware {
    /// Creates the stage with per-client-IP partitioning.
    pub fn new(limiter: Arc<FixedWindowLimiter>) -> Self {
        Self {
            limiter,
            key_extractor: KeyExtractor::default(),
        }
    }

    /// Sets how requests are partitioned.
    #[must_use]
    pub fn key_extractor(mut self, key_extractor: KeyExtractor) -> Self {
        self.key_extractor = key_extractor;
        self
    }

    /// Spends one permit for the request described by its head.
    ///
    /// Returns the 429 response when the partition's budget is exhausted.
    /// Only the head is needed, so a server can decide before reading the
    /// body.
    pub fn check_admission(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        ctx: &mut MiddlewareContext,
    ) -> Option<Response> {
        let key = self.key_extractor.extract(headers, uri, ctx);
        match self.limiter.check(&key) {
            Admission::Admitted { .. } => None,
            Admission::Rejected { retry_after } => {
                tracing::warn!(
                    correlation_id = %ctx.correlation_id(),
                    partition = %key,
                    "Rate limit exceeded"
                );
                ctx.reject(Rejection::RateLimited);
                Some(Self::rejected(retry_after))
            }
        }
    }

    /// The limiter backing this stage.
    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.limiter
    }

    fn rejected(retry_after: std::time::Duration) -> Response {
        let mut response = Response::text(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
        let secs = retry_after.as_secs().max(1);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        response
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.check_admission(request.headers(), request.uri(), ctx) {
                Some(rejected) => rejected,
                None => next.run(ctx, request).await,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vibes_core::ManualClock;

    fn request(host: &str) -> Request {
        http::Request::builder()
            .uri("/post/feed")
            .header(header::HOST, host)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ctx_from(ip: &str) -> MiddlewareContext {
        let addr: SocketAddr = format!("{ip}:40000").parse().unwrap();
        MiddlewareContext::new().with_client_addr(Some(addr))
    }

    fn counting_handler<'a>(calls: Arc<AtomicUsize>) -> Next<'a> {
        Next::handler(move |_ctx, _req| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::text(StatusCode::OK, "OK") })
        })
    }

    #[test]
    fn test_key_extraction() {
        let req = request("Gateway.Example:8080");
        let ctx = ctx_from("10.0.0.7");

        let (headers, uri) = (req.headers(), req.uri());

        assert_eq!(KeyExtractor::ClientIp.extract(headers, uri, &ctx), "10.0.0.7");
        assert_eq!(KeyExtractor::Host.extract(headers, uri, &ctx), "gateway.example:8080");
        assert_eq!(KeyExtractor::Global.extract(headers, uri, &ctx), "global");
        assert_eq!(
            KeyExtractor::ClientIp.extract(headers, uri, &MiddlewareContext::new()),
            "unknown"
        );
    }

    #[test]
    fn test_check_admission_needs_only_the_head() {
        let limiter = Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)));
        let middleware = RateLimitMiddleware::new(limiter);
        let uri: Uri = "/auth/register".parse().unwrap();
        let headers = HeaderMap::new();

        let mut ctx = ctx_from("10.0.0.3");
        assert!(middleware.check_admission(&headers, &uri, &mut ctx).is_none());
        assert_eq!(ctx.rejection(), None);

        let mut ctx = ctx_from("10.0.0.3");
        let rejected = middleware.check_admission(&headers, &uri, &mut ctx).unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ctx.rejection(), Some(Rejection::RateLimited));
        assert_eq!(middleware.limiter().tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_rejects_over_budget_without_calling_next() {
        let clock = ManualClock::default();
        let limiter =
            Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)).with_clock(Arc::new(clock)));
        let middleware = RateLimitMiddleware::new(limiter);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut ctx = ctx_from("10.0.0.1");
        let first = middleware
            .process(&mut ctx, request("gw"), counting_handler(calls.clone()))
            .await;
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().get(header::RETRY_AFTER).is_none());

        let mut ctx = ctx_from("10.0.0.1");
        let second = middleware
            .process(&mut ctx, request("gw"), counting_handler(calls.clone()))
            .await;

        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.rejection(), Some(Rejection::RateLimited));
        assert_eq!(second.headers().get(header::RETRY_AFTER).unwrap(), "60");
        let body = second.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, RATE_LIMITED_MESSAGE);
    }

    #[tokio::test]
    async fn test_clients_have_separate_budgets() {
        let limiter = Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)));
        let middleware = RateLimitMiddleware::new(limiter);
        let calls = Arc::new(AtomicUsize::new(0));

        for ip in ["10.0.0.1", "10.0.0.2"] {
            let mut ctx = ctx_from(ip);
            let response = middleware
                .process(&mut ctx, request("gw"), counting_handler(calls.clone()))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_host_partition_shares_budget_across_clients() {
        let limiter = Arc::new(FixedWindowLimiter::new(1, Duration::from_secs(60)));
        let middleware = RateLimitMiddleware::new(limiter).key_extractor(KeyExtractor::Host);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut ctx = ctx_from("10.0.0.1");
        middleware
            .process(&mut ctx, request("gw"), counting_handler(calls.clone()))
            .await;
        let mut ctx = ctx_from("10.0.0.2");
        let response = middleware
            .process(&mut ctx, request("GW"), counting_handler(calls.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
