//! Access enforcement middleware.
//!
//! Consults the [`PathClassifier`] and answers `401 Unauthorized` when the
//! path is protected and the identity stage did not establish a caller. The
//! body never says why a presented token failed.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;
use vibes_core::PathClassifier;

use crate::context::{MiddlewareContext, Rejection};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// Builds the 401 body for a protected path.
///
/// `path` is reported lowercased.
pub fn unauthorized_response(path: &str) -> Response {
    Response::json(
        StatusCode::UNAUTHORIZED,
        &json!({
            "error": "Unauthorized",
            "message": "JWT token is required to access this endpoint",
            "path": path.to_ascii_lowercase(),
            "hint": "Login at /auth/login to get a token",
        }),
    )
}

/// Rejects anonymous requests to protected paths.
#[derive(Debug, Clone)]
pub struct AccessMiddleware {
    classifier: Arc<PathClassifier>,
}

impl AccessMiddleware {
    /// Creates the stage around a shared classifier.
    pub fn new(classifier: Arc<PathClassifier>) -> Self {
        Self { classifier }
    }
}

impl Middleware for AccessMiddleware {
    fn name(&self) -> &'static str {
        "access"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let path = request.uri().path();
            if ctx.is_authenticated() || !self.classifier.requires_auth(request.method(), path) {
                return next.run(ctx, request).await;
            }

            tracing::info!(
                correlation_id = %ctx.correlation_id(),
                method = %request.method(),
                path = %path,
                "Rejected unauthenticated request to protected path"
            );
            ctx.reject(Rejection::Unauthorized);
            unauthorized_response(path)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Method;
    use http_body_util::{BodyExt, Full};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vibes_core::IdentityClaims;

    fn request(method: Method, path: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn counting<'a>(calls: Arc<AtomicUsize>) -> Next<'a> {
        Next::handler(move |_ctx, _req| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::text(StatusCode::OK, "OK") })
        })
    }

    fn middleware() -> AccessMiddleware {
        AccessMiddleware::new(Arc::new(PathClassifier::default()))
    }

    #[tokio::test]
    async fn test_public_path_passes_anonymously() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MiddlewareContext::new();
        let response = middleware()
            .process(&mut ctx, request(Method::POST, "/auth/login"), counting(calls.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_protected_path_rejects_anonymous() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MiddlewareContext::new();
        let response = middleware()
            .process(&mut ctx, request(Method::GET, "/Post/Feed"), counting(calls.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.rejection(), Some(Rejection::Unauthorized));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Unauthorized");
        assert_eq!(json["message"], "JWT token is required to access this endpoint");
        assert_eq!(json["path"], "/post/feed");
        assert_eq!(json["hint"], "Login at /auth/login to get a token");
    }

    #[tokio::test]
    async fn test_percent_encoded_protected_path_rejects_anonymous() {
        let calls = Arc::new(AtomicUsize::new(0));
        for path in ["/post/%66eed", "/user/userprofile/%6De"] {
            let mut ctx = MiddlewareContext::new();
            let response = middleware()
                .process(&mut ctx, request(Method::GET, path), counting(calls.clone()))
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protected_path_admits_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(IdentityClaims::new("u1"));
        let response = middleware()
            .process(&mut ctx, request(Method::PUT, "/user/userprofile/me"), counting(calls.clone()))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
