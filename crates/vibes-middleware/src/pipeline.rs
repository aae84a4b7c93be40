//! Ordered middleware pipeline.
//!
//! The gateway assembles its stages once at startup. The order given to the
//! builder is the order requests see them in.

use std::sync::Arc;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// A type-erased stage.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An immutable, ordered set of stages.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder()
///     .stage(RateLimitMiddleware::new(limiter))
///     .stage(IdentityMiddleware::new(verifier))
///     .build();
///
/// let mut ctx = MiddlewareContext::new();
/// let response = pipeline.process(&mut ctx, request, handler).await;
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Runs a request through every stage, then the handler.
    ///
    /// The context is borrowed so the caller can inspect identity and
    /// rejection state once the response is produced.
    pub async fn process<H>(&self, ctx: &mut MiddlewareContext, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'static,
    {
        let next = self.build_chain(handler);
        next.run(ctx, request).await
    }

    fn build_chain<'a, H>(&'a self, handler: H) -> Next<'a>
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response> + Send + 'a,
    {
        let mut next = Next::handler(handler);
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), next);
        }
        next
    }

    /// Names of all stages, in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|m| m.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// Builder for a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage<M: Middleware>(mut self, middleware: M) -> Self {
        self.stages.push(Arc::new(middleware));
        self
    }

    /// Builds the pipeline.
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Rejection;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.order.lock().unwrap().push(self.name);
                next.run(ctx, request).await
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn name(&self) -> &'static str {
            "deny"
        }

        fn process<'a>(
            &'a self,
            ctx: &'a mut MiddlewareContext,
            _request: Request,
            _next: Next<'a>,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                ctx.reject(Rejection::Unauthorized);
                Response::text(StatusCode::UNAUTHORIZED, "no")
            })
        }
    }

    fn request() -> Request {
        http::Request::builder()
            .uri("/test")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_executes_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Counting {
                name: "first",
                order: order.clone(),
            })
            .stage(Counting {
                name: "second",
                order: order.clone(),
            })
            .build();

        let mut ctx = MiddlewareContext::new();
        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async { Response::text(StatusCode::OK, "OK") })
            })
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .stage(Deny)
            .stage(Counting {
                name: "after",
                order: order.clone(),
            })
            .build();

        let mut ctx = MiddlewareContext::new();
        let handler_calls = calls.clone();
        let response = pipeline
            .process(&mut ctx, request(), move |_ctx, _req| {
                handler_calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Response::text(StatusCode::OK, "OK") })
            })
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(order.lock().unwrap().is_empty());
        assert_eq!(ctx.rejection(), Some(Rejection::Unauthorized));
    }

    #[tokio::test]
    async fn test_empty_pipeline() {
        let pipeline = Pipeline::builder().build();
        assert_eq!(pipeline.stage_count(), 0);

        let mut ctx = MiddlewareContext::new();
        let response = pipeline
            .process(&mut ctx, request(), |_ctx, _req| {
                Box::pin(async { Response::text(StatusCode::OK, "handler") })
            })
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
