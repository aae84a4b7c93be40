//! # Vibes Middleware
//!
//! The request-handling pipeline that runs in front of every proxied call.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → RateLimit → Identity → Access → Handler (forward / self endpoint)
//!              │                      │
//!              └─ 429                 └─ 401
//! ```
//!
//! | Stage | Middleware | Purpose |
//! |-------|------------|---------|
//! | 1 | Rate limit | Fixed-window admission per partition key |
//! | 2 | Identity   | Best-effort bearer token verification |
//! | 3 | Access     | Rejects protected paths without an identity |
//!
//! A rejected request short-circuits: later stages and the handler never
//! run, so nothing is resolved or forwarded.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vibes_middleware::{Pipeline, MiddlewareContext};
//! use vibes_middleware::stages::{AccessMiddleware, IdentityMiddleware, RateLimitMiddleware};
//!
//! let pipeline = Pipeline::builder()
//!     .stage(RateLimitMiddleware::new(limiter))
//!     .stage(IdentityMiddleware::new(verifier))
//!     .stage(AccessMiddleware::new(classifier))
//!     .build();
//!
//! let mut ctx = MiddlewareContext::new();
//! let response = pipeline.process(&mut ctx, request, handler).await;
//! ```

#![doc(html_root_url = "https://docs.rs/vibes-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod limiter;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::{MiddlewareContext, Rejection};
pub use limiter::{Admission, FixedWindowLimiter};
pub use middleware::{BoxFuture, Middleware, Next};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use types::{Request, Response, ResponseExt};
