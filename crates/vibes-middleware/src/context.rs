//! Per-request pipeline state.
//!
//! [`MiddlewareContext`] is created by the server for each request, enriched
//! by the stages, and read back by the handler and by the server after the
//! pipeline returns (for logs and metrics).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use vibes_core::{CorrelationId, IdentityClaims, VerificationError};

/// Why the pipeline answered without reaching the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The rate limiter refused admission.
    RateLimited,
    /// The path is protected and no identity was established.
    Unauthorized,
}

impl Rejection {
    /// Short label for logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
        }
    }
}

/// Context that flows through the pipeline.
///
/// # Example
///
/// ```
/// use vibes_core::IdentityClaims;
/// use vibes_middleware::MiddlewareContext;
///
/// let mut ctx = MiddlewareContext::new();
/// assert!(!ctx.is_authenticated());
///
/// ctx.set_identity(IdentityClaims::new("user-123"));
/// assert_eq!(ctx.identity().unwrap().subject, "user-123");
/// ```
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    correlation_id: CorrelationId,
    client_addr: Option<SocketAddr>,
    identity: Option<IdentityClaims>,
    auth_failure: Option<VerificationError>,
    rejection: Option<Rejection>,
    started_at: Instant,
}

impl MiddlewareContext {
    /// Creates a context with a fresh correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self::with_correlation_id(CorrelationId::new())
    }

    /// Creates a context with a specific correlation ID.
    #[must_use]
    pub fn with_correlation_id(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            client_addr: None,
            identity: None,
            auth_failure: None,
            rejection: None,
            started_at: Instant::now(),
        }
    }

    /// Records the peer address of the connection.
    #[must_use]
    pub fn with_client_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.client_addr = addr;
        self
    }

    /// Returns the correlation ID forwarded as `X-Correlation-ID`.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the peer address, if known.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// Returns the verified identity, if any.
    pub fn identity(&self) -> Option<&IdentityClaims> {
        self.identity.as_ref()
    }

    /// Returns `true` when a bearer token was verified.
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Sets the verified identity.
    ///
    /// Only the identity stage calls this.
    pub fn set_identity(&mut self, identity: IdentityClaims) {
        self.identity = Some(identity);
    }

    /// Returns why a presented token was refused, if one was.
    pub fn auth_failure(&self) -> Option<VerificationError> {
        self.auth_failure
    }

    /// Records a token verification failure.
    pub fn set_auth_failure(&mut self, error: VerificationError) {
        self.auth_failure = Some(error);
    }

    /// Returns the short-circuit reason, if the pipeline rejected the request.
    pub fn rejection(&self) -> Option<Rejection> {
        self.rejection
    }

    /// Marks the request as rejected.
    pub fn reject(&mut self, rejection: Rejection) {
        self.rejection = Some(rejection);
    }

    /// Returns when the request started processing.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for MiddlewareContext {
    fn default() -> Self {
        Self::new()
    }
}
