//! Identity extraction middleware.
//!
//! Verifies an `Authorization: Bearer <token>` header when one is present.
//! This stage never rejects: a missing token leaves the request anonymous,
//! and an invalid one is logged at warn and also leaves it anonymous. The
//! access stage decides whether anonymity is acceptable for the path.

use std::sync::Arc;

use http::header::AUTHORIZATION;
use vibes_core::CredentialVerifier;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

const BEARER: &str = "bearer ";

/// Populates [`MiddlewareContext::identity`] from a bearer token.
#[derive(Debug, Clone)]
pub struct IdentityMiddleware {
    verifier: Arc<CredentialVerifier>,
}

impl IdentityMiddleware {
    /// Creates the stage around a shared verifier.
    pub fn new(verifier: Arc<CredentialVerifier>) -> Self {
        Self { verifier }
    }
}

/// Returns the token of an `Authorization: Bearer` header.
///
/// The scheme is matched case-insensitively. Other schemes and empty
/// tokens yield `None`.
pub fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let scheme = value.get(..BEARER.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER) {
        return None;
    }
    let token = value[BEARER.len()..].trim();
    (!token.is_empty()).then_some(token)
}

impl Middleware for IdentityMiddleware {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(token) = bearer_token(&request) {
                match self.verifier.verify(token) {
                    Ok(identity) => {
                        tracing::debug!(
                            correlation_id = %ctx.correlation_id(),
                            user = %identity.log_id(),
                            "Bearer token verified"
                        );
                        ctx.set_identity(identity);
                    }
                    Err(error) => {
                        tracing::warn!(
                            correlation_id = %ctx.correlation_id(),
                            reason = error.reason(),
                            "Bearer token rejected: {error}"
                        );
                        ctx.set_auth_failure(error);
                    }
                }
            }

            next.run(ctx, request).await
        })
    }
}
