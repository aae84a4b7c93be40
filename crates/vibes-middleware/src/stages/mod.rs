//! Gateway pipeline stages, in the order the gateway installs them.
//!
//! 1. [`rate_limit`] - admission control
//! 2. [`identity`] - bearer token verification
//! 3. [`access`] - public/protected enforcement

pub mod access;
pub mod identity;
pub mod rate_limit;

pub use access::AccessMiddleware;
pub use identity::IdentityMiddleware;
pub use rate_limit::{KeyExtractor, RateLimitMiddleware};
