//! UITVibes API gateway.
//!
//! The gateway is the single public entry point in front of the UITVibes
//! services. Every request passes through the same chain:
//!
//! ```text
//!  client ──► rate limit ──► identity ──► access ──► self endpoint?
//!                 │              │           │            │ no
//!                429        (never rejects)  401          ▼
//!                                                    route table
//!                                                         │
//!                                                  service locator
//!                                                         │
//!                                                   upstream service
//! ```
//!
//! - **Rate limit**: fixed-window admission per client partition
//! - **Identity**: bearer token verification; failures only leave the
//!   request anonymous
//! - **Access**: anonymous requests to protected paths get a 401
//! - **Forwarding**: the upstream answer is relayed verbatim, with
//!   `X-User-Id`, `X-User-Email`, `X-Correlation-ID` and `X-Gateway` set by
//!   the gateway
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a configuration file
//! $ vibes-gateway --config /etc/vibes/gateway.toml
//!
//! # Run with environment variable overrides
//! $ VIBES_GATEWAY_JWT_KEY=... \
//!   VIBES_GATEWAY_SERVICES_POSTSERVICE_HTTP=http://posts:8080 \
//!   vibes-gateway
//! ```

#![doc(html_root_url = "https://docs.rs/vibes-gateway/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod endpoints;
pub mod error;
pub mod headers;
pub mod health;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod server;

pub use config::{GatewayConfig, GatewayConfigBuilder};
pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use health::HealthChecker;
pub use proxy::{ProxyClient, ProxyRequest};
pub use registry::{ServiceLocator, ServiceRegistry};
pub use routes::RouteTable;
pub use server::{Gateway, GatewayBuilder, GatewayServer};

/// Gateway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
