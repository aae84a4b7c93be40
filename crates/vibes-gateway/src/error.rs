//! Error types for the gateway.

use std::fmt;

use thiserror::Error;

/// Gateway-originated failures.
///
/// Token problems are not represented here: they never fail a request on
/// their own and are reported by the access stage as a 401.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// A logical service name has no base URL.
    #[error("Unknown service: {name}")]
    UnknownService {
        /// The logical name that failed to resolve.
        name: String,
    },

    /// No route prefix matches the request path.
    #[error("No route for path: {path}")]
    RouteNotFound {
        /// The request path.
        path: String,
    },

    /// The upstream did not answer within the configured timeout.
    #[error("Upstream {service} timed out")]
    UpstreamTimeout {
        /// Logical service name.
        service: String,
    },

    /// The upstream could not be reached.
    #[error("Upstream {service} is unavailable: {message}")]
    UpstreamUnavailable {
        /// Logical service name.
        service: String,
        /// Error message.
        message: String,
    },

    /// The upstream exchange failed after connecting.
    #[error("Upstream error: {message}")]
    Upstream {
        /// Error message.
        message: String,
    },

    /// The inbound request body exceeds the configured limit.
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Server startup error.
    #[error("Server error: {message}")]
    Server {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unknown service error.
    pub fn unknown_service(name: impl Into<String>) -> Self {
        Self::UnknownService { name: name.into() }
    }

    /// Create a route not found error.
    pub fn route_not_found(path: impl Into<String>) -> Self {
        Self::RouteNotFound { path: path.into() }
    }

    /// Create an upstream timeout error.
    pub fn upstream_timeout(service: impl Into<String>) -> Self {
        Self::UpstreamTimeout {
            service: service.into(),
        }
    }

    /// Create an upstream unavailable error.
    pub fn upstream_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    #[allow(clippy::match_same_arms)]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config { .. } => 500,
            Self::UnknownService { .. } => 502,
            Self::RouteNotFound { .. } => 404,
            Self::UpstreamTimeout { .. } => 504,
            Self::UpstreamUnavailable { .. } => 502,
            Self::Upstream { .. } => 502,
            Self::PayloadTooLarge { .. } => 413,
            Self::Server { .. } => 500,
            Self::Io(_) => 500,
            Self::Http(_) => 400,
            Self::Json(_) => 500,
        }
    }

    /// Check if this error is transient.
    ///
    /// The gateway never retries; this only feeds logs and metrics.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. } | Self::UpstreamUnavailable { .. } | Self::Upstream { .. }
        )
    }

    /// Get the error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::UnknownService { .. } => "unknown_service",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::UpstreamTimeout { .. } => "timeout",
            Self::UpstreamUnavailable { .. } => "unavailable",
            Self::Upstream { .. } => "upstream",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Server { .. } => "server",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Json(_) => "json",
        }
    }

    /// Short title used as the `error` field of the response envelope.
    pub fn title(&self) -> &'static str {
        match self.status_code() {
            404 => "Not Found",
            413 => "Payload Too Large",
            502 => "Bad Gateway",
            504 => "Gateway Timeout",
            400 => "Bad Request",
            _ => "Internal Server Error",
        }
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON envelope for gateway-originated errors.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Short error title.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Correlation ID of the failed request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            correlation_id: None,
        }
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl ToString) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        Self::new(err.title(), err.to_string())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error, self.message)
    }
}
