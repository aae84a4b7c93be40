//! Observability for the UITVibes API gateway.
//!
//! - **Logging**: structured `tracing` output, JSON in production
//! - **Metrics**: Prometheus text rendered on demand at `/gateway/metrics`
//! - **Tracing**: optional OTLP export with W3C trace-context propagation to
//!   upstream services
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `vibes_gateway_requests_total` | Counter | `route`, `status` | Completed requests |
//! | `vibes_gateway_request_duration_seconds` | Histogram | `route` | Request latency |
//! | `vibes_gateway_in_flight_requests` | Gauge | - | Requests being processed |
//! | `vibes_gateway_rate_limited_total` | Counter | - | Admission rejections |
//! | `vibes_gateway_auth_failures_total` | Counter | `reason` | Rejected bearer tokens |
//! | `vibes_gateway_upstream_errors_total` | Counter | `service`, `kind` | Failed upstream calls |
//!
//! # Example
//!
//! ```rust,ignore
//! use vibes_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::builder()
//!     .service_name("vibes-gateway")
//!     .log_level("info")
//!     .otlp_endpoint("http://otel-collector:4317")
//!     .build();
//!
//! let _guard = init_telemetry(config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use config::{TelemetryConfig, TelemetryConfigBuilder};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, render_metrics, InFlightGuard, MetricsConfig};
pub use tracing::{init_tracing, TracingConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Flushes and shuts down the trace exporter on drop.
///
/// Keep it alive for the lifetime of the process.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { tracer_provider }
    }

    /// Returns `true` when spans are being exported.
    pub fn is_exporting_traces(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    eprintln!("Error flushing tracer provider: {e}");
                }
            }
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {e}");
            }
        }
    }
}

/// Initializes logging, metrics and tracing.
///
/// Logging comes first so failures in the other subsystems are visible.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;

    ::tracing::debug!(
        service = %config.service_name,
        environment = %config.environment,
        metrics = config.metrics.enabled,
        traces = tracer_provider.is_some(),
        "Telemetry initialized"
    );

    Ok(TelemetryGuard::new(tracer_provider))
}
