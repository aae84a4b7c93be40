//! Prometheus metrics.
//!
//! The recorder is installed without its own HTTP listener. The gateway
//! renders the text exposition itself at `GET /gateway/metrics`, so the
//! metrics share the gateway's port and rate limit.
//!
//! Recording functions are safe to call before [`init_metrics`] or when
//! metrics are disabled; the `metrics` facade drops the samples.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Completed requests by route and status.
pub const REQUESTS_TOTAL: &str = "vibes_gateway_requests_total";
/// Request latency by route.
pub const REQUEST_DURATION_SECONDS: &str = "vibes_gateway_request_duration_seconds";
/// Requests currently being processed.
pub const IN_FLIGHT_REQUESTS: &str = "vibes_gateway_in_flight_requests";
/// Admission rejections.
pub const RATE_LIMITED_TOTAL: &str = "vibes_gateway_rate_limited_total";
/// Rejected bearer tokens by reason.
pub const AUTH_FAILURES_TOTAL: &str = "vibes_gateway_auth_failures_total";
/// Failed upstream calls by service and failure kind.
pub const UPSTREAM_ERRORS_TOTAL: &str = "vibes_gateway_upstream_errors_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ],
        }
    }
}

/// Installs the global Prometheus recorder.
///
/// Calling it again after a successful install is a no-op.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();

    Ok(())
}

/// Renders all metrics in Prometheus text format.
///
/// Returns `None` when no recorder was installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Drains histogram buffers. Call periodically.
pub fn run_upkeep() {
    if let Some(handle) = METRICS_HANDLE.get() {
        handle.run_upkeep();
    }
}

fn register_metric_descriptions() {
    describe_counter!(REQUESTS_TOTAL, "Total number of requests handled by the gateway");
    describe_histogram!(REQUEST_DURATION_SECONDS, "Request duration in seconds");
    describe_gauge!(IN_FLIGHT_REQUESTS, "Number of requests currently being processed");
    describe_counter!(RATE_LIMITED_TOTAL, "Requests rejected by the rate limiter");
    describe_counter!(AUTH_FAILURES_TOTAL, "Bearer tokens that failed verification");
    describe_counter!(UPSTREAM_ERRORS_TOTAL, "Upstream calls that failed or timed out");
}

/// Records a completed request.
///
/// `route` is the matched gateway prefix or self endpoint, never the raw
/// path, to keep label cardinality bounded.
pub fn record_request(route: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "route" => route.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "route" => route.to_string())
        .record(duration.as_secs_f64());
}

/// Records a rate limiter rejection.
pub fn record_rate_limited() {
    counter!(RATE_LIMITED_TOTAL).increment(1);
}

/// Records a bearer token verification failure.
pub fn record_auth_failure(reason: &'static str) {
    counter!(AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Records a failed upstream call.
pub fn record_upstream_error(service: &str, kind: &'static str) {
    counter!(
        UPSTREAM_ERRORS_TOTAL,
        "service" => service.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Tracks one in-flight request for as long as it is alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
