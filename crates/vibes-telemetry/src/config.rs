//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;
use crate::tracing::TracingConfig;

/// Configuration for all telemetry subsystems.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name used in logs and trace resources.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Tracing configuration.
    pub tracing: TracingConfig,

    /// Logging configuration.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "vibes-gateway".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            metrics: MetricsConfig::default(),
            tracing: TracingConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Builder for [`TelemetryConfig`].
///
/// Subsystem options can be set in any order; the service identity is
/// copied into the logging and tracing sections by [`build`](Self::build).
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Starts from [`TelemetryConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported in log lines and the trace resource.
    #[must_use]
    pub fn service_name(mut self, name: &str) -> Self {
        self.config.service_name = name.to_owned();
        self
    }

    /// Version reported in the trace resource.
    #[must_use]
    pub fn service_version(mut self, version: &str) -> Self {
        self.config.service_version = version.to_owned();
        self
    }

    /// `development`, `staging`, `production`...
    #[must_use]
    pub fn environment(mut self, env: &str) -> Self {
        self.config.environment = env.to_owned();
        self
    }

    /// Replaces the whole logging section.
    #[must_use]
    pub fn logging(mut self, logging: LogConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// `EnvFilter` directive, e.g. `info` or `vibes_gateway=debug`.
    #[must_use]
    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_owned();
        self
    }

    /// JSON lines when `true`, pretty output otherwise.
    #[must_use]
    pub fn json_logs(mut self, json: bool) -> Self {
        self.config.logging.json_format = json;
        self
    }

    /// Installs or skips the Prometheus recorder.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.metrics.enabled = enabled;
        self
    }

    /// Turns on OTLP span export.
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: &str) -> Self {
        self.config.tracing.enabled = true;
        self.config.tracing.otlp_endpoint = endpoint.to_owned();
        self
    }

    /// Finishes the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let mut config = self.config;
        config.tracing.service_name.clone_from(&config.service_name);
        config.tracing.service_version.clone_from(&config.service_version);
        config.tracing.environment.clone_from(&config.environment);
        config.logging.service_name.clone_from(&config.service_name);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "vibes-gateway");
        assert_eq!(config.environment, "development");
        assert!(!config.tracing.enabled);
    }

    #[test]
    fn test_builder_propagates_service_name() {
        let config = TelemetryConfig::builder()
            .service_name("edge")
            .environment("production")
            .build();

        assert_eq!(config.tracing.service_name, "edge");
        assert_eq!(config.tracing.environment, "production");
        assert_eq!(config.logging.service_name, "edge");
    }

    #[test]
    fn test_builder_logging_options() {
        let config = TelemetryConfig::builder()
            .log_level("debug")
            .json_logs(false)
            .build();

        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
    }

    #[test]
    fn test_builder_otlp_endpoint() {
        let config = TelemetryConfig::builder()
            .otlp_endpoint("http://jaeger:4317")
            .build();

        assert!(config.tracing.enabled);
        assert_eq!(config.tracing.otlp_endpoint, "http://jaeger:4317");
    }

    #[test]
    fn test_builder_metrics_toggle() {
        let config = TelemetryConfig::builder().metrics_enabled(false).build();
        assert!(!config.metrics.enabled);
    }
}
