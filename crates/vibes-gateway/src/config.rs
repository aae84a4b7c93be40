//! Configuration for the gateway.
//!
//! Loaded once at startup from a TOML or JSON file, then amended by
//! `VIBES_GATEWAY_*` environment variables and validated eagerly. Nothing
//! is re-read while the gateway runs.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vibes_core::classifier::DEFAULT_PUBLIC_PREFIXES;
use vibes_core::Algorithm;
use vibes_middleware::stages::KeyExtractor;
use vibes_telemetry::TelemetryConfig;

use crate::error::{GatewayError, GatewayResult};
use crate::registry::{ServiceLocator, ServiceRegistry};

const ENV_PREFIX: &str = "VIBES_GATEWAY_";
const MIN_KEY_BYTES: usize = 32;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and proxy settings.
    pub server: ServerSettings,
    /// Bearer token validation.
    pub jwt: JwtSettings,
    /// Admission control.
    pub rate_limit: RateLimitSettings,
    /// Upstream base URLs.
    pub services: ServiceSettings,
    /// Gateway prefix to upstream mapping.
    pub routes: Vec<RouteEntry>,
    /// Public path configuration.
    pub access: AccessSettings,
    /// Logging, metrics and trace export.
    pub telemetry: TelemetrySettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            jwt: JwtSettings::default(),
            rate_limit: RateLimitSettings::default(),
            services: ServiceSettings::default(),
            routes: RouteEntry::defaults(),
            access: AccessSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a new configuration builder.
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Load configuration from a file.
    pub fn from_file(path: impl Into<PathBuf>) -> GatewayResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| GatewayError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| GatewayError::config(format!("invalid JSON: {e}"))),
            _ => Err(GatewayError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Variables are prefixed with `VIBES_GATEWAY_` and use uppercase
    /// `snake_case`. Service URLs use `VIBES_GATEWAY_SERVICES_<NAME>_HTTPS`
    /// and `..._HTTP`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(std::env::vars())
    }

    /// Apply overrides from an explicit set of variables.
    #[must_use]
    pub fn with_overrides<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();

            match key {
                "LISTEN_ADDR" => self.server.listen_addr = value,
                "LISTEN_PORT" => {
                    if let Ok(port) = value.parse() {
                        self.server.listen_port = port;
                    }
                }
                "GATEWAY_NAME" => self.server.gateway_name = value,
                "UPSTREAM_TIMEOUT" => {
                    if let Ok(secs) = value.parse::<u64>() {
                        self.server.upstream_timeout = Duration::from_secs(secs);
                    }
                }
                "JWT_KEY" => self.jwt.key = value,
                "JWT_ISSUER" => self.jwt.issuer = value,
                "JWT_AUDIENCE" => self.jwt.audience = value,
                "RATE_LIMIT_ENABLED" => {
                    if let Ok(enabled) = value.parse() {
                        self.rate_limit.enabled = enabled;
                    }
                }
                "RATE_LIMIT_PERMITS" => {
                    if let Ok(permits) = value.parse() {
                        self.rate_limit.permit_limit = permits;
                    }
                }
                "SERVICES_STRICT" => {
                    if let Ok(strict) = value.parse() {
                        self.services.strict = strict;
                    }
                }
                "LOG_LEVEL" => self.telemetry.log_level = value,
                "OTLP_ENDPOINT" => self.telemetry.otlp_endpoint = Some(value),
                other => {
                    if let Some(service) = other.strip_prefix("SERVICES_") {
                        self.apply_service_override(service, value);
                    }
                }
            }
        }

        self
    }

    fn apply_service_override(&mut self, key: &str, value: String) {
        let (name, https) = if let Some(name) = key.strip_suffix("_HTTPS") {
            (name, true)
        } else if let Some(name) = key.strip_suffix("_HTTP") {
            (name, false)
        } else {
            return;
        };

        let entry = self
            .services
            .entries
            .entry(name.to_ascii_lowercase())
            .or_default();
        if https {
            entry.https = Some(value);
        } else {
            entry.http = Some(value);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.server.listen_addr.parse::<IpAddr>().is_err() {
            return Err(GatewayError::config(format!(
                "server.listen_addr is not an IP address: {}",
                self.server.listen_addr
            )));
        }
        if self.server.upstream_timeout.is_zero() {
            return Err(GatewayError::config("server.upstream_timeout must be greater than 0"));
        }
        if self.server.max_request_body_size == 0 {
            return Err(GatewayError::config(
                "server.max_request_body_size must be greater than 0",
            ));
        }

        if self.jwt.key.is_empty() {
            return Err(GatewayError::config("jwt.key is required"));
        }
        if self.jwt.key.len() < MIN_KEY_BYTES {
            return Err(GatewayError::config(format!(
                "jwt.key must be at least {MIN_KEY_BYTES} bytes"
            )));
        }
        if self.jwt.issuer.is_empty() {
            return Err(GatewayError::config("jwt.issuer is required"));
        }
        if self.jwt.audience.is_empty() {
            return Err(GatewayError::config("jwt.audience is required"));
        }

        if self.rate_limit.permit_limit == 0 {
            return Err(GatewayError::config("rate_limit.permit_limit must be greater than 0"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(GatewayError::config("rate_limit.window must be greater than 0"));
        }

        if self.routes.is_empty() {
            return Err(GatewayError::config("at least one route is required"));
        }
        let registry = ServiceRegistry::from_settings(&self.services);
        for route in &self.routes {
            if !route.prefix.starts_with('/') || route.prefix.len() < 2 {
                return Err(GatewayError::config(format!(
                    "route prefix must be an absolute path below '/': {}",
                    route.prefix
                )));
            }
            if !route.upstream_prefix.is_empty() && !route.upstream_prefix.starts_with('/') {
                return Err(GatewayError::config(format!(
                    "upstream prefix must be absolute: {}",
                    route.upstream_prefix
                )));
            }
            registry.resolve(&route.service).map_err(|_| {
                GatewayError::config(format!(
                    "route {} names unknown service {}",
                    route.prefix, route.service
                ))
            })?;
        }

        for (name, entry) in &self.services.entries {
            if let Some(url) = entry.url() {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(GatewayError::config(format!(
                        "services.{name} must start with http:// or https://"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Derive the telemetry configuration.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let mut builder = TelemetryConfig::builder()
            .service_name(&self.telemetry.service_name)
            .environment(&self.telemetry.environment)
            .log_level(&self.telemetry.log_level)
            .json_logs(self.telemetry.json_logs)
            .metrics_enabled(self.telemetry.metrics_enabled);
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            builder = builder.otlp_endpoint(endpoint);
        }
        builder.build()
    }
}

/// Listener and proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port the gateway listens on.
    pub listen_port: u16,
    /// Value of the `X-Gateway` header on forwarded requests.
    pub gateway_name: String,
    /// Timeout for upstream requests.
    #[serde(with = "humantime_serde")]
    pub upstream_timeout: Duration,
    /// Maximum request body size in bytes.
    pub max_request_body_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8080,
            gateway_name: "UITVibes-API-Gateway".to_string(),
            upstream_timeout: Duration::from_secs(30),
            max_request_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Signing algorithms accepted for the shared key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JwtAlgorithm {
    /// HMAC with SHA-256.
    #[default]
    HS256,
    /// HMAC with SHA-384.
    HS384,
    /// HMAC with SHA-512.
    HS512,
}

impl From<JwtAlgorithm> for Algorithm {
    fn from(algorithm: JwtAlgorithm) -> Self {
        match algorithm {
            JwtAlgorithm::HS256 => Algorithm::HS256,
            JwtAlgorithm::HS384 => Algorithm::HS384,
            JwtAlgorithm::HS512 => Algorithm::HS512,
        }
    }
}

/// Bearer token validation settings.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtSettings {
    /// Shared signing key.
    pub key: String,
    /// Expected `iss`.
    pub issuer: String,
    /// Expected `aud`.
    pub audience: String,
    /// Expected signing algorithm.
    pub algorithm: JwtAlgorithm,
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

/// How rate limit partitions are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatePartition {
    /// Peer IP address.
    #[default]
    ClientIp,
    /// `Host` header.
    Host,
}

impl From<RatePartition> for KeyExtractor {
    fn from(partition: RatePartition) -> Self {
        match partition {
            RatePartition::ClientIp => KeyExtractor::ClientIp,
            RatePartition::Host => KeyExtractor::Host,
        }
    }
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Whether the rate limit stage is installed.
    pub enabled: bool,
    /// Permits per window and partition.
    pub permit_limit: u64,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Partition key.
    pub partition: RatePartition,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            permit_limit: 200,
            window: Duration::from_secs(60),
            partition: RatePartition::default(),
        }
    }
}

/// Upstream base URL settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Disable the built-in development defaults.
    pub strict: bool,
    /// Explicit entries by logical name.
    pub entries: BTreeMap<String, ServiceEntry>,
}

/// Base URLs for one logical service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEntry {
    /// HTTPS base URL, preferred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,
    /// Plain HTTP base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
}

impl ServiceEntry {
    /// The effective URL: `https` first, then `http`.
    pub fn url(&self) -> Option<&str> {
        self.https
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.http.as_deref().filter(|u| !u.is_empty()))
    }
}

/// One gateway prefix mapped to an upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Gateway path prefix, e.g. `/post`.
    pub prefix: String,
    /// Logical service name.
    pub service: String,
    /// Path prefix on the upstream, e.g. `/api/post`.
    pub upstream_prefix: String,
}

impl RouteEntry {
    /// Create a route entry.
    pub fn new(prefix: &str, service: &str, upstream_prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            service: service.to_string(),
            upstream_prefix: upstream_prefix.to_string(),
        }
    }

    /// The auth, user and post routes.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("/auth", "authservice", "/api/auth"),
            Self::new("/user", "userservice", "/api"),
            Self::new("/post", "postservice", "/api/post"),
        ]
    }
}

/// Public path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessSettings {
    /// Prefixes that never require a token, for any method.
    pub public_prefixes: Vec<String>,
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            public_prefixes: DEFAULT_PUBLIC_PREFIXES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Telemetry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Service name for telemetry.
    pub service_name: String,
    /// Deployment environment.
    pub environment: String,
    /// Log filter directive.
    pub log_level: String,
    /// JSON log output.
    pub json_logs: bool,
    /// Record Prometheus metrics.
    pub metrics_enabled: bool,
    /// OTLP endpoint for traces.
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: "vibes-gateway".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
            otlp_endpoint: None,
        }
    }
}

/// Builder for `GatewayConfig`.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Set the `X-Gateway` value.
    #[must_use]
    pub fn gateway_name(mut self, name: impl Into<String>) -> Self {
        self.config.server.gateway_name = name.into();
        self
    }

    /// Set the upstream timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.upstream_timeout = timeout;
        self
    }

    /// Set the maximum request body size.
    #[must_use]
    pub fn max_request_body_size(mut self, bytes: usize) -> Self {
        self.config.server.max_request_body_size = bytes;
        self
    }

    /// Set the token key, issuer and audience.
    #[must_use]
    pub fn jwt(
        mut self,
        key: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        self.config.jwt.key = key.into();
        self.config.jwt.issuer = issuer.into();
        self.config.jwt.audience = audience.into();
        self
    }

    /// Set the signing algorithm.
    #[must_use]
    pub fn jwt_algorithm(mut self, algorithm: JwtAlgorithm) -> Self {
        self.config.jwt.algorithm = algorithm;
        self
    }

    /// Set the rate limit budget.
    #[must_use]
    pub fn rate_limit(mut self, permit_limit: u64, window: Duration) -> Self {
        self.config.rate_limit.permit_limit = permit_limit;
        self.config.rate_limit.window = window;
        self
    }

    /// Enable or disable rate limiting.
    #[must_use]
    pub fn rate_limit_enabled(mut self, enabled: bool) -> Self {
        self.config.rate_limit.enabled = enabled;
        self
    }

    /// Set the rate limit partition key.
    #[must_use]
    pub fn rate_partition(mut self, partition: RatePartition) -> Self {
        self.config.rate_limit.partition = partition;
        self
    }

    /// Add or replace a service base URL.
    #[must_use]
    pub fn service(mut self, name: &str, url: impl Into<String>) -> Self {
        let url = url.into();
        let entry = if url.starts_with("https://") {
            ServiceEntry {
                https: Some(url),
                http: None,
            }
        } else {
            ServiceEntry {
                https: None,
                http: Some(url),
            }
        };
        self.config
            .services
            .entries
            .insert(name.to_ascii_lowercase(), entry);
        self
    }

    /// Disable the built-in development service URLs.
    #[must_use]
    pub fn strict_services(mut self, strict: bool) -> Self {
        self.config.services.strict = strict;
        self
    }

    /// Replace the route table.
    #[must_use]
    pub fn routes(mut self, routes: Vec<RouteEntry>) -> Self {
        self.config.routes = routes;
        self
    }

    /// Replace the public prefixes.
    #[must_use]
    pub fn public_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.config.access.public_prefixes = prefixes;
        self
    }

    /// Enable or disable metrics.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.telemetry.metrics_enabled = enabled;
        self
    }

    /// Set the OTLP endpoint.
    #[must_use]
    pub fn otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.telemetry.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> GatewayResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Custom (de)serializer for Duration using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |digits: &str| -> Result<u64, String> {
            digits
                .trim()
                .parse()
                .map_err(|_| format!("invalid duration: {s}"))
        };
        let scaled = |value: u64, unit: u64| -> Result<Duration, String> {
            value
                .checked_mul(unit)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration out of range: {s}"))
        };

        if let Some(stripped) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(number(stripped)?))
        } else if let Some(stripped) = s.strip_suffix('s') {
            Ok(Duration::from_secs(number(stripped)?))
        } else if let Some(stripped) = s.strip_suffix('m') {
            scaled(number(stripped)?, 60)
        } else if let Some(stripped) = s.strip_suffix('h') {
            scaled(number(stripped)?, 3600)
        } else {
            // Bare numbers are seconds
            Ok(Duration::from_secs(number(s)?))
        }
    }
}
