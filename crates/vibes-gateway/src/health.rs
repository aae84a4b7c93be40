//! Health reporting for the gateway and its downstream services.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::registry::ServiceLocator;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status of the gateway process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Gateway is serving.
    Healthy,
}

/// Liveness response for `/health` and `/alive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessResponse {
    /// Overall health status.
    pub status: HealthStatus,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Version information.
    pub version: String,
    /// Time of the check.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of probing one downstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownstreamStatus {
    /// `/health` answered with a 2xx.
    Healthy,
    /// `/health` answered with anything else.
    Unhealthy,
    /// No answer, or the service could not be resolved.
    Error,
}

/// Probe result for one downstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Probe outcome.
    pub status: DownstreamStatus,
    /// HTTP status of the probe, when one arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Base URL probed.
    pub url: String,
}

/// Response for `/gateway/test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamReport {
    /// The gateway itself is always healthy if it can answer.
    pub gateway: HealthStatus,
    /// Results keyed by service (`authService`, `userService`, ...).
    pub downstream_services: BTreeMap<String, ServiceHealth>,
    /// Time of the check.
    pub timestamp: DateTime<Utc>,
}

/// Health checker for the gateway.
#[derive(Debug)]
pub struct HealthChecker {
    start_time: Instant,
    locator: Arc<dyn ServiceLocator>,
    services: Vec<String>,
    client: reqwest::Client,
}

impl HealthChecker {
    /// Create a health checker probing the given logical services.
    pub fn new(locator: Arc<dyn ServiceLocator>, services: Vec<String>) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::server(format!("failed to create health client: {e}")))?;

        Ok(Self {
            start_time: Instant::now(),
            locator,
            services,
            client,
        })
    }

    /// Get the uptime.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Perform a liveness check.
    pub fn liveness(&self) -> LivenessResponse {
        LivenessResponse {
            status: HealthStatus::Healthy,
            uptime_seconds: self.uptime().as_secs(),
            version: crate::VERSION.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Probe every downstream service's `/health` concurrently.
    pub async fn downstream(&self) -> DownstreamReport {
        let probes = self.services.iter().map(|name| async move {
            (report_key(name), self.probe(name).await)
        });
        let downstream_services = join_all(probes).await.into_iter().collect();

        DownstreamReport {
            gateway: HealthStatus::Healthy,
            downstream_services,
            timestamp: Utc::now(),
        }
    }

    async fn probe(&self, name: &str) -> ServiceHealth {
        let url = match self.locator.resolve(name) {
            Ok(url) => url,
            Err(e) => {
                return ServiceHealth {
                    status: DownstreamStatus::Error,
                    status_code: None,
                    message: Some(e.to_string()),
                    url: String::new(),
                }
            }
        };

        match self.client.get(format!("{url}/health")).send().await {
            Ok(response) => ServiceHealth {
                status: if response.status().is_success() {
                    DownstreamStatus::Healthy
                } else {
                    DownstreamStatus::Unhealthy
                },
                status_code: Some(response.status().as_u16()),
                message: None,
                url,
            },
            Err(e) => ServiceHealth {
                status: DownstreamStatus::Error,
                status_code: None,
                message: Some(e.to_string()),
                url,
            },
        }
    }
}

/// `postservice` becomes `postService`.
fn report_key(name: &str) -> String {
    match name.strip_suffix("service") {
        Some(stem) if !stem.is_empty() => format!("{stem}Service"),
        _ => name.to_string(),
    }
}
