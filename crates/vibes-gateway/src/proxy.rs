//! HTTP client for forwarding requests to upstream services.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Full;
use reqwest::Client;
use tracing::{debug, error};
use vibes_middleware::Response;
use vibes_telemetry::metrics::record_upstream_error;
use vibes_telemetry::tracing::{finish_upstream_span, inject_context, start_upstream_span};

use crate::error::{GatewayError, GatewayResult};
use crate::headers::relay_headers;

/// One request bound for an upstream service.
#[derive(Debug)]
pub struct ProxyRequest<'a> {
    /// Logical service name, for logs, metrics and spans.
    pub service: &'a str,
    /// Absolute upstream URL including the query string.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Headers to send, already rewritten.
    pub headers: HeaderMap,
    /// Buffered request body.
    pub body: Bytes,
}

/// Forwards requests and relays the upstream answer verbatim.
///
/// The gateway never retries. Redirects are relayed to the client rather
/// than followed.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    timeout: Duration,
}

impl ProxyClient {
    /// Create a new proxy client.
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::server(format!("failed to create client: {e}")))?;

        Ok(Self { client, timeout })
    }

    /// Get the timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward a request to the upstream service.
    ///
    /// `inbound` is the client's original header map, used only to continue
    /// the caller's trace.
    pub async fn forward(&self, request: ProxyRequest<'_>, inbound: &HeaderMap) -> GatewayResult<Response> {
        let ProxyRequest {
            service,
            url,
            method,
            mut headers,
            body,
        } = request;

        let trace = start_upstream_span(inbound, service, &method);
        inject_context(&trace, &mut headers);

        debug!(service = %service, method = %method, url = %url, "Forwarding request");

        let result = self.exchange(service, &url, method, headers, body).await;

        match &result {
            Ok(response) => finish_upstream_span(&trace, Some(response.status().as_u16())),
            Err(e) => {
                finish_upstream_span(&trace, None);
                record_upstream_error(service, e.category());
                error!(service = %service, url = %url, error = %e, "Upstream request failed");
            }
        }

        result
    }

    async fn exchange(
        &self,
        service: &str,
        url: &str,
        method: Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let mut builder = self.client.request(method, url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let upstream = builder
            .send()
            .await
            .map_err(|e| classify(service, &e))?;

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let body = upstream
            .bytes()
            .await
            .map_err(|e| classify(service, &e))?;

        Ok(relay(status, &upstream_headers, body))
    }
}

fn classify(service: &str, error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::upstream_timeout(service)
    } else if error.is_connect() {
        GatewayError::upstream_unavailable(service, error.to_string())
    } else {
        GatewayError::upstream(format!("{service}: {error}"))
    }
}

fn relay(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = relay_headers(headers);
    response
}
