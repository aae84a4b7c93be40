//! Distributed tracing with OpenTelemetry.
//!
//! Disabled unless an OTLP endpoint is configured. When enabled, the W3C
//! trace-context propagator is installed globally and each proxied call
//! gets a client span whose context is injected into the upstream request,
//! so services that read `traceparent` join the same trace.
//!
//! # Example
//!
//! ```rust
//! use http::{HeaderMap, Method};
//! use vibes_telemetry::tracing::{finish_upstream_span, inject_context, start_upstream_span};
//!
//! let inbound = HeaderMap::new();
//! let mut outbound = HeaderMap::new();
//!
//! let cx = start_upstream_span(&inbound, "postservice", &Method::GET);
//! inject_context(&cx, &mut outbound);
//! // ... send with `outbound` ...
//! finish_upstream_span(&cx, Some(200));
//! ```

use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::error::TelemetryError;
use crate::TelemetryResult;

const TRACER_NAME: &str = "vibes-gateway";

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether spans are exported.
    pub enabled: bool,

    /// OTLP gRPC endpoint (e.g. `http://localhost:4317`).
    pub otlp_endpoint: String,

    /// Service name for the trace resource.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Deployment environment.
    pub environment: String,

    /// Sampling ratio (0.0 to 1.0).
    pub sample_ratio: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "vibes-gateway".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            sample_ratio: 1.0,
        }
    }
}

/// Installs the OTLP exporter and the trace-context propagator.
///
/// Returns the provider so the caller can flush it on shutdown, or `None`
/// when tracing is disabled. Must be called inside a Tokio runtime.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::attribute::SERVICE_VERSION,
            config.service_version.clone(),
        ),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let sampler = if config.sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(config.sample_ratio)
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(Sampler::ParentBased(Box::new(sampler)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());

    Ok(Some(provider))
}

/// Extracts the caller's trace context from inbound headers.
pub fn extract_context(headers: &http::HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Injects a trace context into outbound headers.
pub fn inject_context(context: &Context, headers: &mut http::HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(context, &mut HeaderInjector(headers));
    });
}

/// Starts a client span for one upstream call.
///
/// The span is parented on whatever trace context the caller sent.
pub fn start_upstream_span(inbound: &http::HeaderMap, service: &str, method: &http::Method) -> Context {
    let parent = extract_context(inbound);
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(format!("{method} {service}"))
        .with_kind(SpanKind::Client)
        .with_attributes([
            KeyValue::new("http.request.method", method.to_string()),
            KeyValue::new("peer.service", service.to_string()),
        ])
        .start_with_context(&tracer, &parent);
    parent.with_span(span)
}

/// Ends the span started by [`start_upstream_span`].
///
/// `status` is the upstream status code, or `None` if no response arrived.
pub fn finish_upstream_span(context: &Context, status: Option<u16>) {
    let span = context.span();
    match status {
        Some(code) => {
            span.set_attribute(KeyValue::new("http.response.status_code", i64::from(code)));
            if code >= 500 {
                span.set_status(Status::error(format!("upstream returned {code}")));
            }
        }
        None => span.set_status(Status::error("no upstream response")),
    }
    span.end();
}

/// Reads trace headers from an `http::HeaderMap`.
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(http::HeaderName::as_str).collect()
    }
}

/// Writes trace headers into an `http::HeaderMap`.
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(val)) = (
            http::header::HeaderName::try_from(key),
            http::header::HeaderValue::try_from(&value),
        ) {
            self.0.insert(name, val);
        }
    }
}
