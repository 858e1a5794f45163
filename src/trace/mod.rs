//! Distributed tracing manager built on the OpenTelemetry SDK.
//!
//! Owns the tracer-provider lifecycle: resource attributes, trace-id-ratio
//! sampling, and the configured span sinks (OTLP over tonic, console in
//! debug mode or as the fallback). Sink setup is best-effort - one sink
//! failing to initialize is logged and does not stop the others.
//!
//! Request spans are handed out as [`RequestSpan`] values: a span that was
//! started is ended exactly once on every exit path, and a handle for a
//! disabled or unsampled pipeline absorbs all calls as no-ops.

use std::time::Duration;

use axum::http::{HeaderMap, Method, Uri, header};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanKind, Status, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{self as sdktrace, Sampler, Span, Tracer, TracerProvider},
};

use crate::config::ObservabilityConfig;
use crate::logging::sanitize_headers;

pub struct TracingManager {
    provider: Option<TracerProvider>,
    tracer: Option<Tracer>,
}

impl TracingManager {
    /// Build the tracer provider and its exporters from configuration.
    ///
    /// Must run inside a Tokio runtime: span export is batched onto the
    /// runtime so request latency is never coupled to exporter availability.
    pub fn new(config: &ObservabilityConfig) -> Self {
        if !config.tracing_enabled {
            tracing::info!("distributed tracing disabled by configuration");
            return Self::disabled();
        }

        let mut builder = TracerProvider::builder().with_config(Self::trace_config(config));
        let mut sinks = 0usize;

        if let Some(endpoint) = &config.export_endpoint {
            match opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()
            {
                Ok(exporter) => {
                    builder = builder.with_batch_exporter(exporter, runtime::Tokio);
                    sinks += 1;
                    tracing::info!(endpoint = %endpoint, "OTLP span exporter configured");
                }
                Err(e) => {
                    tracing::error!(endpoint = %endpoint, error = %e, "failed to set up OTLP span exporter");
                }
            }
        }

        if config.debug_mode || sinks == 0 {
            builder = builder
                .with_batch_exporter(opentelemetry_stdout::SpanExporter::default(), runtime::Tokio);
            tracing::info!("console span exporter configured");
        }

        let provider = builder.build();
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));

        tracing::info!(
            service = %config.service_name,
            sample_rate = config.sample_rate,
            "tracing manager initialized"
        );

        Self {
            provider: Some(provider),
            tracer: Some(tracer),
        }
    }

    /// Build against an injected span exporter; used by tests and by hosts
    /// that bring their own sink.
    pub fn with_span_exporter<E>(config: &ObservabilityConfig, exporter: E) -> Self
    where
        E: opentelemetry_sdk::export::trace::SpanExporter + 'static,
    {
        let provider = TracerProvider::builder()
            .with_config(Self::trace_config(config))
            .with_simple_exporter(exporter)
            .build();
        let tracer = provider.tracer(env!("CARGO_PKG_NAME"));
        Self {
            provider: Some(provider),
            tracer: Some(tracer),
        }
    }

    fn disabled() -> Self {
        Self {
            provider: None,
            tracer: None,
        }
    }

    fn trace_config(config: &ObservabilityConfig) -> sdktrace::Config {
        // Keyed by trace id so the decision is consistent for every span in
        // the trace, and parent-based so an upstream decision is honored.
        sdktrace::Config::default()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                config.sample_rate,
            ))))
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", config.service_name.clone()),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]))
    }

    pub fn is_available(&self) -> bool {
        self.tracer.is_some()
    }

    /// The underlying tracer, for bridging host `tracing` spans into the
    /// same pipeline.
    pub fn tracer(&self) -> Option<&Tracer> {
        self.tracer.as_ref()
    }

    /// Start the top-level server span for an admitted request. Returns a
    /// no-op handle when tracing is disabled or unavailable.
    pub fn start_span(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        parent: &Context,
        correlation_id: &str,
        config: &ObservabilityConfig,
    ) -> RequestSpan {
        let Some(tracer) = &self.tracer else {
            return RequestSpan::noop();
        };

        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");

        let mut attributes = vec![
            KeyValue::new("http.method", method.to_string()),
            KeyValue::new("http.url", uri.to_string()),
            KeyValue::new(
                "http.scheme",
                uri.scheme_str().unwrap_or("http").to_string(),
            ),
            KeyValue::new("http.host", host.to_string()),
            KeyValue::new("http.correlation_id", correlation_id.to_string()),
        ];

        if config.include_headers {
            for (name, value) in sanitize_headers(headers, &config.sensitive_headers) {
                attributes.push(KeyValue::new(format!("http.header.{name}"), value));
            }
        }

        let span = tracer
            .span_builder(format!("{} {}", method, uri.path()))
            .with_kind(SpanKind::Server)
            .with_attributes(attributes)
            .start_with_context(tracer, parent);

        RequestSpan { inner: Some(span) }
    }

    /// Flush buffered spans and shut the provider down. Safe to call on a
    /// disabled manager.
    pub fn shutdown(&self) {
        if let Some(provider) = &self.provider {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "span flush failed during shutdown");
                }
            }
            // opentelemetry_sdk 0.23 exposes no owned-provider `shutdown()`;
            // processors are shut down when the provider is dropped.
        }
    }
}

impl std::fmt::Debug for TracingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingManager")
            .field("available", &self.is_available())
            .finish()
    }
}

/// Handle for one request's top-level span.
///
/// Encapsulates the unstarted -> recording -> ended state machine: ending an
/// already-ended handle, or any call on a no-op handle, is a safe no-op.
pub struct RequestSpan {
    inner: Option<Span>,
}

impl RequestSpan {
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.as_ref().is_some_and(|span| span.is_recording())
    }

    /// The span context, for injecting propagation headers into the
    /// response. None for no-op handles.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.inner.as_ref().map(|span| span.span_context().clone())
    }

    /// Attach exception metadata and mark the span errored. The span stays
    /// open; `end_errored` closes it.
    pub fn record_exception(&mut self, exception_type: &str, message: &str) {
        if let Some(span) = self.inner.as_mut() {
            span.add_event(
                "exception",
                vec![
                    KeyValue::new("exception.type", exception_type.to_string()),
                    KeyValue::new("exception.message", message.to_string()),
                ],
            );
            span.set_status(Status::error(message.to_string()));
        }
    }

    /// End with a response status. Status codes >= 400 mark the span
    /// errored.
    pub fn end(&mut self, status_code: u16, duration: Duration) {
        if let Some(mut span) = self.inner.take() {
            span.set_attribute(KeyValue::new("http.status_code", status_code as i64));
            span.set_attribute(KeyValue::new(
                "http.duration_ms",
                duration.as_secs_f64() * 1000.0,
            ));
            if status_code >= 400 {
                span.set_status(Status::error(format!("HTTP {status_code}")));
            } else {
                span.set_status(Status::Ok);
            }
            span.end();
        }
    }

    /// End after a failure that produced no response.
    pub fn end_errored(&mut self, message: &str, duration: Duration) {
        if let Some(mut span) = self.inner.take() {
            span.set_attribute(KeyValue::new("error", true));
            span.set_attribute(KeyValue::new(
                "http.duration_ms",
                duration.as_secs_f64() * 1000.0,
            ));
            span.set_status(Status::error(message.to_string()));
            span.end();
        }
    }
}

impl std::fmt::Debug for RequestSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSpan")
            .field("recording", &self.is_recording())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation;
    use futures::future::BoxFuture;
    use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
    use std::sync::{Arc, Mutex};

    /// Collects finished spans for assertions; exported synchronously via
    /// the simple processor.
    #[derive(Debug, Clone)]
    pub(crate) struct InMemorySpanExporter {
        spans: Arc<Mutex<Vec<SpanData>>>,
    }

    impl InMemorySpanExporter {
        pub(crate) fn new() -> (Self, Arc<Mutex<Vec<SpanData>>>) {
            let spans = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    spans: spans.clone(),
                },
                spans,
            )
        }
    }

    impl SpanExporter for InMemorySpanExporter {
        fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            self.spans.lock().unwrap().extend(batch);
            Box::pin(futures::future::ready(Ok(())))
        }
    }

    fn test_manager(sample_rate: f64) -> (TracingManager, Arc<Mutex<Vec<SpanData>>>) {
        let config = ObservabilityConfig {
            sample_rate,
            ..ObservabilityConfig::default()
        };
        let (exporter, spans) = InMemorySpanExporter::new();
        (TracingManager::with_span_exporter(&config, exporter), spans)
    }

    fn start_test_span(manager: &TracingManager, config: &ObservabilityConfig) -> RequestSpan {
        manager.start_span(
            &Method::GET,
            &"/test/".parse().unwrap(),
            &HeaderMap::new(),
            &Context::new(),
            "test-correlation-id",
            config,
        )
    }

    #[test]
    fn test_span_records_and_exports_on_end() {
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig::default();

        let mut span = start_test_span(&manager, &config);
        assert!(span.is_recording());
        span.end(200, Duration::from_millis(100));
        assert!(!span.is_recording());

        let exported = spans.lock().unwrap();
        assert_eq!(exported.len(), 1);
        let data = &exported[0];
        assert_eq!(data.name, "GET /test/");
        assert_eq!(data.span_kind, SpanKind::Server);
        assert_eq!(data.status, Status::Ok);

        let attrs: std::collections::HashMap<_, _> = data
            .attributes
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        assert_eq!(
            attrs.get(&opentelemetry::Key::new("http.correlation_id")),
            Some(&opentelemetry::Value::from("test-correlation-id"))
        );
        assert_eq!(
            attrs.get(&opentelemetry::Key::new("http.method")),
            Some(&opentelemetry::Value::from("GET"))
        );
    }

    #[test]
    fn test_error_status_marks_span_errored() {
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig::default();

        let mut span = start_test_span(&manager, &config);
        span.end(503, Duration::from_millis(10));

        let exported = spans.lock().unwrap();
        assert!(matches!(exported[0].status, Status::Error { .. }));
    }

    #[test]
    fn test_record_exception_attaches_event() {
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig::default();

        let mut span = start_test_span(&manager, &config);
        span.record_exception("ValueError", "boom");
        span.end_errored("boom", Duration::from_millis(5));

        let exported = spans.lock().unwrap();
        let data = &exported[0];
        assert!(matches!(data.status, Status::Error { .. }));
        assert_eq!(data.events.events.len(), 1);
        assert_eq!(data.events.events[0].name, "exception");
    }

    #[test]
    fn test_double_end_is_noop() {
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig::default();

        let mut span = start_test_span(&manager, &config);
        span.end(200, Duration::from_millis(1));
        span.end(500, Duration::from_millis(1));
        span.end_errored("late", Duration::from_millis(1));

        let exported = spans.lock().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].status, Status::Ok);
    }

    #[test]
    fn test_zero_sample_rate_yields_non_recording_span() {
        let (manager, spans) = test_manager(0.0);
        let config = ObservabilityConfig::default();

        let mut span = start_test_span(&manager, &config);
        assert!(!span.is_recording());
        span.end(200, Duration::from_millis(1));

        assert!(spans.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_manager_returns_noop_handle() {
        let config = ObservabilityConfig {
            tracing_enabled: false,
            ..ObservabilityConfig::default()
        };
        let manager = TracingManager::new(&config);
        assert!(!manager.is_available());

        let mut span = start_test_span(&manager, &config);
        assert!(!span.is_recording());
        assert!(span.span_context().is_none());
        span.record_exception("ValueError", "ignored");
        span.end(200, Duration::from_millis(1));
        manager.shutdown();
    }

    #[test]
    fn test_parent_context_is_honored() {
        correlation::init_propagator();
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig::default();

        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
                .parse()
                .unwrap(),
        );
        let parent = correlation::extract_context(&headers);

        let mut span = manager.start_span(
            &Method::GET,
            &"/test/".parse().unwrap(),
            &headers,
            &parent,
            "cid",
            &config,
        );
        let trace_id = span.span_context().unwrap().trace_id();
        span.end(200, Duration::from_millis(1));

        assert_eq!(
            format!("{trace_id:032x}"),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(spans.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sanitized_headers_attached_when_configured() {
        let (manager, spans) = test_manager(1.0);
        let config = ObservabilityConfig {
            include_headers: true,
            ..ObservabilityConfig::default()
        };

        let mut headers = HeaderMap::new();
        headers.insert("user-agent", "test-agent".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());

        let mut span = manager.start_span(
            &Method::GET,
            &"/test/".parse().unwrap(),
            &headers,
            &Context::new(),
            "cid",
            &config,
        );
        span.end(200, Duration::from_millis(1));

        let exported = spans.lock().unwrap();
        let attrs: std::collections::HashMap<_, _> = exported[0]
            .attributes
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        assert_eq!(
            attrs.get(&opentelemetry::Key::new("http.header.user-agent")),
            Some(&opentelemetry::Value::from("test-agent"))
        );
        assert_eq!(
            attrs.get(&opentelemetry::Key::new("http.header.authorization")),
            Some(&opentelemetry::Value::from("[REDACTED]"))
        );
    }
}
