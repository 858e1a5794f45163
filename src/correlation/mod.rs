//! Correlation identifiers and W3C trace-context propagation.
//!
//! Every admitted request gets a UUIDv4 correlation id linking its span,
//! metrics, and log records, plus an OpenTelemetry context extracted from
//! the inbound `traceparent`/`tracestate` headers when present.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{Context, global};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use uuid::Uuid;

/// Response header carrying the correlation id back to the caller.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Install the W3C trace-context propagator as the process-global text map
/// propagator. Called once at pipeline init; calling again is harmless.
pub fn init_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

/// A fresh correlation id, unique within the process lifetime with
/// overwhelming probability.
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Parse inbound propagation headers into a context. Absent or malformed
/// headers fall back to a fresh root context; this never fails.
pub fn extract_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Write propagation headers for `context` into an outbound carrier.
/// Injecting the same context twice yields the same carrier state.
pub fn inject_context(context: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(context, &mut HeaderInjector(headers))
    });
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect::<Vec<_>>()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl<'a> Injector for HeaderInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}
