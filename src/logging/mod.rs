//! Structured logging: subscriber installation and the correlated request
//! logger.
//!
//! The subscriber combines an `EnvFilter`, a json or pretty fmt layer, and -
//! when tracing is up - the OpenTelemetry bridge layer, so host `tracing`
//! spans land in the same trace pipeline as the request spans.
//!
//! [`StructuredLogger`] emits exactly one event per lifecycle point: request
//! start, request end, exception. Every event carries the correlation id.

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ObservabilityConfig;
use crate::error::ObservabilityError;

/// Event target for the three request-lifecycle log points.
pub const REQUEST_LOG_TARGET: &str = "axum_observability::request";

/// Install the process-global subscriber: env filter, json/pretty output,
/// and the OpenTelemetry bridge when a tracer is supplied.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a global
/// subscriber is already installed.
pub fn init_telemetry(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), ObservabilityError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let json = config.log_format == "json";
    let result = match (json, tracer) {
        (true, Some(tracer)) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init(),
        (true, None) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        (false, Some(tracer)) => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init(),
        (false, None) => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    };

    result.map_err(|e| ObservabilityError::instrumentation(e.to_string()))?;

    tracing::info!(
        json_format = json,
        level = %config.log_level,
        "telemetry subscriber initialized"
    );
    Ok(())
}

/// Redact the values of sensitive headers; everything else passes through.
/// Values that are not valid UTF-8 are replaced rather than dropped.
pub fn sanitize_headers(
    headers: &HeaderMap,
    sensitive: &[String],
) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if sensitive.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[INVALID]").to_string()
            };
            (name, value)
        })
        .collect()
}

/// Emits the correlated request-lifecycle events.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    enabled: bool,
    include_headers: bool,
    sensitive_headers: Vec<String>,
}

impl StructuredLogger {
    pub fn new(config: &ObservabilityConfig) -> Self {
        Self {
            enabled: config.logging_enabled,
            include_headers: config.include_headers,
            sensitive_headers: config.sensitive_headers.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.enabled
    }

    pub fn request_start(
        &self,
        correlation_id: &str,
        method: &str,
        path: &str,
        headers: &HeaderMap,
    ) {
        if !self.enabled {
            return;
        }
        if self.include_headers {
            let headers = sanitize_headers(headers, &self.sensitive_headers);
            tracing::info!(
                target: REQUEST_LOG_TARGET,
                correlation_id = %correlation_id,
                method = %method,
                path = %path,
                headers = ?headers,
                "request started"
            );
        } else {
            tracing::info!(
                target: REQUEST_LOG_TARGET,
                correlation_id = %correlation_id,
                method = %method,
                path = %path,
                "request started"
            );
        }
    }

    pub fn request_end(
        &self,
        correlation_id: &str,
        method: &str,
        path: &str,
        status: u16,
        duration_ms: f64,
    ) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: REQUEST_LOG_TARGET,
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            status = status,
            duration_ms = duration_ms,
            "request completed"
        );
    }

    pub fn request_exception(
        &self,
        correlation_id: &str,
        method: &str,
        path: &str,
        exception_type: &str,
        message: &str,
        duration_ms: f64,
    ) {
        if !self.enabled {
            return;
        }
        tracing::error!(
            target: REQUEST_LOG_TARGET,
            correlation_id = %correlation_id,
            method = %method,
            path = %path,
            exception_type = %exception_type,
            error = %message,
            duration_ms = duration_ms,
            "request failed"
        );
    }
}
