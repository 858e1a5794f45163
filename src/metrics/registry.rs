//! Prometheus metrics registry for the request lifecycle.
//!
//! The registry is an explicitly constructed component: it owns a private
//! Prometheus recorder rather than installing a process-global one, so hosts
//! and tests get a defined lifecycle (build at startup, drop to reset).
//! Recording goes through the `metrics` macros against that local recorder.
//!
//! # Cardinality
//!
//! Endpoint labels are normalized before they reach any instrument: numeric
//! path segments collapse to `{id}` and UUID-shaped segments to `{uuid}`.
//! Without this the label space - and the registry's memory - grows without
//! bound under high-cardinality paths.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::config::ObservabilityConfig;

use super::endpoint_label;

/// Prometheus text exposition content type.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Buckets for the request/response size histograms, in bytes.
const SIZE_BUCKETS: &[f64] = &[
    256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
];

pub struct MetricsRegistry {
    recorder: Option<PrometheusRecorder>,
    handle: Option<PrometheusHandle>,
    prefix: String,
}

impl MetricsRegistry {
    /// Build a registry with the configured buckets and service label.
    ///
    /// Setup failure is not fatal: the registry comes up disabled, every
    /// recording call is a cheap no-op, and `snapshot()` returns an empty
    /// exposition. Request handling proceeds either way.
    pub fn new(config: &ObservabilityConfig) -> Self {
        if !config.metrics_enabled {
            tracing::info!("metrics collection disabled by configuration");
            return Self::disabled(config);
        }

        let builder = PrometheusBuilder::new()
            .add_global_label("service", config.service_name.clone());
        let builder = match builder
            .set_buckets(&config.histogram_buckets)
            .and_then(|b| b.set_buckets_for_metric(Matcher::Suffix("size_bytes".into()), SIZE_BUCKETS))
        {
            Ok(builder) => builder,
            Err(e) => {
                tracing::error!(error = %e, "failed to build metrics recorder");
                return Self::disabled(config);
            }
        };

        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        let registry = Self {
            recorder: Some(recorder),
            handle: Some(handle),
            prefix: config.metrics_prefix.clone(),
        };
        registry.describe_instruments();

        tracing::info!(
            service = %config.service_name,
            buckets = config.histogram_buckets.len(),
            "metrics registry initialized"
        );

        registry
    }

    fn describe_instruments(&self) {
        self.record(|| {
            describe_counter!(
                self.name("http_requests_total"),
                "Total number of HTTP requests"
            );
            describe_histogram!(
                self.name("http_request_duration_seconds"),
                "HTTP request duration in seconds"
            );
            describe_histogram!(
                self.name("http_request_size_bytes"),
                "HTTP request size in bytes"
            );
            describe_histogram!(
                self.name("http_response_size_bytes"),
                "HTTP response size in bytes"
            );
            describe_counter!(
                self.name("http_exceptions_total"),
                "Total number of requests that failed without a response"
            );
            describe_gauge!(
                self.name("http_requests_active"),
                "Number of in-flight HTTP requests"
            );
            describe_counter!(self.name("db_queries_total"), "Total number of database queries");
            describe_histogram!(
                self.name("db_query_duration_seconds"),
                "Database query duration in seconds"
            );
            describe_counter!(
                self.name("cache_operations_total"),
                "Total number of cache operations"
            );
        });
    }

    fn disabled(config: &ObservabilityConfig) -> Self {
        Self {
            recorder: None,
            handle: None,
            prefix: config.metrics_prefix.clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.recorder.is_some()
    }

    fn name(&self, base: &str) -> String {
        if self.prefix.is_empty() {
            base.to_string()
        } else {
            format!("{}_{}", self.prefix, base)
        }
    }

    fn record(&self, f: impl FnOnce()) {
        if let Some(recorder) = &self.recorder {
            metrics::with_local_recorder(recorder, f);
        }
    }

    /// Admission: increments the active-request gauge. Must be paired with
    /// exactly one of `record_completion` or `record_exception`.
    pub fn start_request(&self) {
        self.record(|| {
            gauge!(self.name("http_requests_active")).increment(1.0);
        });
    }

    /// Terminal call for a request that produced a response.
    #[allow(clippy::too_many_arguments)]
    pub fn record_completion(
        &self,
        method: &str,
        path: &str,
        status: u16,
        view: &str,
        duration: Duration,
        request_size: u64,
        response_size: u64,
    ) {
        let endpoint = endpoint_label(path);
        let status = status.to_string();
        self.record(|| {
            counter!(
                self.name("http_requests_total"),
                "method" => method.to_string(),
                "endpoint" => endpoint.clone(),
                "status" => status.clone(),
                "view" => view.to_string()
            )
            .increment(1);

            histogram!(
                self.name("http_request_duration_seconds"),
                "method" => method.to_string(),
                "endpoint" => endpoint.clone(),
                "status" => status.clone(),
                "view" => view.to_string()
            )
            .record(duration.as_secs_f64());

            if request_size > 0 {
                histogram!(
                    self.name("http_request_size_bytes"),
                    "method" => method.to_string(),
                    "endpoint" => endpoint.clone()
                )
                .record(request_size as f64);
            }

            if response_size > 0 {
                histogram!(
                    self.name("http_response_size_bytes"),
                    "method" => method.to_string(),
                    "endpoint" => endpoint.clone(),
                    "status" => status.clone()
                )
                .record(response_size as f64);
            }

            gauge!(self.name("http_requests_active")).decrement(1.0);
        });
    }

    /// Terminal call for a request that failed with an error instead of a
    /// response. Mutually exclusive with `record_completion`.
    pub fn record_exception(&self, method: &str, path: &str, exception_type: &str) {
        let endpoint = endpoint_label(path);
        self.record(|| {
            counter!(
                self.name("http_exceptions_total"),
                "method" => method.to_string(),
                "endpoint" => endpoint.clone(),
                "exception_type" => exception_type.to_string()
            )
            .increment(1);

            gauge!(self.name("http_requests_active")).decrement(1.0);
        });
    }

    /// Database query observation, fed by the install-once hook boundary.
    pub fn record_db_query(&self, db_alias: &str, query_type: &str, duration: Duration) {
        self.record(|| {
            counter!(
                self.name("db_queries_total"),
                "db_alias" => db_alias.to_string(),
                "query_type" => query_type.to_string()
            )
            .increment(1);

            histogram!(
                self.name("db_query_duration_seconds"),
                "db_alias" => db_alias.to_string(),
                "query_type" => query_type.to_string()
            )
            .record(duration.as_secs_f64());
        });
    }

    /// Cache operation observation, fed by the install-once hook boundary.
    pub fn record_cache_operation(&self, cache_name: &str, operation: &str, result: &str) {
        self.record(|| {
            counter!(
                self.name("cache_operations_total"),
                "cache_name" => cache_name.to_string(),
                "operation" => operation.to_string(),
                "result" => result.to_string()
            )
            .increment(1);
        });
    }

    /// Render the full exposition. Returns an empty string when the backend
    /// is unavailable; never fails.
    pub fn snapshot(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }

    pub fn content_type(&self) -> &'static str {
        METRICS_CONTENT_TYPE
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("available", &self.is_available())
            .field("prefix", &self.prefix)
            .finish()
    }
}
