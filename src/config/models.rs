use garde::Validate;
use serde::{Deserialize, Serialize};

/// Immutable configuration snapshot for the observability pipeline.
///
/// Built once at startup (or on an explicit reload) and shared read-only by
/// every in-flight request. Field semantics follow the configuration source
/// contract: a single `OBSERVABILITY_`-namespaced key space with documented
/// defaults for every option.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ObservabilityConfig {
    /// Master switch. When false the pipeline admits nothing.
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    #[garde(skip)]
    #[serde(default = "default_true")]
    pub logging_enabled: bool,

    /// Probability that a trace is recorded. 1.0 samples everything.
    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Path prefixes that bypass the pipeline entirely.
    #[garde(skip)]
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,

    /// Header names whose values are redacted before reaching any sink.
    #[garde(skip)]
    #[serde(default = "default_sensitive_headers")]
    pub sensitive_headers: Vec<String>,

    /// Optional prefix prepended to every instrument name.
    #[garde(skip)]
    #[serde(default)]
    pub metrics_prefix: String,

    /// Duration histogram buckets, in seconds, strictly ascending.
    #[garde(length(min = 1), custom(validate_buckets))]
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,

    #[garde(length(min = 1))]
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Adds a console span sink and keeps exporter setup failures loud.
    #[garde(skip)]
    #[serde(default)]
    pub debug_mode: bool,

    /// OTLP span sink endpoint. None disables the network sink.
    #[garde(skip)]
    #[serde(default)]
    pub export_endpoint: Option<String>,

    /// Attach sanitized request headers as span attributes.
    #[garde(skip)]
    #[serde(default)]
    pub include_headers: bool,

    /// Echo the correlation id back as an `x-correlation-id` response header.
    #[garde(skip)]
    #[serde(default = "default_true")]
    pub add_correlation_header: bool,

    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_exclude_paths() -> Vec<String> {
    vec![
        "/health/".to_string(),
        "/metrics/".to_string(),
        "/favicon.ico".to_string(),
    ]
}

fn default_sensitive_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "cookie".to_string(),
        "x-api-key".to_string(),
    ]
}

fn default_histogram_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
    ]
}

fn default_service_name() -> String {
    "axum-observability".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tracing_enabled: true,
            metrics_enabled: true,
            logging_enabled: true,
            sample_rate: default_sample_rate(),
            exclude_paths: default_exclude_paths(),
            sensitive_headers: default_sensitive_headers(),
            metrics_prefix: String::new(),
            histogram_buckets: default_histogram_buckets(),
            service_name: default_service_name(),
            debug_mode: false,
            export_endpoint: None,
            include_headers: false,
            add_correlation_header: true,
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl ObservabilityConfig {
    /// Prefix match against the exclusion set. A `/metrics/` prefix also
    /// covers the bare `/metrics` form routers serve without the trailing
    /// slash.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|prefix| {
            path.starts_with(prefix.as_str())
                || prefix
                    .strip_suffix('/')
                    .is_some_and(|trimmed| path == trimmed)
        })
    }

    pub fn is_sensitive_header(&self, name: &str) -> bool {
        self.sensitive_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }
}

fn validate_buckets(buckets: &[f64], _: &()) -> garde::Result {
    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(garde::Error::new(
            "histogram buckets must be strictly ascending",
        ));
    }
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        return Err(garde::Error::new(
            "histogram buckets must be positive finite values",
        ));
    }
    Ok(())
}
