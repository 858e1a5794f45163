//! Metrics registry, endpoint-label normalization, and the pull endpoint.

pub mod endpoint;
pub mod registry;

pub use endpoint::metrics_endpoint;
pub use registry::{METRICS_CONTENT_TYPE, MetricsRegistry};

use std::sync::OnceLock;

use regex::Regex;

fn uuid_segment() -> &'static Regex {
    static UUID_SEGMENT: OnceLock<Regex> = OnceLock::new();
    UUID_SEGMENT.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("uuid segment pattern is valid")
    })
}

/// Collapse dynamic path segments so metric labels stay low-cardinality:
/// all-digit segments become `{id}`, UUID-shaped segments become `{uuid}`.
/// Idempotent - normalizing an already-normalized path is a no-op.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else if uuid_segment().is_match(segment) {
                "{uuid}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The endpoint label for a request path: normalized, without surrounding
/// slashes (`/users/123/` becomes `users/{id}`).
pub fn endpoint_label(path: &str) -> String {
    normalize_path(path).trim_matches('/').to_string()
}
