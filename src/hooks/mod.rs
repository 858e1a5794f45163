//! Install-once instrumentation boundary for database and cache
//! collaborators.
//!
//! The host's data layer calls these observers after each operation; they
//! are independent of the request lifecycle and not gated by it. Construct
//! the hooks once at startup and hand them to the collaborators - there is
//! no per-request installation.

use std::sync::Arc;
use std::time::Duration;

use crate::metrics::MetricsRegistry;

/// SQL statement classification for query metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl QueryKind {
    /// Classify by the leading SQL verb.
    pub fn classify(sql: &str) -> Self {
        let verb = sql.trim_start().split_whitespace().next().unwrap_or("");
        if verb.eq_ignore_ascii_case("select") {
            Self::Select
        } else if verb.eq_ignore_ascii_case("insert") {
            Self::Insert
        } else if verb.eq_ignore_ascii_case("update") {
            Self::Update
        } else if verb.eq_ignore_ascii_case("delete") {
            Self::Delete
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Other => "OTHER",
        }
    }
}

/// Outcome label for cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Success,
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentationHooks {
    metrics: Arc<MetricsRegistry>,
}

impl InstrumentationHooks {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    /// Record one database query. `sql` is only inspected for its verb;
    /// statement text never reaches a label.
    pub fn observe_db_query(&self, db_alias: &str, sql: &str, duration: Duration) {
        self.metrics
            .record_db_query(db_alias, QueryKind::classify(sql).as_str(), duration);
    }

    /// Record one cache operation.
    pub fn observe_cache_operation(&self, cache_name: &str, operation: &str, outcome: CacheOutcome) {
        self.metrics
            .record_cache_operation(cache_name, operation, outcome.as_str());
    }
}
