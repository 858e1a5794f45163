use thiserror::Error;

/// Errors surfaced by the observability pipeline.
///
/// Only `Configuration` is fatal: it is returned from startup paths and the
/// host is expected to abort on it. `Instrumentation` covers failures inside
/// the telemetry subsystems; those are caught and logged at the call site
/// during the request lifecycle and never reach business logic.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("instrumentation failure: {0}")]
    Instrumentation(String),
}

impl ObservabilityError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn instrumentation(msg: impl Into<String>) -> Self {
        Self::Instrumentation(msg.into())
    }
}
