//! Request-lifecycle observability pipeline for axum/tower services.
//!
//! Instruments every inbound HTTP request with three coordinated signals -
//! a distributed trace span, request metrics, and structured log records -
//! linked by a per-request correlation id. Path exclusion, trace sampling,
//! and per-signal feature toggles are configuration-driven, and a failure
//! in any signal subsystem never affects the business response.
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use axum_observability::Observability;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let obs = Observability::from_env()?;
//!     obs.init_telemetry()?;
//!
//!     let app = Router::new()
//!         .route("/orders/{id}", get(|| async { "ok" }))
//!         .merge(obs.metrics_router())
//!         .layer(obs.layer());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     obs.shutdown();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod trace;

use std::sync::Arc;

use axum::{Router, routing::get};
use figment::Figment;

pub use config::{ConfigProvider, ObservabilityConfig};
pub use error::ObservabilityError;
pub use hooks::InstrumentationHooks;
pub use logging::StructuredLogger;
pub use metrics::{MetricsRegistry, metrics_endpoint};
pub use middleware::{ObservabilityLayer, ObservabilityService, PipelineShared};
pub use trace::{RequestSpan, TracingManager};

/// The assembled pipeline: configuration provider plus the three signal
/// subsystems, constructed once at startup and shared by every request.
#[derive(Clone, Debug)]
pub struct Observability {
    shared: Arc<PipelineShared>,
}

impl Observability {
    /// Build the pipeline from a configuration figment.
    ///
    /// Configuration errors are fatal and returned; exporter and recorder
    /// setup failures degrade the affected subsystem to a no-op instead.
    /// Must run inside a Tokio runtime (span export is batched onto it).
    pub fn init(figment: Figment) -> Result<Self, ObservabilityError> {
        Self::from_provider(ConfigProvider::load(figment)?)
    }

    /// Build from a rebuildable configuration source; `reload()` re-reads
    /// it (files, environment) instead of reusing captured data.
    pub fn with_config_source(
        source: impl Fn() -> Figment + Send + Sync + 'static,
    ) -> Result<Self, ObservabilityError> {
        Self::from_provider(ConfigProvider::with_source(source)?)
    }

    fn from_provider(config: ConfigProvider) -> Result<Self, ObservabilityError> {
        let snapshot = config.current();

        correlation::init_propagator();

        let metrics = Arc::new(MetricsRegistry::new(&snapshot));
        let tracing_manager = Arc::new(TracingManager::new(&snapshot));
        let logger = Arc::new(StructuredLogger::new(&snapshot));

        tracing::info!(
            service = %snapshot.service_name,
            enabled = snapshot.enabled,
            metrics = metrics.is_available(),
            tracing = tracing_manager.is_available(),
            logging = logger.is_available(),
            "observability pipeline initialized"
        );

        Ok(Self {
            shared: Arc::new(PipelineShared {
                config,
                metrics,
                tracing: tracing_manager,
                logger,
            }),
        })
    }

    /// Build from the default configuration hierarchy
    /// (`observability.toml` + `OBSERVABILITY_` environment variables).
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::with_config_source(config::default_figment)
    }

    /// Install the process-global `tracing` subscriber wired to this
    /// pipeline's trace exporter.
    pub fn init_telemetry(&self) -> Result<(), ObservabilityError> {
        logging::init_telemetry(&self.config(), self.shared.tracing.tracer().cloned())
    }

    /// The request pipeline layer, for `Router::layer`.
    pub fn layer(&self) -> ObservabilityLayer {
        ObservabilityLayer::new(self.shared.clone())
    }

    /// A router exposing `GET /metrics` for pull-based scraping.
    pub fn metrics_router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_endpoint))
            .with_state(self.metrics())
    }

    /// The install-once hook boundary for database/cache collaborators.
    pub fn hooks(&self) -> InstrumentationHooks {
        InstrumentationHooks::new(self.metrics())
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.shared.metrics.clone()
    }

    pub fn config(&self) -> Arc<ObservabilityConfig> {
        self.shared.config.current()
    }

    /// Rebuild the configuration snapshot from its original sources and
    /// swap it atomically. In-flight requests keep the snapshot they
    /// admitted under.
    pub fn reload(&self) -> Result<Arc<ObservabilityConfig>, ObservabilityError> {
        self.shared.config.reload()
    }

    /// Flush buffered spans and shut the trace pipeline down.
    pub fn shutdown(&self) {
        self.shared.tracing.shutdown();
    }
}
