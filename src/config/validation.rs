use std::sync::{Arc, RwLock};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use garde::Validate;

use crate::error::ObservabilityError;

use super::ObservabilityConfig;

/// Default configuration hierarchy: embedded defaults, then an optional
/// `observability.toml` next to the process, then `OBSERVABILITY_`-prefixed
/// environment variables (e.g. `OBSERVABILITY_SAMPLE_RATE=0.25`).
pub fn default_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ObservabilityConfig::default()))
        .merge(Toml::file("observability.toml"))
        .merge(Env::prefixed("OBSERVABILITY_").split("__"))
}

/// Holds the active configuration snapshot and the source it was built
/// from, so `reload()` can rebuild and atomically swap it.
///
/// Figment reads its providers when they are merged, so the provider keeps
/// a source closure and rebuilds the figment on reload; that is what makes
/// a reload observe changed files and environment. Readers clone out an
/// `Arc`; a reload never mutates a snapshot in place, so an in-flight
/// request observes either the old or the new snapshot for the rest of its
/// lifecycle.
pub struct ConfigProvider {
    source: Box<dyn Fn() -> Figment + Send + Sync>,
    snapshot: RwLock<Arc<ObservabilityConfig>>,
}

impl ConfigProvider {
    /// Build and validate a snapshot from a rebuildable source. Validation
    /// failures are fatal and must be surfaced at process startup.
    pub fn with_source(
        source: impl Fn() -> Figment + Send + Sync + 'static,
    ) -> Result<Self, ObservabilityError> {
        let snapshot = extract(&source())?;
        Ok(Self {
            source: Box::new(source),
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Build from an already-assembled figment. Reloads re-extract from a
    /// clone of it, so sources that were read eagerly stay as captured;
    /// use [`ConfigProvider::with_source`] when reloads must re-read them.
    pub fn load(figment: Figment) -> Result<Self, ObservabilityError> {
        Self::with_source(move || figment.clone())
    }

    /// Load from the default hierarchy (file + environment).
    pub fn from_env() -> Result<Self, ObservabilityError> {
        Self::with_source(default_figment)
    }

    /// The current snapshot. Cheap; safe to call per request.
    pub fn current(&self) -> Arc<ObservabilityConfig> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Rebuild from the original sources and swap the snapshot atomically.
    /// On validation failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<Arc<ObservabilityConfig>, ObservabilityError> {
        let fresh = Arc::new(extract(&(self.source)())?);
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh.clone();
        Ok(fresh)
    }
}

impl std::fmt::Debug for ConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigProvider")
            .field("snapshot", &self.current())
            .finish()
    }
}

fn extract(figment: &Figment) -> Result<ObservabilityConfig, ObservabilityError> {
    let config: ObservabilityConfig = figment
        .extract()
        .map_err(|e| ObservabilityError::configuration(e.to_string()))?;
    config
        .validate()
        .map_err(|e| ObservabilityError::configuration(e.to_string()))?;
    Ok(config)
}
