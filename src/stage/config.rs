use std::collections::BTreeSet;

use crate::{
    animation::samples::Interpolation,
    compose::prim_index::VariantFallbacks,
    foundation::error::{StratumError, StratumResult},
};

/// Options fixed when a stage is opened.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Preferred selections per variant set, used when no layer authors one.
    pub variant_fallbacks: VariantFallbacks,
    /// How time samples blend between authored times.
    pub interpolation: Interpolation,
    /// Session layer identifier, stronger than the root layer.
    pub session_layer: Option<String>,
    /// Layers skipped (with their sublayers) during layer stack composition.
    pub muted_layers: BTreeSet<String>,
    /// Compute batches of prim indexes on a rayon pool.
    pub parallel: bool,
    /// Worker count for the pool; rayon's default when unset.
    pub threads: Option<usize>,
}

impl StageConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json_str(s: &str) -> StratumResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| StratumError::serde(format!("stage config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges.
    pub fn validate(&self) -> StratumResult<()> {
        if self.threads == Some(0) {
            return Err(StratumError::validation(
                "stage config 'threads' must be >= 1 when set",
            ));
        }
        for (set, fallbacks) in &self.variant_fallbacks {
            if set.is_empty() || fallbacks.iter().any(String::is_empty) {
                return Err(StratumError::validation(format!(
                    "variant fallbacks for '{set}' must use non-empty names"
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn build_thread_pool(threads: Option<usize>) -> StratumResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(StratumError::validation(
            "stage config 'threads' must be >= 1 when set",
        ));
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| StratumError::composition(format!("failed to build rayon thread pool: {e}")))
}
