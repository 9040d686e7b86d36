//! Response pipeline settings.

use serde::Deserialize;

/// Response pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Enable the per-stage result cache. Off by default; correctness never
    /// depends on cache hits.
    pub cache: bool,

    /// Maximum number of cached stage results before FIFO eviction.
    pub cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache: false,
            cache_capacity: 1000,
        }
    }
}
