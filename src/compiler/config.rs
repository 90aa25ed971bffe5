//! Settings of the compilation pipeline.

use std::path::PathBuf;

/// Default complexity budget of an inlined callee.
pub const DEFAULT_INLINING_THRESHOLD: usize = 15;

/// Default nesting limit of inlining plans.
pub const DEFAULT_INLINING_DEPTH: usize = 5;

/// Settings of the inlining pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InliningConfig {
    /// Complexity a callee may have at depth 0. Each nesting level lowers the
    /// budget by two, and callers that are themselves below the threshold get it
    /// added once more.
    pub threshold: usize,
    /// Plans are not built below this nesting level.
    pub max_depth: usize,
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INLINING_THRESHOLD,
            max_depth: DEFAULT_INLINING_DEPTH,
        }
    }
}

/// Settings of a [`super::Pipeline`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Run the inlining pass on every surviving method.
    pub inlining: bool,
    /// Inlining limits.
    pub inlining_config: InliningConfig,
    /// Lower `InitClass` markers into guarded initializer calls.
    pub lower_class_init: bool,
    /// Replace try/catch regions with shadow stack dispatch.
    pub lower_exceptions: bool,
    /// Run per-method stages (SSA construction and transformations) on the rayon
    /// thread pool.
    pub parallel: bool,
    /// Directory of the disk program cache. `None` disables caching.
    pub cache_directory: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inlining: true,
            inlining_config: InliningConfig::default(),
            lower_class_init: true,
            lower_exceptions: true,
            parallel: true,
            cache_directory: None,
        }
    }
}

impl PipelineConfig {
    /// Configuration running analysis and linking only.
    #[must_use]
    pub fn analysis_only() -> Self {
        Self {
            inlining: false,
            lower_class_init: false,
            lower_exceptions: false,
            ..Self::default()
        }
    }

    /// Sets the cache directory.
    #[must_use]
    pub fn with_cache(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(directory.into());
        self
    }
}
