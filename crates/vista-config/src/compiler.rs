//! Compiler configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, Validate, ValidationError};

/// Settings for the view compiler.
///
/// Loaded from TOML or JSON; every field has a default.
///
/// ```toml
/// worker_threads = 4
/// parallel_configurations = false
/// progress_interval_ms = 250
/// output_failure_reports = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Threads in the graph building pool; 0 uses the available parallelism.
    #[serde(default)]
    pub worker_threads: usize,

    /// Walk sibling portfolio subtrees concurrently.
    #[serde(default = "default_true")]
    pub parallel_traversal: bool,

    /// Compile calculation configurations concurrently.
    #[serde(default)]
    pub parallel_configurations: bool,

    /// Run a progress observer per builder.
    #[serde(default = "default_true")]
    pub track_progress: bool,

    /// Interval between progress observations.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Log every compiled dependency graph.
    #[serde(default)]
    pub output_dependency_graphs: bool,

    /// Log the market data each graph requires.
    #[serde(default)]
    pub output_live_data_requirements: bool,

    /// Log unresolved requirements and function failures.
    #[serde(default)]
    pub output_failure_reports: bool,
}

fn default_true() -> bool {
    true
}

fn default_progress_interval_ms() -> u64 {
    100
}

const MAX_WORKER_THREADS: usize = 1024;
const MAX_PROGRESS_INTERVAL_MS: u64 = 60_000;

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            parallel_traversal: true,
            parallel_configurations: false,
            track_progress: true,
            progress_interval_ms: default_progress_interval_ms(),
            output_dependency_graphs: false,
            output_live_data_requirements: false,
            output_failure_reports: false,
        }
    }
}

impl CompilerConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses TOML.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parses JSON.
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Loads a file, choosing the format by extension (`.json`, else TOML),
    /// and validates the result.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        config.validate_or_error()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Enables or disables concurrent portfolio traversal.
    #[must_use]
    pub fn with_parallel_traversal(mut self, enabled: bool) -> Self {
        self.parallel_traversal = enabled;
        self
    }

    /// Enables or disables concurrent configuration compilation.
    #[must_use]
    pub fn with_parallel_configurations(mut self, enabled: bool) -> Self {
        self.parallel_configurations = enabled;
        self
    }

    /// Enables or disables progress observers.
    #[must_use]
    pub fn with_progress_tracking(mut self, enabled: bool, interval_ms: u64) -> Self {
        self.track_progress = enabled;
        self.progress_interval_ms = interval_ms;
        self
    }

    /// Enables every debug report.
    #[must_use]
    pub fn with_debug_outputs(mut self) -> Self {
        self.output_dependency_graphs = true;
        self.output_live_data_requirements = true;
        self.output_failure_reports = true;
        self
    }

    /// Worker threads after resolving the 0 default.
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    }

    /// Progress observation interval.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Validate for CompilerConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.worker_threads > MAX_WORKER_THREADS {
            errors.push(ValidationError::with_rule(
                "worker_threads",
                format!(
                    "Worker threads {} exceeds maximum of {}",
                    self.worker_threads, MAX_WORKER_THREADS
                ),
                "max_worker_threads",
            ));
        }

        if self.progress_interval_ms == 0 || self.progress_interval_ms > MAX_PROGRESS_INTERVAL_MS {
            errors.push(ValidationError::with_rule(
                "progress_interval_ms",
                format!(
                    "Progress interval must be between 1 and {} ms",
                    MAX_PROGRESS_INTERVAL_MS
                ),
                "valid_interval",
            ));
        }

        errors
    }
}
