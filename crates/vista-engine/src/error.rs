//! Error types for the compilation engine.

use thiserror::Error;
use vista_config::ConfigError;
use vista_core::UniqueId;

/// A specialized Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that abort a view compilation.
///
/// Failures to resolve individual values are not errors; they are reported
/// on the compiled view instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The view has portfolio requirements but names no portfolio.
    #[error("View '{view}' requires portfolio outputs but does not reference a portfolio")]
    NoPortfolio {
        /// View name.
        view: String,
    },

    /// The portfolio reference could not be turned into a specification.
    #[error("Could not identify portfolio {portfolio} referenced by view '{view}'")]
    PortfolioNotIdentified {
        /// Portfolio identifier.
        portfolio: UniqueId,
        /// View name.
        view: String,
    },

    /// The portfolio specification did not resolve to a portfolio.
    #[error("Unable to resolve portfolio {portfolio} referenced by view '{view}'")]
    PortfolioNotFound {
        /// Portfolio identifier.
        portfolio: UniqueId,
        /// View name.
        view: String,
    },

    /// The compilation was cancelled.
    #[error("Compilation cancelled")]
    Cancelled,

    /// The operation is not supported.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The compilation failed for another reason.
    #[error("Compilation failed: {0}")]
    CompilationFailed(String),

    /// A required service was not supplied.
    #[error("Missing required service: {0}")]
    MissingService(String),

    /// Invalid view definition or compiler configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The execution service could not be created or used.
    #[error("Executor error: {0}")]
    Executor(String),

    /// Graph structure violated an internal rule.
    #[error("Graph error: {0}")]
    Graph(String),
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<rayon::ThreadPoolBuildError> for EngineError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        EngineError::Executor(err.to_string())
    }
}
