//! Error types raised by collaborator implementations.

use thiserror::Error;

/// Result type for function invocations.
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Error raised by a compiled function while the graph is being built.
///
/// These errors never abort a compilation. The builder counts them and
/// reports them alongside the unresolved requirements.
#[derive(Debug, Clone, Error, PartialEq, Eq, Hash)]
pub enum FunctionError {
    /// The function failed.
    #[error("{message}")]
    Failed {
        /// Failure message.
        message: String,
    },

    /// The function failed because of an underlying error.
    #[error("{message}")]
    Caused {
        /// Failure message.
        message: String,
        /// Underlying error.
        #[source]
        cause: Box<FunctionError>,
    },

    /// The function was asked for an output it does not produce.
    #[error("function '{function_id}' does not produce {value_name}")]
    NotProduced {
        /// Function identifier.
        function_id: String,
        /// Requested value name.
        value_name: String,
    },

    /// The target was not of the expected shape.
    #[error("unexpected target: {0}")]
    UnexpectedTarget(String),
}

impl FunctionError {
    /// Creates a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a failure wrapping a cause.
    pub fn caused(message: impl Into<String>, cause: FunctionError) -> Self {
        Self::Caused {
            message: message.into(),
            cause: Box::new(cause),
        }
    }

    /// The directly wrapped error, if any.
    pub fn cause(&self) -> Option<&FunctionError> {
        match self {
            Self::Caused { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// The innermost error of the chain.
    pub fn root_cause(&self) -> &FunctionError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }
}
