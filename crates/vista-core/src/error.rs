//! Error types for core identifier handling.

use thiserror::Error;

/// A specialized Result type for core operations.
pub type IdentifierResult<T> = Result<T, IdentifierError>;

/// Errors raised while constructing or parsing identifiers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// The textual form could not be split into its components.
    #[error("Invalid identifier '{input}': expected {expected}")]
    InvalidFormat {
        /// Text that failed to parse.
        input: String,
        /// Description of the accepted form.
        expected: &'static str,
    },

    /// A required component was empty.
    #[error("Identifier component '{component}' must not be empty")]
    EmptyComponent {
        /// Name of the empty component.
        component: &'static str,
    },
}

impl IdentifierError {
    /// Creates an invalid format error.
    #[must_use]
    pub fn invalid_format(input: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidFormat {
            input: input.into(),
            expected,
        }
    }
}
