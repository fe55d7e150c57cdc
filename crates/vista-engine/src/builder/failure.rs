//! Resolution failures and their reporting.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use vista_core::ValueRequirement;
use vista_traits::FunctionError;

/// Why a value requirement could not be resolved.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FailureReason {
    /// The requirement's target could not be resolved.
    #[error("target {0} could not be resolved")]
    UnresolvedTarget(String),

    /// No function declares a matching output on the target.
    #[error("no function produces {value_name} on {target}")]
    NoApplicableFunctions {
        /// Requested value name.
        value_name: String,
        /// Resolved target.
        target: String,
    },

    /// A function raised an error.
    #[error("function {function_id} failed: {error}")]
    FunctionFailed {
        /// Function identifier.
        function_id: String,
        /// Error raised.
        error: FunctionError,
    },

    /// A function declined to produce the requested output.
    #[error("function {function_id} cannot produce the requested output")]
    RequirementsUnsatisfied {
        /// Function identifier.
        function_id: String,
    },

    /// One of a function's inputs could not be resolved.
    #[error("input {input} of {function_id} unresolved: {cause}")]
    InputUnresolved {
        /// Function identifier.
        function_id: String,
        /// The failing input.
        input: String,
        /// Why the input failed.
        cause: Box<FailureReason>,
    },

    /// Once inputs were known, the function's outputs no longer met the
    /// requirement.
    #[error("outputs of {function_id} no longer satisfy the requirement")]
    PropertyMismatch {
        /// Function identifier.
        function_id: String,
    },

    /// The requirement is already being resolved higher up the same path.
    #[error("recursive requirement {0}")]
    Recursion(String),

    /// Every candidate was tried and failed.
    #[error("all {} candidates failed", .0.len())]
    AllCandidatesFailed(Vec<FailureReason>),

    /// The graph refused the resolved nodes.
    #[error("graph rejected resolution: {0}")]
    Rejected(String),

    /// A collaborator panicked outside any function call.
    #[error("resolution panicked: {0}")]
    Panicked(String),

    /// The builder was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl FailureReason {
    /// True when the failure depends on the resolution path, so must not be
    /// remembered for the requirement.
    pub fn is_path_dependent(&self) -> bool {
        match self {
            Self::Recursion(_) | Self::Cancelled => true,
            Self::InputUnresolved { cause, .. } => cause.is_path_dependent(),
            Self::AllCandidatesFailed(reasons) => reasons.iter().any(Self::is_path_dependent),
            _ => false,
        }
    }

    pub(crate) fn from_candidates(mut failures: Vec<FailureReason>) -> Self {
        if failures.len() == 1 {
            if let Some(only) = failures.pop() {
                return only;
            }
        }
        Self::AllCandidatesFailed(failures)
    }
}

/// A function error together with the function that raised it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionFailure {
    /// Function identifier.
    pub function_id: String,
    /// Error raised.
    pub error: FunctionError,
}

impl fmt::Display for FunctionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.function_id, self.error)
    }
}

/// Unresolved requirements and function errors of one configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureReport {
    /// Calculation configuration name.
    pub calculation_configuration_name: String,
    /// Terminal requirements that failed, ordered by requirement.
    pub unresolved: Vec<(ValueRequirement, FailureReason)>,
    /// Distinct function errors with occurrence counts, most frequent first.
    pub exceptions: Vec<(FunctionFailure, usize)>,
}

impl FailureReport {
    /// True when nothing failed.
    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty() && self.exceptions.is_empty()
    }

    /// Number of unresolved terminal requirements.
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// Total function errors, counting repeats.
    pub fn exception_count(&self) -> usize {
        self.exceptions.iter().map(|(_, count)| count).sum()
    }

    /// Summary suitable for structured output.
    pub fn summary(&self) -> FailureSummary {
        FailureSummary {
            calculation_configuration_name: self.calculation_configuration_name.clone(),
            unresolved: self.unresolved_count(),
            distinct_exceptions: self.exceptions.len(),
            total_exceptions: self.exception_count(),
        }
    }
}

/// Counts from a [`FailureReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    /// Calculation configuration name.
    pub calculation_configuration_name: String,
    /// Unresolved terminal requirements.
    pub unresolved: usize,
    /// Distinct function errors.
    pub distinct_exceptions: usize,
    /// Function errors counting repeats.
    pub total_exceptions: usize,
}
