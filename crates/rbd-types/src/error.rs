//! Error types for the dynamics engine.

use thiserror::Error;

/// Errors that can occur while stepping a simulation.
///
/// The variants fall into four families with different handling policies:
///
/// - **Precondition violations** ([`InvalidTimestep`](Self::InvalidTimestep),
///   [`DimensionMismatch`](Self::DimensionMismatch),
///   [`InvalidArgument`](Self::InvalidArgument), the invalid-id variants) -
///   reported to the caller, never silently coerced.
/// - **Unsupported operations** ([`Unsupported`](Self::Unsupported)) - the
///   requested operation is undefined for the chosen stepper variant.
/// - **Numerical degeneracy** ([`Degenerate`](Self::Degenerate)) - only
///   surfaced where no defined fallback value exists; geometry helpers
///   otherwise log and fall back.
/// - **Logic errors** ([`LogicError`](Self::LogicError)) - internal misuse
///   such as popping an empty heap, distinct from bad caller arguments.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RbdError {
    /// Invalid body handle.
    #[error("invalid body ID: {0}")]
    InvalidBodyId(u32),

    /// Invalid joint handle.
    #[error("invalid joint ID: {0}")]
    InvalidJointId(u32),

    /// Invalid edge handle.
    #[error("invalid edge ID: {0}")]
    InvalidEdgeId(u32),

    /// Negative or non-finite time step.
    #[error("invalid timestep: {0} (must be non-negative and finite)")]
    InvalidTimestep(f64),

    /// Mismatched vector or matrix dimensions.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A precondition on an argument was violated.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the violated precondition.
        reason: String,
    },

    /// Operation undefined for this stepper or solver variant.
    #[error("{operation} is not supported by {variant}")]
    Unsupported {
        /// The operation that was requested.
        operation: String,
        /// The variant it was requested on.
        variant: String,
    },

    /// Numerical degeneracy with no defined fallback.
    #[error("numerical degeneracy: {reason}")]
    Degenerate {
        /// Description of the degeneracy.
        reason: String,
    },

    /// Internal misuse of a data structure.
    #[error("logic error: {reason}")]
    LogicError {
        /// Description of the misuse.
        reason: String,
    },
}

impl RbdError {
    /// Create an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an unsupported-operation error.
    #[must_use]
    pub fn unsupported(operation: impl Into<String>, variant: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            variant: variant.into(),
        }
    }

    /// Create a degeneracy error.
    #[must_use]
    pub fn degenerate(reason: impl Into<String>) -> Self {
        Self::Degenerate {
            reason: reason.into(),
        }
    }

    /// Create a logic error.
    #[must_use]
    pub fn logic(reason: impl Into<String>) -> Self {
        Self::LogicError {
            reason: reason.into(),
        }
    }

    /// Check if this is a precondition violation.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidBodyId(_)
                | Self::InvalidJointId(_)
                | Self::InvalidEdgeId(_)
                | Self::InvalidTimestep(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidArgument { .. }
        )
    }

    /// Check if this is an unsupported-operation error.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Check if this is a logic error.
    #[must_use]
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Self::LogicError { .. })
    }
}
