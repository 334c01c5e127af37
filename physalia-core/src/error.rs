//! Structured error types for the Physalia ecosystem.

use thiserror::Error;

/// Unified error type for all Physalia operations.
#[derive(Debug, Error)]
pub enum PhysaliaError {
    /// An eigensolve, LU inversion, or log-space accumulation produced a
    /// non-real, NaN, or otherwise unusable value.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),

    /// A gapped alignment violated its structural contract (unequal row
    /// lengths, non-wildcard internal cell, wrong number of column roots).
    #[error("malformed alignment: {0}")]
    MalformedAlignment(String),

    /// An operation requiring a bifurcating node was invoked on a node
    /// with a different child count.
    #[error("non-binary node: {0}")]
    NonBinaryNode(String),

    /// The spanning step found no connecting edge despite unmerged sets.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// A never-expected internal state was reached.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Parse error (malformed input data)
    #[error("parse error: {0}")]
    Parse(String),
}

/// Convenience alias used throughout the Physalia ecosystem.
pub type Result<T> = std::result::Result<T, PhysaliaError>;
