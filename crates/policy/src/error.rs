//! Policy error types.

use thiserror::Error;

/// Policy errors.
///
/// An authorization *denial* is not an error: it is reported as
/// [`Decision::Deny`](crate::Decision). These variants cover administrative
/// misuse and faults.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The referenced table was never registered.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A policy with this name already exists on the table.
    #[error("policy \"{name}\" already exists on table \"{table}\"")]
    DuplicatePolicyName { table: String, name: String },

    /// No policy with this name exists on the table.
    #[error("policy \"{name}\" not found on table \"{table}\"")]
    PolicyNotFound { table: String, name: String },

    /// A predicate expression failed to parse or compile.
    #[error("invalid predicate `{expr}`: {reason}")]
    InvalidPredicate { expr: String, reason: String },

    /// A predicate failed while evaluating a row.
    #[error("predicate of policy \"{policy}\" failed: {reason}")]
    PredicateEvaluation { policy: String, reason: String },

    /// The policy configuration is invalid.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// Failed to parse a manifest file.
    #[error("failed to parse manifest: {0}")]
    Parse(String),

    /// An I/O error occurred while reading a manifest.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catalog lock was poisoned by a panicking writer.
    #[error("catalog lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
