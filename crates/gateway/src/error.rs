use policy::{DenyReason, Operation, Principal};
use storage::RowKey;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The request was denied by row-level security. Terminal: callers must
    /// not retry through another path.
    #[error("access denied: {operation} on \"{table}\" as \"{principal}\" ({reason})")]
    AccessDenied {
        table: String,
        operation: Operation,
        principal: Principal,
        reason: DenyReason,
    },

    #[error("row \"{key}\" already exists in \"{table}\"")]
    DuplicateKey { table: String, key: RowKey },

    #[error("row \"{key}\" not found in \"{table}\"")]
    RowNotFound { table: String, key: RowKey },

    #[error("username already taken: {0}")]
    UsernameTaken(String),

    #[error("malformed row \"{key}\" in \"{table}\": {reason}")]
    MalformedRow {
        table: String,
        key: RowKey,
        reason: String,
    },

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Storage(#[from] storage::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
