use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock guarding store state was poisoned by a panicking writer.
    #[error("row store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;
