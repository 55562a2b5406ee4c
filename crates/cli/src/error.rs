//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `init` would overwrite an existing config file.
    #[error("config already exists at {path}. Pass --force to overwrite")]
    ConfigExists { path: PathBuf },

    /// A row argument was not a JSON object.
    #[error("{what} must be a JSON object: {reason}")]
    InvalidRow { what: &'static str, reason: String },

    /// Configuration is invalid or missing required fields.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the gateway layer.
    #[error(transparent)]
    Gateway(#[from] gateway::Error),

    /// An error occurred in the storage layer.
    #[error(transparent)]
    Storage(#[from] storage::Error),

    /// An error occurred in the policy layer.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
