use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LrsError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Malformed statement, manifest, actor or state request. Nothing was persisted.
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Version mismatch on a state write, or a statement id re-used with different content.
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl LrsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LrsError::ValidationError(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        LrsError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        LrsError::Conflict(msg.into())
    }

    /// Short machine-readable kind used in CLI envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            LrsError::ValidationError(_) => "validation",
            LrsError::NotFound(_) => "not_found",
            LrsError::Conflict(_) => "conflict",
            LrsError::ConfigError(_) => "config",
            _ => "internal",
        }
    }
}

pub type LrsResult<T> = Result<T, LrsError>;
