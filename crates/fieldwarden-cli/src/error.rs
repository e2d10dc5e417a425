//! CLI error types.

use fieldwarden_core::security::{AuditError, SecurityError};
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Policy or role configuration error.
    #[error("policy error: {0}")]
    Security(#[from] SecurityError),

    /// Audit trail error.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// Audit store could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Malformed input document.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;
