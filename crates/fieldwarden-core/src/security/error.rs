//! Security-specific error types.

use thiserror::Error;

/// Errors raised while resolving roles, fields, or policy configuration.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The principal carries no recognised role marker.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The requested field is not present in the policy registry.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The policy table violates a registry invariant.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// IO error while reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed policy document.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors raised by the audit trail.
///
/// Audit failures are reported to the caller and never alter an access
/// decision that has already been computed.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink refused or could not accept the write.
    #[error("audit sink unavailable: {0}")]
    SinkUnavailable(String),

    /// IO error writing or reading an audit file.
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error from the embedded audit store.
    #[error("audit storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Entry could not be encoded or decoded.
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hash chain verification failed at the given sequence number.
    #[error("audit chain broken at sequence {sequence}: {reason}")]
    ChainBroken {
        /// Sequence number of the first entry that failed verification.
        sequence: u64,
        /// What did not match.
        reason: String,
    },
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
