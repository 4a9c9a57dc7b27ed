//! Custom error types for dbvault
//!
//! This module defines the error hierarchy for backup and restore operations
//! using thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for dbvault operations
#[derive(Error, Debug)]
pub enum VaultError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Directory or file access errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Artifact name rejected by the path guard
    #[error("Invalid backup name: {0}")]
    InvalidName(String),

    /// Artifact missing from the store
    #[error("Backup not found: {0}")]
    NotFound(String),

    /// The dump utility failed, timed out, or produced no output
    #[error("Backup failed: {reason}")]
    DumpFailed {
        reason: String,
        stderr_tail: String,
    },

    /// The restore utility failed or timed out
    #[error("Restore failed: {reason}")]
    RestoreFailed {
        reason: String,
        stderr_tail: String,
    },

    /// Restore requested without an explicit `true` confirmation
    #[error("Restore requires explicit confirmation")]
    ConfirmationRequired,

    /// Another create/restore holds the operation lock
    #[error("Operation in progress: {0}")]
    Rejected(String),
}

impl VaultError {
    /// Create an invalid-name error
    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }

    /// Create a "not found" error for an artifact
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error came from lock contention
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Captured stderr of a failed subprocess, if any
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::DumpFailed { stderr_tail, .. } | Self::RestoreFailed { stderr_tail, .. } => {
                Some(stderr_tail.as_str())
            }
            _ => None,
        }
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for dbvault operations
pub type VaultResult<T> = Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = VaultError::not_found("backup-20250101-020000-000.sql");
        assert_eq!(
            err.to_string(),
            "Backup not found: backup-20250101-020000-000.sql"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dump_failed_carries_diagnostics() {
        let err = VaultError::DumpFailed {
            reason: "exit status 1".into(),
            stderr_tail: "pg_dump: connection refused".into(),
        };
        assert_eq!(err.to_string(), "Backup failed: exit status 1");
        assert_eq!(err.diagnostics(), Some("pg_dump: connection refused"));
        assert!(VaultError::ConfirmationRequired.diagnostics().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let vault_err: VaultError = io_err.into();
        assert!(matches!(vault_err, VaultError::Io(_)));
    }
}
