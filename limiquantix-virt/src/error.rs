//! Error types for the libvirt client core.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The native error state captured right after a failing call.
///
/// `code` and `domain` are forwarded verbatim from the native layer
/// (`virErrorNumber` and `virErrorDomain` for libvirt), so callers can tell
/// error classes apart without this crate defining codes of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Native error number
    pub code: i32,
    /// Native error domain (the subsystem that raised it)
    pub domain: i32,
    /// Human-readable message
    pub message: String,
}

impl ErrorRecord {
    /// Message used when the native layer had nothing recorded.
    pub const NO_ERROR_MESSAGE: &'static str = "no error recorded";

    pub fn new(code: i32, domain: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            domain,
            message: message.into(),
        }
    }

    /// The zeroed record returned when the error slot is empty.
    pub fn none() -> Self {
        Self::new(0, 0, Self::NO_ERROR_MESSAGE)
    }

    /// Whether this record carries an actual native error.
    pub fn is_set(&self) -> bool {
        self.code != 0 || self.domain != 0
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Code-{}] [Domain-{}] {}", self.code, self.domain, self.message)
    }
}

/// Errors that can occur during libvirt client operations.
#[derive(Error, Debug)]
pub enum VirtError {
    /// Failed to open a connection.
    #[error("Failed to open connection to {uri}: {record}")]
    OpenFailed { uri: String, record: ErrorRecord },

    /// Failed to close a connection.
    #[error("Failed to close connection: {0}")]
    CloseFailed(ErrorRecord),

    /// A host or domain query failed.
    #[error("Failed to query {what}: {record}")]
    QueryFailed { what: &'static str, record: ErrorRecord },

    /// Listing domains failed.
    #[error("Failed to list {what}: {record}")]
    ListFailed { what: &'static str, record: ErrorRecord },

    /// Domain lookup found nothing.
    #[error("Domain not found: {key}: {record}")]
    NotFound { key: String, record: ErrorRecord },

    /// Snapshot creation failed.
    #[error("Snapshot operation failed: {0}")]
    SnapshotFailed(ErrorRecord),

    /// Saving domain state failed.
    #[error("Failed to save domain to {path}: {record}")]
    SaveFailed { path: String, record: ErrorRecord },

    /// Restoring domain state failed.
    #[error("Failed to restore domain from {path}: {record}")]
    RestoreFailed { path: String, record: ErrorRecord },

    /// An argument could not be marshalled for the native layer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The native layer returned a result that breaks its own contract.
    #[error("Invalid response from native layer: {0}")]
    InvalidResponse(String),
}

impl VirtError {
    /// The native error record carried by this error, if any.
    pub fn record(&self) -> Option<&ErrorRecord> {
        match self {
            Self::OpenFailed { record, .. }
            | Self::QueryFailed { record, .. }
            | Self::ListFailed { record, .. }
            | Self::NotFound { record, .. }
            | Self::SaveFailed { record, .. }
            | Self::RestoreFailed { record, .. } => Some(record),
            Self::CloseFailed(record) | Self::SnapshotFailed(record) => Some(record),
            Self::InvalidArgument(_) | Self::InvalidResponse(_) => None,
        }
    }
}

/// Result type alias for libvirt client operations.
pub type Result<T> = std::result::Result<T, VirtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_display_includes_code_and_domain() {
        let record = ErrorRecord::new(42, 12, "Domain not found: no domain with matching name 'web'");
        assert_eq!(
            record.to_string(),
            "[Code-42] [Domain-12] Domain not found: no domain with matching name 'web'"
        );
    }

    #[test]
    fn test_none_record_is_not_set() {
        let record = ErrorRecord::none();
        assert!(!record.is_set());
        assert_eq!(record.message, ErrorRecord::NO_ERROR_MESSAGE);
        assert!(ErrorRecord::new(1, 0, "x").is_set());
    }

    #[test]
    fn test_error_exposes_record() {
        let err = VirtError::NotFound {
            key: "web".to_string(),
            record: ErrorRecord::new(42, 12, "no domain"),
        };
        assert_eq!(err.record().map(|r| r.code), Some(42));
        assert!(err.to_string().contains("[Code-42] [Domain-12]"));

        let err = VirtError::InvalidArgument("nul byte".to_string());
        assert!(err.record().is_none());
    }
}
