//! Error types for AxonDB
//!
//! One unified error enum shared by every layer. We use `thiserror` for
//! automatic `Display` and `Error` trait implementations.
//!
//! Error categories:
//! - **Not found**: key / space / vector id / user doesn't exist
//! - **Validation**: bad dimension, descriptor, metric, or input
//! - **Authn/Authz**: login failure, permission denied
//! - **Storage**: I/O failures, short writes, corruption
//! - **Lifecycle**: operation against a closed engine

use std::io;
use thiserror::Error;

/// Result type alias for AxonDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all AxonDB operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Data integrity failure (index/data divergence, bad checksum)
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Key not found in a key-value space
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Key exists only as a tombstone
    #[error("key is deleted: {0}")]
    KeyDeleted(String),

    /// Space not registered
    #[error("space not found: {0}")]
    SpaceNotFound(String),

    /// Space name already taken
    #[error("space already exists: {0}")]
    SpaceExists(String),

    /// Vector id not present in the collection
    #[error("vector id not found: {0}")]
    VectorNotFound(i64),

    /// Vector length differs from the space dimension
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Configured dimension
        expected: usize,
        /// Length actually supplied
        got: usize,
    },

    /// Index descriptor failed to parse or validate
    #[error("invalid index descriptor: {0}")]
    InvalidDescriptor(String),

    /// Unrecognized distance metric
    #[error("invalid distance metric: {0}")]
    InvalidMetric(String),

    /// Invalid request parameter
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Login failure (unknown user or bad password)
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Caller's role does not cover the command
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// User not in the auth store
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Username already taken
    #[error("user already exists: {0}")]
    UserExists(String),

    /// Operation against an engine that has been closed
    #[error("engine closed")]
    Closed,

    /// Low-level storage failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// Check if this is a "not found" type error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::KeyNotFound(_)
                | Error::SpaceNotFound(_)
                | Error::VectorNotFound(_)
                | Error::UserNotFound(_)
        )
    }

    /// Check if this is a validation error (bad input, don't retry)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. }
                | Error::InvalidDescriptor(_)
                | Error::InvalidMetric(_)
                | Error::InvalidInput(_)
        )
    }

    /// Check if this error indicates possible data loss or a bug
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_display_dimension_mismatch() {
        let err = Error::DimensionMismatch {
            expected: 128,
            got: 64,
        };
        let msg = err.to_string();
        assert!(msg.contains("128"));
        assert!(msg.contains("64"));
    }

    #[test]
    fn test_classification() {
        assert!(Error::KeyNotFound("k".into()).is_not_found());
        assert!(Error::SpaceNotFound("s".into()).is_not_found());
        assert!(!Error::Closed.is_not_found());

        assert!(Error::InvalidInput("bad".into()).is_validation());
        assert!(!Error::KeyNotFound("k".into()).is_validation());

        assert!(Error::Corruption("crc".into()).is_serious());
        assert!(!Error::KeyDeleted("k".into()).is_serious());
    }

    #[test]
    fn test_from_serde_json() {
        let bad: std::result::Result<String, _> = serde_json::from_str("{nope");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
