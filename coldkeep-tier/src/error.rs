//! Tier error types.
//!
//! This module defines the error types used throughout the coldkeep-tier
//! crate for storage, capture and transfer operations.

use thiserror::Error;

/// Result type for tier operations.
pub type TierResult<T> = Result<T, TierError>;

/// Errors that can occur during tier operations.
#[derive(Debug, Error)]
pub enum TierError {
    /// Object not found in storage.
    #[error("object not found: {key}")]
    NotFound {
        /// The object key that was not found.
        key: String,
    },

    /// Upload failed.
    #[error("upload failed for {key}: {message}")]
    UploadFailed {
        /// The object key or archive description.
        key: String,
        /// Error message.
        message: String,
    },

    /// Download failed.
    #[error("download failed for {key}: {message}")]
    DownloadFailed {
        /// The object key.
        key: String,
        /// Error message.
        message: String,
    },

    /// Stored content does not match what was written.
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        /// The object key.
        key: String,
        /// Expected value (size or digest).
        expected: String,
        /// Observed value.
        actual: String,
    },

    /// The capture command failed.
    #[error("capture failed on {target}: {message}")]
    Capture {
        /// Where the command ran (`local` or a host).
        target: String,
        /// Error message, including captured stderr.
        message: String,
    },

    /// Local scratch space is exhausted.
    #[error("no space left for scratch file in {dir}: {message}")]
    DiskFull {
        /// Scratch directory.
        dir: String,
        /// Error message.
        message: String,
    },

    /// The backend does not offer this operation.
    #[error("{operation} is not supported: {reason}")]
    Unsupported {
        /// The attempted operation.
        operation: &'static str,
        /// Why it is unavailable.
        reason: &'static str,
    },

    /// Client configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl TierError {
    /// Returns true if the error reports exhausted local disk space.
    #[must_use]
    pub const fn is_disk_full(&self) -> bool {
        matches!(self, Self::DiskFull { .. })
    }

    /// Builds an I/O error for `operation`.
    #[must_use]
    pub fn io(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Io {
            operation,
            message: err.to_string(),
        }
    }
}
