//! Retention error types.

use thiserror::Error;

/// Result type for retention operations.
pub type RetentionResult<T> = Result<T, RetentionError>;

/// Errors produced while parsing ranges or selecting objects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetentionError {
    /// A numeric range string could not be accepted.
    #[error("invalid range '{input}': {reason}")]
    InvalidRange {
        /// The range as given.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The range starts past the end of the object list.
    #[error("range start {start} exceeds the {len} available objects")]
    StartOutOfRange {
        /// Requested 1-based start position.
        start: usize,
        /// Number of objects available.
        len: usize,
    },

    /// A date or timestamp could not be parsed.
    #[error("invalid date '{input}': expected YYYY-MM-DD or RFC 3339")]
    InvalidDate {
        /// The date as given.
        input: String,
    },

    /// A date range ends before it starts.
    #[error("date range end {end} is before start {start}")]
    InvertedDateRange {
        /// Start as given.
        start: String,
        /// End as given.
        end: String,
    },

    /// A retention policy parameter is invalid.
    #[error("invalid retention policy: {reason}")]
    InvalidPolicy {
        /// Why the policy was rejected.
        reason: String,
    },
}
