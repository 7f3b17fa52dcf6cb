//! Error types for coldkeep core operations.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! No silent failures, no ignored errors.

use std::fmt;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or interpreting keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A key component was rejected.
    InvalidKeyComponent {
        /// Which component (`site`, `label`, `extension`).
        component: &'static str,
        /// The offending value.
        value: String,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyComponent {
                component,
                value,
                reason,
            } => {
                write!(f, "invalid key {component} '{value}': {reason}")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidKeyComponent {
            component: "site",
            value: "a/b".to_string(),
            reason: "must not contain '/'",
        };
        assert_eq!(
            format!("{err}"),
            "invalid key site 'a/b': must not contain '/'"
        );
    }
}
