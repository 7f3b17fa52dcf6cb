//! Capacity error types.

use coldkeep_tier::TierError;
use thiserror::Error;

/// Result type for probing and estimation.
pub type CapacityResult<T> = Result<T, CapacityError>;

/// Errors produced while probing or estimating capacity.
#[derive(Debug, Error)]
pub enum CapacityError {
    /// A command ran but its output could not be understood.
    #[error("could not parse {command} output: {reason}")]
    Parse {
        /// Command whose output was rejected.
        command: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// An argument is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The command transport or a storage backend failed.
    #[error(transparent)]
    Tier(#[from] TierError),
}

/// Errors that stop the capacity monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The pass bound ran out with utilization still above the threshold.
    #[error(
        "capacity still at {used_percent:.1}% (threshold {threshold:.1}%) after {iterations} passes"
    )]
    BoundExceeded {
        /// Number of passes performed.
        iterations: u32,
        /// Utilization at the last sample.
        used_percent: f64,
        /// Configured threshold.
        threshold: f64,
    },

    /// Utilization is above the threshold but nothing under the prefix can
    /// be moved.
    #[error("capacity at {used_percent:.1}% but no objects under '{prefix}' to relieve it")]
    NothingToRelieve {
        /// Monitored key prefix.
        prefix: String,
        /// Utilization at the last sample.
        used_percent: f64,
    },

    /// Sampling failed.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Listing, migration or deletion failed outright.
    #[error(transparent)]
    Tier(#[from] TierError),
}
