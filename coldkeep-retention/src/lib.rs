//! Coldkeep Retention - selection of backups to keep, delete or migrate.
//!
//! Every function in this crate is pure: it takes an in-memory list of
//! [`StorageObject`]s and returns the selected subset. No I/O happens here;
//! callers list objects from a tier, select, then act on the selection.
//!
//! All selectors establish their own order first (newest first by
//! `last_modified`, ties broken by key), so the result never depends on the
//! order of the input list.
//!
//! # Selectors
//!
//! - [`simple_overwrite`]: keep the `N` most recent objects
//! - [`smart_tiered`]: daily/weekly/monthly quotas with anchor days
//! - [`by_numeric_range`]: 1-based positions in newest-first order
//! - [`by_date_range`]: inclusive modification-time window
//! - [`oldest_percent`]: oldest fraction of a population (capacity relief)
//! - [`by_prefix`]: key prefix match
//!
//! [`StorageObject`]: coldkeep_core::StorageObject

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod policy;
mod range;
mod select;

pub use error::{RetentionError, RetentionResult};
pub use policy::{RetentionPolicy, RetentionTier, SmartTieredPolicy};
pub use range::{DateRange, NumericRange};
pub use select::{
    by_date_range, by_numeric_range, by_prefix, oldest_percent, simple_overwrite, smart_tiered,
    smart_tiered_plan, sorted_newest_first, TieredPlan,
};
