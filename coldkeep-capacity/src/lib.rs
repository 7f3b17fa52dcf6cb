//! Coldkeep Capacity - sizing backups and keeping the hot tier under budget.
//!
//! # Estimation
//!
//! [`CapacityEstimator`] measures how large a site's backup will be, using
//! one of three [`EstimateMethod`]s. A measurement is then projected across a
//! fleet ([`FleetProjection`]), forward in time ([`growth_projection`]) and
//! into a monthly price ([`CostEstimate`]).
//!
//! # Monitoring
//!
//! [`CapacityMonitor`] samples utilization through a [`CapacityProbe`] and,
//! while it is above the [`CapacityThreshold`], migrates the oldest hot
//! objects to the cold tier. The loop is bounded by
//! [`MonitorConfig::max_iterations`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod estimator;
pub mod monitor;
mod probe;
mod projection;

pub use error::{CapacityError, CapacityResult, MonitorError};
pub use estimator::{
    CapacityEstimator, EstimateMethod, EstimateTarget, EstimatorConfig, SiteMeasurement,
};
pub use monitor::{CapacityMonitor, MonitorConfig, MonitorReport, PassSummary};
pub use probe::{
    parse_df, CapacityProbe, CapacityThreshold, DfProbe, HotUsageProbe, ScriptedProbe,
    StorageCapacitySample,
};
pub use projection::{
    growth_projection, CapacityEstimate, CostEstimate, FleetProjection, GrowthProjection,
};
