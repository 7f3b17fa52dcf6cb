//! Coldkeep Tests - cross-crate simulation and integration tests.
//!
//! Unit tests live next to the code they cover. This crate exercises the
//! crates together against simulated backends with deterministic faults,
//! the filesystem hot tier and real local capture processes.
//!
//! ## Test Organization
//!
//! **Simulation Tests** (`*_dst.rs`): seeded fault injection
//! - `monitor_dst`: capacity monitor against flaky vaults across many seeds
//!
//! **Integration Tests** (`*_tests.rs`): multi-component flows
//! - `backup_tests`: capture, hot and cold writes, listing
//! - `monitor_tests`: threshold relief against simulated and filesystem tiers
//! - `retention_tests`: selection and pruning across sites and series
//!
//! **Support Modules**:
//! - `scenarios`: backup histories, seeds and fixtures shared by the tests
//!
//! ## Naming Conventions
//!
//! - Simulation tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod scenarios;

#[cfg(test)]
mod monitor_dst;

#[cfg(test)]
mod monitor_tests;
