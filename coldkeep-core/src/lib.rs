//! Coldkeep Core - Strongly-typed keys, storage objects and limits.
//!
//! This crate provides the types shared by every coldkeep component. It does
//! NOT talk to any storage backend; it only describes what lives there.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed keys**: `ObjectKey` instead of bare strings
//! - **Explicit limits**: Every buffer and loop has a bounded maximum
//! - **Sortable layout**: Key order and chronological order agree
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod limits;
mod types;

pub use error::{Error, Result};
pub use types::{ObjectKey, StorageObject, KEY_TIMESTAMP_FORMAT};
