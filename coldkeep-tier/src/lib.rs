//! Coldkeep Tier - hot/cold storage backends and streaming backup transfer.
//!
//! This crate moves backup streams into two storage tiers: an S3-compatible
//! hot tier that receives the live capture stream, and an archival vault
//! that receives a staged, tree-hashed copy.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Deterministic testing**: simulated backends with seeded fault injection
//! - **Explicit limits**: bounded fan-out buffers and multipart part sizes
//! - **Assertions**: pre/post-conditions on storage operations
//! - **No unsafe code**: Safety > Performance
//!
//! # Storage Backends
//!
//! Hot tier ([`ObjectStorage`]):
//! - [`SimulatedObjectStorage`]: in-memory storage with fault injection
//! - [`FilesystemObjectStorage`]: local directory tree
//! - `S3ObjectStorage`: S3 and compatible services (behind `s3` feature)
//!
//! Cold tier ([`ArchiveVault`]):
//! - [`SimulatedArchiveVault`]: in-memory vault that verifies tree hashes
//! - `GlacierVault`: Glacier vaults (behind `glacier` feature)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use coldkeep_tier::{
//!     CaptureSpec, LocalRunner, SimulatedArchiveVault, SimulatedObjectStorage,
//!     StorageClients, StreamingTransfer, TransferConfig,
//! };
//!
//! let clients = StorageClients::new(Arc::new(SimulatedObjectStorage::new(42)))
//!     .with_cold(Arc::new(SimulatedArchiveVault::new("cold", 42)));
//! let transfer = StreamingTransfer::new(Arc::new(LocalRunner), TransferConfig::default());
//!
//! let outcome = transfer
//!     .run(
//!         &CaptureSpec::tar_directory("/var/www", true),
//!         &clients.hot_sink(key),
//!         clients.cold_sink("web").as_ref(),
//!     )
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod capture;
mod clients;
mod dice;
mod error;
mod fanout;
mod filesystem;
#[cfg(feature = "glacier")]
mod glacier;
#[cfg(feature = "s3")]
mod s3;
mod scratch;
#[cfg(any(feature = "s3", feature = "glacier"))]
mod sdk;
mod selftest;
mod storage;
mod transfer;
pub mod tree_hash;
mod vault;

pub use capture::{
    classify_exit, shell_quote, CaptureExit, CaptureSpec, CommandOutput, CommandRunner,
    LocalRunner, SshRunner, BENIGN_CAPTURE_DIAGNOSTICS,
};
pub use clients::StorageClients;
pub use error::{TierError, TierResult};
pub use fanout::{Fanout, FanoutStats};
pub use filesystem::{FilesystemConfig, FilesystemObjectStorage};
#[cfg(feature = "glacier")]
pub use glacier::{GlacierConfig, GlacierVault};
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ConfigError, S3ObjectStorage, S3StorageClass};
pub use scratch::{ScratchSpace, StagedArchive};
#[cfg(any(feature = "s3", feature = "glacier"))]
pub use sdk::AwsCredentials;
pub use selftest::{self_test, vault_self_test, SelfTestReport, SELF_TEST_BYTES_DEFAULT};
pub use storage::{
    ByteReader, FaultConfigGuard, ObjectStorage, ObjectStorageFaultConfig, SimulatedObjectStorage,
};
pub use transfer::{
    BackupJob, ColdSink, HotSink, MigrationOutcome, StreamingTransfer, TransferConfig,
    TransferOutcome,
};
pub use tree_hash::{TreeDigest, TreeHasher};
pub use vault::{ArchiveId, ArchiveVault, SimulatedArchive, SimulatedArchiveVault, VaultFaultConfig};
