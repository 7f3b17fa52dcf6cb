//! Cold-tier archive vault abstraction.
//!
//! A vault accepts immutable archives and hands back an opaque id. Uploads
//! come from a [`StagedArchive`] so the body is seekable and its length and
//! digests are known before the request is signed.
//!
//! Vault inventories are produced by asynchronous jobs, so listing is not
//! available synchronously; [`ArchiveVault::list_archives`] reports
//! [`TierError::Unsupported`] unless a backend overrides it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dice::SeededDice;
use crate::error::{TierError, TierResult};
use crate::scratch::StagedArchive;
use crate::tree_hash::tree_hash;

/// Opaque identifier assigned by the vault to an uploaded archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveId(String);

impl ArchiveId {
    /// Wraps a vault-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -----------------------------------------------------------------------------
// ArchiveVault Trait
// -----------------------------------------------------------------------------

/// Cold-tier archive backend.
#[async_trait]
pub trait ArchiveVault: Send + Sync {
    /// Vault name, for logs and reports.
    fn name(&self) -> &str;

    /// Describes the vault and creates it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault can neither be described nor created.
    async fn ensure_vault(&self) -> TierResult<()>;

    /// Uploads a staged archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails or the vault rejects the digest.
    async fn upload_archive(
        &self,
        archive: &StagedArchive,
        description: &str,
    ) -> TierResult<ArchiveId>;

    /// Deletes an archive.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    async fn delete_archive(&self, id: &ArchiveId) -> TierResult<()>;

    /// Lists archives.
    ///
    /// # Errors
    ///
    /// Always [`TierError::Unsupported`] by default.
    async fn list_archives(&self) -> TierResult<Vec<ArchiveId>> {
        Err(TierError::Unsupported {
            operation: "list_archives",
            reason: "vault inventory is only available through asynchronous jobs",
        })
    }
}

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault injection for [`SimulatedArchiveVault`].
#[derive(Debug, Clone, Default)]
pub struct VaultFaultConfig {
    /// Probability of an upload failing. Range: 0.0 - 1.0.
    pub upload_fail_rate: f64,
    /// If true, next upload will fail (one-shot).
    pub force_upload_fail: bool,
    /// If true, every operation fails until cleared.
    pub unreachable: bool,
}

impl VaultFaultConfig {
    /// Sets the upload failure rate.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_upload_fail_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.upload_fail_rate = rate;
        self
    }

    /// Forces the next upload to fail.
    #[must_use]
    pub const fn with_force_upload_fail(mut self) -> Self {
        self.force_upload_fail = true;
        self
    }

    /// Makes the vault unreachable.
    #[must_use]
    pub const fn with_unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

// -----------------------------------------------------------------------------
// SimulatedArchiveVault
// -----------------------------------------------------------------------------

/// An archive held by [`SimulatedArchiveVault`].
#[derive(Debug, Clone)]
pub struct SimulatedArchive {
    /// Description supplied at upload.
    pub description: String,
    /// Archive bytes.
    pub data: Vec<u8>,
    /// Tree hash supplied by the uploader.
    pub tree_hash: String,
}

#[derive(Debug, Default)]
struct VaultState {
    created: bool,
    archives: HashMap<ArchiveId, SimulatedArchive>,
}

/// In-memory vault for deterministic testing.
///
/// Uploads re-read the staged file and recompute its tree hash, rejecting
/// the archive when it disagrees with the uploader's digest, as the real
/// service does. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedArchiveVault {
    name: String,
    state: Arc<Mutex<VaultState>>,
    fault_config: Arc<Mutex<VaultFaultConfig>>,
    dice: SeededDice,
}

impl SimulatedArchiveVault {
    /// Creates an empty simulated vault.
    #[must_use]
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self::with_faults(name, seed, VaultFaultConfig::default())
    }

    /// Creates a simulated vault with fault injection enabled.
    #[must_use]
    pub fn with_faults(name: impl Into<String>, seed: u64, config: VaultFaultConfig) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(VaultState::default())),
            fault_config: Arc::new(Mutex::new(config)),
            dice: SeededDice::new(seed),
        }
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, VaultFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns the number of archives held.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn archive_count(&self) -> usize {
        self.state.lock().expect("vault lock poisoned").archives.len()
    }

    /// Returns a copy of an archive for inspection in tests.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn archive(&self, id: &ArchiveId) -> Option<SimulatedArchive> {
        self.state
            .lock()
            .expect("vault lock poisoned")
            .archives
            .get(id)
            .cloned()
    }

    /// Returns all archive descriptions, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn descriptions(&self) -> Vec<String> {
        let state = self.state.lock().expect("vault lock poisoned");
        let mut descriptions: Vec<_> = state
            .archives
            .values()
            .map(|a| a.description.clone())
            .collect();
        drop(state);
        descriptions.sort();
        descriptions
    }

    /// Returns true once [`ArchiveVault::ensure_vault`] has run.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.state.lock().expect("vault lock poisoned").created
    }

    fn check_reachable(&self, operation: &'static str) -> TierResult<()> {
        if self.fault_config().unreachable {
            return Err(TierError::Io {
                operation,
                message: format!("vault {} is unreachable (simulated)", self.name),
            });
        }
        Ok(())
    }
}

#[allow(clippy::significant_drop_tightening)]
#[async_trait]
impl ArchiveVault for SimulatedArchiveVault {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_vault(&self) -> TierResult<()> {
        self.check_reachable("ensure_vault")?;
        self.state.lock().expect("vault lock poisoned").created = true;
        Ok(())
    }

    async fn upload_archive(
        &self,
        archive: &StagedArchive,
        description: &str,
    ) -> TierResult<ArchiveId> {
        self.check_reachable("upload_archive")?;

        let (forced, rate) = {
            let mut config = self.fault_config();
            (std::mem::take(&mut config.force_upload_fail), config.upload_fail_rate)
        };
        if forced || self.dice.roll(rate) {
            return Err(TierError::UploadFailed {
                key: description.to_string(),
                message: "simulated vault upload failure".to_string(),
            });
        }

        let data = tokio::fs::read(archive.path())
            .await
            .map_err(|e| TierError::io("upload_archive", e))?;
        let digest = archive.digest();
        let actual = tree_hash(&data);
        if actual != digest.tree_hash || data.len() as u64 != digest.len {
            return Err(TierError::Integrity {
                key: description.to_string(),
                expected: digest.tree_hash.clone(),
                actual,
            });
        }

        let serial = self.dice.next_draw();
        let id = ArchiveId::new(format!("sim-{:016x}-{serial:08}", self.dice.seed()));
        let mut state = self.state.lock().expect("vault lock poisoned");
        state.archives.insert(
            id.clone(),
            SimulatedArchive {
                description: description.to_string(),
                data,
                tree_hash: digest.tree_hash.clone(),
            },
        );
        debug!(vault = %self.name, archive_id = %id, description, "Stored archive");
        Ok(id)
    }

    async fn delete_archive(&self, id: &ArchiveId) -> TierResult<()> {
        self.check_reachable("delete_archive")?;
        let mut state = self.state.lock().expect("vault lock poisoned");
        if state.archives.remove(id).is_none() {
            return Err(TierError::NotFound {
                key: id.to_string(),
            });
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
