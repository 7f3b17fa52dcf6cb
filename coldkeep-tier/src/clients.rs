//! Storage clients for one command invocation.

use std::sync::Arc;

use coldkeep_core::ObjectKey;

use crate::error::{TierError, TierResult};
use crate::storage::ObjectStorage;
use crate::transfer::{ColdSink, HotSink};
use crate::vault::ArchiveVault;

/// Hot and optional cold backends, constructed once and passed explicitly to
/// every component that needs them.
#[derive(Clone)]
pub struct StorageClients {
    hot: Arc<dyn ObjectStorage>,
    cold: Option<Arc<dyn ArchiveVault>>,
}

impl StorageClients {
    /// Creates clients with only a hot tier.
    #[must_use]
    pub fn new(hot: Arc<dyn ObjectStorage>) -> Self {
        Self { hot, cold: None }
    }

    /// Adds a cold tier.
    #[must_use]
    pub fn with_cold(mut self, cold: Arc<dyn ArchiveVault>) -> Self {
        self.cold = Some(cold);
        self
    }

    /// Hot-tier backend.
    #[must_use]
    pub fn hot(&self) -> &dyn ObjectStorage {
        self.hot.as_ref()
    }

    /// Shared handle to the hot-tier backend.
    #[must_use]
    pub fn hot_shared(&self) -> Arc<dyn ObjectStorage> {
        Arc::clone(&self.hot)
    }

    /// Cold-tier backend, if configured.
    #[must_use]
    pub fn cold(&self) -> Option<&dyn ArchiveVault> {
        self.cold.as_deref()
    }

    /// Cold-tier backend.
    ///
    /// # Errors
    ///
    /// Returns [`TierError::Config`] if no cold tier is configured.
    pub fn require_cold(&self) -> TierResult<&dyn ArchiveVault> {
        self.cold().ok_or_else(|| TierError::Config {
            message: "no cold tier configured (set a vault name)".to_string(),
        })
    }

    /// Builds a hot sink writing `key`.
    #[must_use]
    pub fn hot_sink(&self, key: ObjectKey) -> HotSink {
        HotSink {
            storage: Arc::clone(&self.hot),
            key,
        }
    }

    /// Builds a cold sink, if a cold tier is configured.
    #[must_use]
    pub fn cold_sink(&self, description: impl Into<String>) -> Option<ColdSink> {
        self.cold.as_ref().map(|vault| ColdSink {
            vault: Arc::clone(vault),
            description: description.into(),
        })
    }
}
