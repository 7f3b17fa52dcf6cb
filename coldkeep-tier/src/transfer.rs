//! Capture-to-storage transfer.
//!
//! [`StreamingTransfer::run`] spawns a capture process and streams its
//! stdout into the hot tier. With a cold sink, the stream is fanned out: the
//! hot upload reads branch 0 directly while a background task stages branch 1
//! into a scratch file and, once the capture has exited successfully, uploads
//! it to the vault.
//!
//! Failure semantics:
//!
//! - hot failure is fatal: the capture is killed and the cold task aborted
//! - cold failure is recorded in the outcome and does not fail the transfer
//! - a non-zero capture exit is fatal unless its stderr carries a benign
//!   diagnostic, in which case it becomes a warning
//!
//! [`StreamingTransfer::migrate`] moves an existing hot object to the vault
//! without deleting it; the caller deletes once the outcome is known.

use std::path::PathBuf;
use std::sync::Arc;

use coldkeep_core::limits::FANOUT_BUFFER_BYTES_DEFAULT;
use coldkeep_core::{ObjectKey, StorageObject};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{classify_exit, CaptureExit, CaptureSpec, CommandRunner};
use crate::error::{TierError, TierResult};
use crate::fanout::{Fanout, FanoutStats};
use crate::scratch::{ScratchSpace, StagedArchive};
use crate::storage::{ByteReader, ObjectStorage};
use crate::vault::{ArchiveId, ArchiveVault};

// -----------------------------------------------------------------------------
// Sinks and Configuration
// -----------------------------------------------------------------------------

/// Hot-tier destination of a transfer.
#[derive(Clone)]
pub struct HotSink {
    /// Hot-tier backend.
    pub storage: Arc<dyn ObjectStorage>,
    /// Key to write.
    pub key: ObjectKey,
}

/// Cold-tier destination of a transfer.
#[derive(Clone)]
pub struct ColdSink {
    /// Vault backend.
    pub vault: Arc<dyn ArchiveVault>,
    /// Archive description stored with the upload.
    pub description: String,
}

/// Transfer tuning.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Buffer size of each fan-out pipe.
    pub fanout_buffer_bytes: usize,
    /// Where cold-tier archives are staged.
    pub scratch: ScratchSpace,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fanout_buffer_bytes: FANOUT_BUFFER_BYTES_DEFAULT,
            scratch: ScratchSpace::default(),
        }
    }
}

impl TransferConfig {
    /// Creates a configuration with small buffers staging into `dir`.
    #[must_use]
    pub fn for_testing(dir: impl Into<PathBuf>) -> Self {
        Self {
            fanout_buffer_bytes: 8 * 1024,
            scratch: ScratchSpace::new(dir),
        }
    }

    /// Sets the fan-out buffer size.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    #[must_use]
    pub fn with_fanout_buffer_bytes(mut self, bytes: usize) -> Self {
        assert!(bytes > 0, "fan-out buffer must not be empty");
        self.fanout_buffer_bytes = bytes;
        self
    }

    /// Sets the scratch directory.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = ScratchSpace::new(dir);
        self
    }
}

// -----------------------------------------------------------------------------
// Outcomes
// -----------------------------------------------------------------------------

/// Result of one capture-to-storage transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutcome {
    /// Bytes written to the hot tier.
    pub bytes_written: u64,
    /// Hot upload completed.
    pub hot_succeeded: bool,
    /// Cold upload completed. False when no cold sink was configured.
    pub cold_succeeded: bool,
    /// Vault id of the cold copy.
    pub cold_archive_id: Option<ArchiveId>,
    /// Cold-tier error, if any.
    pub error: Option<String>,
    /// Non-fatal capture diagnostics.
    pub warnings: Vec<String>,
}

/// Result of moving one hot object to the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// Migrated hot object.
    pub key: ObjectKey,
    /// Vault id of the archive.
    pub archive_id: ArchiveId,
    /// Archive length.
    pub bytes: u64,
    /// Tree hash sent to the vault.
    pub tree_hash: String,
}

/// One entry of a batch backup.
#[derive(Clone)]
pub struct BackupJob {
    /// Name reported back with the outcome (site or container).
    pub name: String,
    /// Capture to run.
    pub capture: CaptureSpec,
    /// Hot destination.
    pub hot: HotSink,
    /// Optional cold destination.
    pub cold: Option<ColdSink>,
}

// -----------------------------------------------------------------------------
// StreamingTransfer
// -----------------------------------------------------------------------------

type ColdTask = JoinHandle<TierResult<ArchiveId>>;

/// Runs captures and moves their output into the storage tiers.
pub struct StreamingTransfer {
    runner: Arc<dyn CommandRunner>,
    config: TransferConfig,
}

impl StreamingTransfer {
    /// Creates a transfer that runs captures through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, config: TransferConfig) -> Self {
        Self { runner, config }
    }

    /// Returns the transfer configuration.
    #[must_use]
    pub const fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Captures once and writes the stream to `hot`, and to `cold` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture cannot start, the hot upload fails,
    /// or the capture exits with a non-benign failure. Cold-tier failures
    /// are reported in the outcome instead.
    pub async fn run(
        &self,
        capture: &CaptureSpec,
        hot: &HotSink,
        cold: Option<&ColdSink>,
    ) -> TierResult<TransferOutcome> {
        let target = self.runner.target().to_string();
        let mut child = self.runner.spawn(&capture.script)?;

        let stdout = child.stdout.take().ok_or_else(|| TierError::Capture {
            target: target.clone(),
            message: "capture stdout was not piped".to_string(),
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| TierError::Capture {
            target: target.clone(),
            message: "capture stderr was not piped".to_string(),
        })?;
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let _ = stderr.read_to_end(&mut collected).await;
            String::from_utf8_lossy(&collected).into_owned()
        });

        info!(target_host = %target, key = %hot.key, cold = cold.is_some(), "Starting transfer");

        let (hot_result, pump, cold_task, capture_ok) = match cold {
            None => {
                let body: ByteReader = Box::new(stdout);
                (hot.storage.put_stream(&hot.key, body).await, None, None, None)
            }
            Some(cold) => {
                let (fanout, mut branches) = Fanout::new(2, self.config.fanout_buffer_bytes);
                let cold_reader = branches.pop().ok_or_else(|| TierError::io("fanout", "missing cold branch"))?;
                let hot_reader = branches.pop().ok_or_else(|| TierError::io("fanout", "missing hot branch"))?;

                let pump = tokio::spawn(fanout.pump(stdout));
                let (capture_ok_tx, capture_ok_rx) = oneshot::channel();
                let cold_task = self.spawn_cold(cold, cold_reader, capture_ok_rx);

                let body: ByteReader = Box::new(hot_reader);
                let result = hot.storage.put_stream(&hot.key, body).await;
                (result, Some(pump), Some(cold_task), Some(capture_ok_tx))
            }
        };

        let bytes_written = match hot_result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target_host = %target, key = %hot.key, error = %e, "Hot upload failed, killing capture");
                if let Some(pump) = pump {
                    pump.abort();
                }
                if let Some(cold_task) = cold_task {
                    cold_task.abort();
                }
                kill(&mut child).await;
                stderr_task.abort();
                return Err(e);
            }
        };

        let pump_stats = match pump {
            Some(pump) => Some(
                pump.await
                    .map_err(|e| TierError::io("fanout", e))?
                    .map_err(|e| TierError::Capture {
                        target: target.clone(),
                        message: format!("failed to read capture stream: {e}"),
                    })?,
            ),
            None => None,
        };

        let status = child.wait().await.map_err(|e| TierError::Capture {
            target: target.clone(),
            message: format!("failed to wait for capture: {e}"),
        })?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        let mut outcome = TransferOutcome {
            bytes_written,
            hot_succeeded: true,
            ..TransferOutcome::default()
        };

        match classify_exit(status.code(), &stderr_text) {
            CaptureExit::Clean => {}
            CaptureExit::Benign(line) => {
                warn!(target_host = %target, key = %hot.key, diagnostic = %line, "Capture finished with warnings");
                outcome.warnings.push(line);
            }
            CaptureExit::Failed(message) => {
                if let Some(cold_task) = cold_task {
                    cold_task.abort();
                }
                if let Err(e) = hot.storage.delete(&hot.key).await {
                    warn!(key = %hot.key, error = %e, "Failed to remove partial hot object");
                }
                return Err(TierError::Capture { target, message });
            }
        }

        if let (Some(cold_task), Some(capture_ok)) = (cold_task, capture_ok) {
            let _ = capture_ok.send(());
            let detached = pump_stats.as_ref().is_some_and(|s: &FanoutStats| !s.detached.is_empty());

            match cold_task.await {
                Ok(Ok(archive_id)) => {
                    outcome.cold_succeeded = true;
                    outcome.cold_archive_id = Some(archive_id);
                }
                Ok(Err(e)) => {
                    warn!(key = %hot.key, error = %e, detached, "Cold upload failed");
                    outcome.error = Some(e.to_string());
                }
                Err(e) => {
                    warn!(key = %hot.key, error = %e, "Cold task did not complete");
                    outcome.error = Some(format!("cold task did not complete: {e}"));
                }
            }
        }

        info!(
            key = %hot.key,
            bytes = outcome.bytes_written,
            cold_succeeded = outcome.cold_succeeded,
            warnings = outcome.warnings.len(),
            "Transfer complete"
        );
        Ok(outcome)
    }

    /// Stages the cold branch, waits for a clean capture, then uploads.
    fn spawn_cold(
        &self,
        cold: &ColdSink,
        reader: tokio::io::DuplexStream,
        capture_ok: oneshot::Receiver<()>,
    ) -> ColdTask {
        let scratch = self.config.scratch.clone();
        let vault = Arc::clone(&cold.vault);
        let description = cold.description.clone();

        tokio::spawn(async move {
            let staged = scratch.stage(reader).await?;
            capture_ok.await.map_err(|_| TierError::Capture {
                target: description.clone(),
                message: "capture did not complete".to_string(),
            })?;
            vault.upload_archive(&staged, &description).await
        })
    }

    /// Copies one hot object into the vault. The hot object is not deleted.
    ///
    /// Scratch allocation recovers from one disk-full failure on its own;
    /// any further disk-full error is returned as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be read, staging fails, the
    /// staged size disagrees with the listed size, or the upload fails.
    pub async fn migrate(
        &self,
        hot: &dyn ObjectStorage,
        vault: &dyn ArchiveVault,
        object: &StorageObject,
    ) -> TierResult<MigrationOutcome> {
        let staged = self.stage_hot_object(hot, &object.key).await?;

        if staged.len() != object.size {
            return Err(TierError::Integrity {
                key: object.key.to_string(),
                expected: object.size.to_string(),
                actual: staged.len().to_string(),
            });
        }

        let archive_id = vault.upload_archive(&staged, object.key.as_str()).await?;
        info!(key = %object.key, archive_id = %archive_id, vault = vault.name(), "Migrated object");

        Ok(MigrationOutcome {
            key: object.key.clone(),
            archive_id,
            bytes: staged.len(),
            tree_hash: staged.digest().tree_hash.clone(),
        })
    }

    async fn stage_hot_object(
        &self,
        hot: &dyn ObjectStorage,
        key: &ObjectKey,
    ) -> TierResult<StagedArchive> {
        let reader = hot.get_stream(key).await?;
        self.config.scratch.stage(reader).await
    }

    /// Runs every job in order, collecting each outcome.
    ///
    /// A failed job never stops the batch.
    pub async fn backup_batch(
        &self,
        jobs: &[BackupJob],
    ) -> Vec<(String, TierResult<TransferOutcome>)> {
        let mut results = Vec::with_capacity(jobs.len());

        for job in jobs {
            let result = self.run(&job.capture, &job.hot, job.cold.as_ref()).await;
            if let Err(e) = &result {
                warn!(job = %job.name, error = %e, "Backup failed, continuing with next");
            }
            results.push((job.name.clone(), result));
        }

        results
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Capture already exited");
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LocalRunner;
    use crate::storage::{ObjectStorageFaultConfig, SimulatedObjectStorage};
    use crate::tree_hash::tree_hash;
    use crate::vault::{SimulatedArchiveVault, VaultFaultConfig};
    use bytes::Bytes;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        transfer: StreamingTransfer,
        hot: SimulatedObjectStorage,
        vault: SimulatedArchiveVault,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let transfer =
            StreamingTransfer::new(Arc::new(LocalRunner), TransferConfig::for_testing(dir.path()));
        Fixture {
            _dir: dir,
            transfer,
            hot: SimulatedObjectStorage::new(1),
            vault: SimulatedArchiveVault::new("cold", 1),
        }
    }

    fn hot_sink(storage: &SimulatedObjectStorage, key: &str) -> HotSink {
        HotSink {
            storage: Arc::new(storage.clone()),
            key: ObjectKey::new(key),
        }
    }

    fn cold_sink(vault: &SimulatedArchiveVault) -> ColdSink {
        ColdSink {
            vault: Arc::new(vault.clone()),
            description: "web/files".to_string(),
        }
    }

    #[tokio::test]
    async fn test_hot_only_transfer() {
        let f = fixture();
        let capture = CaptureSpec::new("printf 'hello world'");
        let hot = hot_sink(&f.hot, "web/files-20240101-000000.tar");

        let outcome = f.transfer.run(&capture, &hot, None).await.unwrap();
        assert_eq!(outcome.bytes_written, 11);
        assert!(outcome.hot_succeeded);
        assert!(!outcome.cold_succeeded);
        assert_eq!(f.hot.get_raw_content(&hot.key).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_dual_sink_transfer_writes_same_bytes() {
        let f = fixture();
        let capture = CaptureSpec::new("head -c 300000 /dev/zero");
        let hot = hot_sink(&f.hot, "web/files-20240101-000000.tar");
        let cold = cold_sink(&f.vault);

        let outcome = f.transfer.run(&capture, &hot, Some(&cold)).await.unwrap();
        assert_eq!(outcome.bytes_written, 300_000);
        assert!(outcome.cold_succeeded);

        let archive = f.vault.archive(outcome.cold_archive_id.as_ref().unwrap()).unwrap();
        assert_eq!(archive.data, f.hot.get_raw_content(&hot.key).unwrap());
        assert_eq!(archive.tree_hash, tree_hash(&vec![0u8; 300_000]));
    }

    #[tokio::test]
    async fn test_cold_failure_is_not_fatal() {
        let f = fixture();
        f.vault.fault_config().unreachable = true;
        let capture = CaptureSpec::new("printf data");
        let hot = hot_sink(&f.hot, "web/a.tar");

        let outcome = f
            .transfer
            .run(&capture, &hot, Some(&cold_sink(&f.vault)))
            .await
            .unwrap();
        assert!(outcome.hot_succeeded);
        assert!(!outcome.cold_succeeded);
        assert!(outcome.error.is_some());
        assert!(f.hot.contains(&hot.key));
    }

    #[tokio::test]
    async fn test_hot_failure_is_fatal() {
        let f = fixture();
        let hot_storage =
            SimulatedObjectStorage::with_faults(1, ObjectStorageFaultConfig::none().with_force_put_fail());
        let hot = hot_sink(&hot_storage, "web/a.tar");
        let capture = CaptureSpec::new("head -c 100000 /dev/zero");

        let result = f.transfer.run(&capture, &hot, Some(&cold_sink(&f.vault))).await;
        assert!(matches!(result, Err(TierError::UploadFailed { .. })));
        assert_eq!(f.vault.archive_count(), 0);
    }

    #[tokio::test]
    async fn test_benign_exit_becomes_warning() {
        let f = fixture();
        let capture =
            CaptureSpec::new("printf payload; echo 'tar: ./x: file changed as we read it' >&2; exit 1");
        let hot = hot_sink(&f.hot, "web/a.tar");

        let outcome = f.transfer.run(&capture, &hot, None).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("file changed as we read it"));
        assert!(f.hot.contains(&hot.key));
    }

    #[tokio::test]
    async fn test_failed_exit_removes_partial_object() {
        let f = fixture();
        let capture = CaptureSpec::new("printf partial; echo 'tar: cannot open' >&2; exit 2");
        let hot = hot_sink(&f.hot, "web/a.tar");

        let result = f.transfer.run(&capture, &hot, Some(&cold_sink(&f.vault))).await;
        assert!(matches!(result, Err(TierError::Capture { .. })));
        assert!(!f.hot.contains(&hot.key));
        assert_eq!(f.vault.archive_count(), 0);
    }

    #[tokio::test]
    async fn test_migrate_copies_without_deleting() {
        let f = fixture();
        let key = ObjectKey::new("web/files-20240101-000000.tar");
        f.hot.insert_object(&key, vec![5u8; 2048], Utc::now());
        let object = f.hot.list("web/").await.unwrap().remove(0);

        let outcome = f.transfer.migrate(&f.hot, &f.vault, &object).await.unwrap();
        assert_eq!(outcome.bytes, 2048);
        assert!(f.hot.contains(&key));
        assert_eq!(f.vault.archive(&outcome.archive_id).unwrap().description, key.as_str());
    }

    #[tokio::test]
    async fn test_migrate_detects_size_mismatch() {
        let f = fixture();
        let key = ObjectKey::new("web/a.tar");
        f.hot.put(&key, Bytes::from_static(b"abc")).await.unwrap();
        let object = StorageObject::new(key, 10, Utc::now());

        let result = f.transfer.migrate(&f.hot, &f.vault, &object).await;
        assert!(matches!(result, Err(TierError::Integrity { .. })));
        assert_eq!(f.vault.archive_count(), 0);
    }

    #[tokio::test]
    async fn test_migrate_recovers_from_one_disk_full() {
        let f = fixture();
        let key = ObjectKey::new("web/a.tar");
        f.hot.put(&key, Bytes::from_static(b"abc")).await.unwrap();
        let object = f.hot.list("web/").await.unwrap().remove(0);

        f.transfer.config().scratch.inject_disk_full(1);
        assert!(f.transfer.migrate(&f.hot, &f.vault, &object).await.is_ok());
    }

    #[tokio::test]
    async fn test_migrate_second_disk_full_is_fatal() {
        let f = fixture();
        let key = ObjectKey::new("web/a.tar");
        f.hot.put(&key, Bytes::from_static(b"abc")).await.unwrap();
        let object = f.hot.list("web/").await.unwrap().remove(0);

        f.transfer.config().scratch.inject_disk_full(2);
        let err = f.transfer.migrate(&f.hot, &f.vault, &object).await.unwrap_err();
        assert!(err.is_disk_full(), "unexpected error: {err}");
        assert_eq!(f.vault.archive_count(), 0);
        assert!(f.hot.contains(&key));
    }

    #[tokio::test]
    async fn test_migrate_reports_cold_failure() {
        let f = fixture();
        let vault = SimulatedArchiveVault::with_faults(
            "cold",
            1,
            VaultFaultConfig::default().with_force_upload_fail(),
        );
        let key = ObjectKey::new("web/a.tar");
        f.hot.put(&key, Bytes::from_static(b"abc")).await.unwrap();
        let object = f.hot.list("web/").await.unwrap().remove(0);

        assert!(f.transfer.migrate(&f.hot, &vault, &object).await.is_err());
        assert!(f.hot.contains(&key));
    }

    #[tokio::test]
    async fn test_backup_batch_continues_after_failure() {
        let f = fixture();
        let jobs = vec![
            BackupJob {
                name: "broken".to_string(),
                capture: CaptureSpec::new("exit 7"),
                hot: hot_sink(&f.hot, "broken/a.tar"),
                cold: None,
            },
            BackupJob {
                name: "web".to_string(),
                capture: CaptureSpec::new("printf ok"),
                hot: hot_sink(&f.hot, "web/a.tar"),
                cold: None,
            },
        ];

        let results = f.transfer.backup_batch(&jobs).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "broken");
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().bytes_written, 2);
    }
}
