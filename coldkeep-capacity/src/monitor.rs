//! Bounded control loop keeping hot-tier utilization under a threshold.
//!
//! Each pass selects the oldest fraction of hot objects under a prefix,
//! copies them to the cold tier and removes the hot copy only once the cold
//! copy is confirmed. The loop ends when a sample is at or below the
//! threshold, or fails once the pass bound is spent.

use std::time::Duration;

use coldkeep_core::limits::{MONITOR_ITERATIONS_MAX_DEFAULT, MONITOR_PAUSE_SECS_DEFAULT};
use coldkeep_core::ObjectKey;
use coldkeep_retention::oldest_percent;
use coldkeep_tier::{StorageClients, StreamingTransfer};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::MonitorError;
use crate::probe::{CapacityProbe, CapacityThreshold, StorageCapacitySample};

/// Capacity monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Threshold and sampled path.
    pub threshold: CapacityThreshold,
    /// Hot-tier key prefix whose objects may be moved.
    pub prefix: String,
    /// Share of the objects under `prefix` moved per pass, in percent.
    pub migrate_percent: f64,
    /// Upper bound on relief passes.
    pub max_iterations: u32,
    /// Pause after a pass before sampling again.
    pub pause: Duration,
    /// Delete the selection outright when every migration in a pass fails.
    pub force_delete: bool,
    /// Select and report one pass without changing anything.
    pub dry_run: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: CapacityThreshold {
                percent: 85.0,
                path: "/".to_string(),
            },
            prefix: String::new(),
            migrate_percent: 10.0,
            max_iterations: MONITOR_ITERATIONS_MAX_DEFAULT,
            pause: Duration::from_secs(MONITOR_PAUSE_SECS_DEFAULT),
            force_delete: false,
            dry_run: false,
        }
    }
}

impl MonitorConfig {
    /// Creates a configuration for tests: no pause between passes.
    #[must_use]
    pub fn for_testing(threshold: CapacityThreshold) -> Self {
        Self {
            threshold,
            pause: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sets the threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: CapacityThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the share moved per pass.
    ///
    /// # Panics
    ///
    /// Panics if `percent` is not within `(0, 100]`.
    #[must_use]
    pub fn with_migrate_percent(mut self, percent: f64) -> Self {
        assert!(
            percent > 0.0 && percent <= 100.0,
            "migrate percent must be within (0, 100]"
        );
        self.migrate_percent = percent;
        self
    }

    /// Sets the pass bound.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Sets the pause between passes.
    #[must_use]
    pub const fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Enables deletion without a cold copy when a whole pass fails.
    #[must_use]
    pub const fn with_force_delete(mut self, force_delete: bool) -> Self {
        self.force_delete = force_delete;
        self
    }

    /// Enables preview mode.
    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// What one relief pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    /// Pass number (1-based).
    pub iteration: u32,
    /// Sample that triggered the pass.
    pub sample: StorageCapacitySample,
    /// Objects chosen for relief, oldest first.
    pub selected: Vec<ObjectKey>,
    /// Bytes selected.
    pub selected_bytes: u64,
    /// Objects copied to the cold tier.
    pub migrated: Vec<ObjectKey>,
    /// Objects removed from the hot tier.
    pub deleted: Vec<ObjectKey>,
    /// Objects that could not be moved, with the reason.
    pub failed: Vec<(ObjectKey, String)>,
    /// The selection was deleted without cold copies.
    pub force_deleted: bool,
    /// Nothing was changed.
    pub dry_run: bool,
}

/// Result of a monitor run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    /// Passes performed.
    pub passes: Vec<PassSummary>,
    /// Last sample taken.
    pub final_sample: StorageCapacitySample,
    /// Threshold in effect.
    pub threshold: f64,
}

impl MonitorReport {
    /// Returns true if the last sample is at or below the threshold.
    #[must_use]
    pub fn within_threshold(&self) -> bool {
        self.final_sample.used_percent <= self.threshold
    }
}

/// Keeps hot-tier utilization under a threshold by moving old objects to
/// the cold tier.
pub struct CapacityMonitor<'a> {
    probe: &'a dyn CapacityProbe,
    clients: &'a StorageClients,
    transfer: &'a StreamingTransfer,
    config: MonitorConfig,
}

impl<'a> CapacityMonitor<'a> {
    /// Creates a monitor.
    #[must_use]
    pub fn new(
        probe: &'a dyn CapacityProbe,
        clients: &'a StorageClients,
        transfer: &'a StreamingTransfer,
        config: MonitorConfig,
    ) -> Self {
        Self {
            probe,
            clients,
            transfer,
            config,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Runs passes until utilization is within the threshold.
    ///
    /// In preview mode at most one pass is computed and no further sample
    /// is taken.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::BoundExceeded`] if utilization is still above
    /// the threshold after `max_iterations` passes,
    /// [`MonitorError::NothingToRelieve`] if there is nothing to move, or
    /// the error of a failed sample or listing. No cold tier configured is
    /// a configuration error raised before any sample.
    pub async fn run(&self) -> Result<MonitorReport, MonitorError> {
        self.clients.require_cold()?;

        let threshold = &self.config.threshold;
        let mut passes = Vec::new();
        let mut sample = self.probe.sample(&threshold.path).await?;
        info!(
            path = %threshold.path,
            used_percent = sample.used_percent,
            threshold = threshold.percent,
            "Sampled capacity"
        );

        if self.config.dry_run {
            if threshold.is_exceeded_by(&sample) {
                passes.push(self.relieve(1, &sample).await?);
            }
            return Ok(self.report(passes, sample));
        }

        for iteration in 1..=self.config.max_iterations {
            if !threshold.is_exceeded_by(&sample) {
                break;
            }

            passes.push(self.relieve(iteration, &sample).await?);

            if !self.config.pause.is_zero() {
                tokio::time::sleep(self.config.pause).await;
            }
            sample = self.probe.sample(&threshold.path).await?;
            info!(
                iteration,
                used_percent = sample.used_percent,
                threshold = threshold.percent,
                "Sampled capacity after pass"
            );
        }

        if threshold.is_exceeded_by(&sample) {
            return Err(MonitorError::BoundExceeded {
                iterations: self.config.max_iterations,
                used_percent: sample.used_percent,
                threshold: threshold.percent,
            });
        }

        Ok(self.report(passes, sample))
    }

    fn report(&self, passes: Vec<PassSummary>, final_sample: StorageCapacitySample) -> MonitorReport {
        MonitorReport {
            passes,
            final_sample,
            threshold: self.config.threshold.percent,
        }
    }

    /// Performs one relief pass for `sample`.
    ///
    /// A hot object is deleted only after its cold copy is confirmed. When
    /// no object in the pass could be copied and `force_delete` is set, the
    /// whole selection is deleted instead.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NothingToRelieve`] if the prefix is empty,
    /// or the error of a failed listing. Per-object failures are reported
    /// in the summary.
    pub async fn relieve(
        &self,
        iteration: u32,
        sample: &StorageCapacitySample,
    ) -> Result<PassSummary, MonitorError> {
        let hot = self.clients.hot();
        let vault = self.clients.require_cold()?;

        let objects = hot.list(&self.config.prefix).await?;
        let victims = oldest_percent(&objects, self.config.migrate_percent);
        if victims.is_empty() {
            return Err(MonitorError::NothingToRelieve {
                prefix: self.config.prefix.clone(),
                used_percent: sample.used_percent,
            });
        }

        let mut summary = PassSummary {
            iteration,
            sample: *sample,
            selected: victims.iter().map(|o| o.key.clone()).collect(),
            selected_bytes: victims.iter().map(|o| o.size).sum(),
            migrated: Vec::new(),
            deleted: Vec::new(),
            failed: Vec::new(),
            force_deleted: false,
            dry_run: self.config.dry_run,
        };

        info!(
            iteration,
            selected = summary.selected.len(),
            bytes = summary.selected_bytes,
            dry_run = self.config.dry_run,
            "Selected objects for relief"
        );

        if self.config.dry_run {
            return Ok(summary);
        }

        for object in &victims {
            match self.transfer.migrate(hot, vault, object).await {
                Ok(outcome) => {
                    summary.migrated.push(object.key.clone());
                    match hot.delete(&object.key).await {
                        Ok(()) => summary.deleted.push(object.key.clone()),
                        Err(e) => {
                            warn!(key = %object.key, archive_id = %outcome.archive_id, error = %e, "Migrated but hot delete failed");
                            summary.failed.push((
                                object.key.clone(),
                                format!("archived as {} but hot delete failed: {e}", outcome.archive_id),
                            ));
                        }
                    }
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Migration failed, keeping hot copy");
                    summary.failed.push((object.key.clone(), e.to_string()));
                }
            }
        }

        if summary.migrated.is_empty() && self.config.force_delete {
            warn!(
                iteration,
                count = victims.len(),
                "Every migration failed, deleting selection without cold copies"
            );
            summary.force_deleted = true;
            for (key, result) in hot.delete_many(&summary.selected).await {
                match result {
                    Ok(()) => summary.deleted.push(key),
                    Err(e) => summary.failed.push((key, format!("force delete failed: {e}"))),
                }
            }
        }

        info!(
            iteration,
            migrated = summary.migrated.len(),
            deleted = summary.deleted.len(),
            failed = summary.failed.len(),
            "Relief pass complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::probe::ScriptedProbe;
    use chrono::{TimeZone, Utc};
    use coldkeep_tier::{
        LocalRunner, SimulatedArchiveVault, SimulatedObjectStorage, TransferConfig, VaultFaultConfig,
    };
    use tempfile::TempDir;

    struct Fixture {
        hot: SimulatedObjectStorage,
        vault: SimulatedArchiveVault,
        clients: StorageClients,
        transfer: StreamingTransfer,
        _scratch: TempDir,
    }

    fn fixture(objects: usize, vault_faults: VaultFaultConfig) -> Fixture {
        let scratch = TempDir::new().unwrap();
        let hot = SimulatedObjectStorage::new(11);
        for i in 0..objects {
            let day = u32::try_from(i).unwrap() + 1;
            hot.insert_object(
                &ObjectKey::new(format!("web/files-202401{day:02}-000000.tar")),
                vec![b'x'; 100],
                Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            );
        }
        let vault = SimulatedArchiveVault::with_faults("cold", 11, vault_faults);
        let clients = StorageClients::new(Arc::new(hot.clone())).with_cold(Arc::new(vault.clone()));
        let transfer = StreamingTransfer::new(
            Arc::new(LocalRunner),
            TransferConfig::for_testing(scratch.path()),
        );
        Fixture {
            hot,
            vault,
            clients,
            transfer,
            _scratch: scratch,
        }
    }

    fn config(percent: f64) -> MonitorConfig {
        MonitorConfig::for_testing(CapacityThreshold::new(percent, "/").unwrap())
            .with_prefix("web/")
            .with_migrate_percent(20.0)
    }

    fn at(percent: f64) -> StorageCapacitySample {
        StorageCapacitySample::at_percent(percent)
    }

    #[tokio::test]
    async fn test_within_threshold_does_nothing() {
        let f = fixture(5, VaultFaultConfig::default());
        let probe = ScriptedProbe::new([at(50.0)]);
        let monitor = CapacityMonitor::new(&probe, &f.clients, &f.transfer, config(95.0));

        let report = monitor.run().await.unwrap();
        assert!(report.passes.is_empty());
        assert!(report.within_threshold());
        assert_eq!(probe.calls(), 1);
        assert_eq!(f.hot.object_count(), 5);
    }

    #[tokio::test]
    async fn test_pass_migrates_oldest_then_deletes() {
        let f = fixture(10, VaultFaultConfig::default());
        let probe = ScriptedProbe::new([at(97.0), at(90.0)]);
        let monitor = CapacityMonitor::new(&probe, &f.clients, &f.transfer, config(95.0));

        let report = monitor.run().await.unwrap();
        assert_eq!(report.passes.len(), 1);
        let pass = &report.passes[0];
        assert_eq!(
            pass.selected,
            vec![
                ObjectKey::new("web/files-20240101-000000.tar"),
                ObjectKey::new("web/files-20240102-000000.tar"),
            ]
        );
        assert_eq!(pass.deleted, pass.selected);
        assert!(pass.failed.is_empty());
        assert_eq!(f.vault.archive_count(), 2);
        assert_eq!(f.hot.object_count(), 8);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_cold_failure_keeps_hot_copy() {
        let f = fixture(5, VaultFaultConfig::default().with_force_upload_fail());
        let probe = ScriptedProbe::new([at(97.0), at(90.0)]);
        let monitor = CapacityMonitor::new(&probe, &f.clients, &f.transfer, config(95.0));

        let report = monitor.run().await.unwrap();
        let pass = &report.passes[0];
        assert_eq!(pass.failed.len(), 1);
        assert!(pass.deleted.is_empty());
        assert!(!pass.force_deleted);
        assert_eq!(f.hot.object_count(), 5);
    }

    #[tokio::test]
    async fn test_force_delete_after_total_failure() {
        let f = fixture(5, VaultFaultConfig::default().with_unreachable());
        let probe = ScriptedProbe::new([at(97.0), at(90.0)]);
        let monitor = CapacityMonitor::new(
            &probe,
            &f.clients,
            &f.transfer,
            config(95.0).with_force_delete(true),
        );

        let report = monitor.run().await.unwrap();
        let pass = &report.passes[0];
        assert!(pass.force_deleted);
        assert_eq!(pass.deleted.len(), 1);
        assert_eq!(f.hot.object_count(), 4);
        assert_eq!(f.vault.archive_count(), 0);
    }

    #[tokio::test]
    async fn test_bound_exceeded() {
        let f = fixture(10, VaultFaultConfig::default());
        let probe = ScriptedProbe::new([at(99.0)]);
        let monitor = CapacityMonitor::new(
            &probe,
            &f.clients,
            &f.transfer,
            config(95.0).with_max_iterations(3),
        );

        match monitor.run().await {
            Err(MonitorError::BoundExceeded { iterations, .. }) => assert_eq!(iterations, 3),
            other => panic!("expected BoundExceeded, got {other:?}"),
        }
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test]
    async fn test_dry_run_single_pass_single_sample() {
        let f = fixture(5, VaultFaultConfig::default());
        let probe = ScriptedProbe::new([at(96.0), at(10.0)]);
        let monitor = CapacityMonitor::new(
            &probe,
            &f.clients,
            &f.transfer,
            config(95.0).with_dry_run(true),
        );

        let report = monitor.run().await.unwrap();
        assert_eq!(report.passes.len(), 1);
        assert!(report.passes[0].dry_run);
        assert!(report.passes[0].deleted.is_empty());
        assert_eq!(probe.calls(), 1);
        assert_eq!(f.hot.object_count(), 5);
        assert_eq!(f.vault.archive_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_to_relieve() {
        let f = fixture(0, VaultFaultConfig::default());
        let probe = ScriptedProbe::new([at(99.0)]);
        let monitor = CapacityMonitor::new(&probe, &f.clients, &f.transfer, config(95.0));

        assert!(matches!(
            monitor.run().await,
            Err(MonitorError::NothingToRelieve { .. })
        ));
    }

    #[tokio::test]
    async fn test_cold_tier_required() {
        let f = fixture(3, VaultFaultConfig::default());
        let clients = StorageClients::new(Arc::new(f.hot.clone()));
        let probe = ScriptedProbe::new([at(99.0)]);
        let monitor = CapacityMonitor::new(&probe, &clients, &f.transfer, config(95.0));

        assert!(matches!(monitor.run().await, Err(MonitorError::Tier(_))));
        assert_eq!(probe.calls(), 0);
    }
}
