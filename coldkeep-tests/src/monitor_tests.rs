//! Capacity monitor integration tests.
//!
//! The monitor runs against real transfers into a simulated vault, with
//! utilization measured from the hot tier itself so every pass changes the
//! next sample.

use std::sync::Arc;

use bytes::Bytes;
use coldkeep_capacity::{
    CapacityMonitor, CapacityThreshold, HotUsageProbe, MonitorConfig, MonitorError, ScriptedProbe,
    StorageCapacitySample,
};
use coldkeep_core::ObjectKey;
use coldkeep_tier::{
    FilesystemConfig, FilesystemObjectStorage, LocalRunner, ObjectStorage, SimulatedArchiveVault,
    SimulatedObjectStorage, StorageClients, StreamingTransfer, TransferConfig,
};
use tempfile::TempDir;

use crate::scenarios::{day, History};

// ============================================================================
// Helper Functions
// ============================================================================

struct Fixture {
    _scratch: TempDir,
    hot: SimulatedObjectStorage,
    vault: SimulatedArchiveVault,
    clients: StorageClients,
    transfer: StreamingTransfer,
}

fn fixture(hot: SimulatedObjectStorage, vault: SimulatedArchiveVault) -> Fixture {
    let scratch = TempDir::new().unwrap();
    let clients =
        StorageClients::new(Arc::new(hot.clone())).with_cold(Arc::new(vault.clone()));
    let transfer =
        StreamingTransfer::new(Arc::new(LocalRunner), TransferConfig::for_testing(scratch.path()));
    Fixture {
        _scratch: scratch,
        hot,
        vault,
        clients,
        transfer,
    }
}

/// Ten daily 100-byte backups of `web` against a 1000-byte quota: 100% used.
fn full_fixture(vault: SimulatedArchiveVault) -> (Fixture, Vec<ObjectKey>) {
    let hot = SimulatedObjectStorage::new(42);
    let keys = History::daily("web", day(2024, 3, 1), 10).seed(&hot);
    (fixture(hot, vault), keys)
}

fn quota_config(percent: f64) -> MonitorConfig {
    MonitorConfig::for_testing(CapacityThreshold::new(percent, "web/").unwrap()).with_prefix("web/")
}

// ============================================================================
// Tests
// ============================================================================

/// Each pass moves the oldest 10% until usage falls to the threshold.
#[tokio::test]
async fn test_monitor_converges_oldest_first() {
    let (f, keys) = full_fixture(SimulatedArchiveVault::new("cold", 1));
    let probe = HotUsageProbe::new(Arc::new(f.hot.clone()), 1000);

    let report = CapacityMonitor::new(&probe, &f.clients, &f.transfer, quota_config(75.0))
        .run()
        .await
        .unwrap();

    assert_eq!(report.passes.len(), 3);
    assert!(report.within_threshold());
    assert!((report.final_sample.used_percent - 70.0).abs() < f64::EPSILON);

    // The three oldest moved, in order, and nothing else.
    let moved: Vec<_> = report.passes.iter().flat_map(|p| p.deleted.clone()).collect();
    assert_eq!(moved, keys[..3].to_vec());
    assert_eq!(f.hot.object_count(), 7);
    let expected: Vec<String> = keys[..3].iter().map(ToString::to_string).collect();
    assert_eq!(f.vault.descriptions(), expected);
}

/// 96% against 95% in preview: one pass is reported and nothing changes.
#[tokio::test]
async fn test_monitor_preview_just_above_threshold() {
    let (f, _) = full_fixture(SimulatedArchiveVault::new("cold", 1));
    let probe = ScriptedProbe::new([StorageCapacitySample::at_percent(96.0)]);

    let report = CapacityMonitor::new(
        &probe,
        &f.clients,
        &f.transfer,
        quota_config(95.0).with_dry_run(true),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(probe.calls(), 1);
    assert_eq!(report.passes.len(), 1);
    assert!(report.passes[0].dry_run);
    assert_eq!(report.passes[0].selected.len(), 1);
    assert!(report.passes[0].migrated.is_empty());
    assert_eq!(f.hot.object_count(), 10);
    assert_eq!(f.vault.archive_count(), 0);
}

/// Exactly at the threshold is within it.
#[tokio::test]
async fn test_monitor_at_threshold_does_nothing() {
    let (f, _) = full_fixture(SimulatedArchiveVault::new("cold", 1));
    let probe = HotUsageProbe::new(Arc::new(f.hot.clone()), 1000);

    let report = CapacityMonitor::new(&probe, &f.clients, &f.transfer, quota_config(100.0))
        .run()
        .await
        .unwrap();
    assert!(report.passes.is_empty());
    assert_eq!(f.hot.object_count(), 10);
}

/// With the vault down, hot copies stay and the pass bound is reported.
#[tokio::test]
async fn test_monitor_cold_failure_keeps_hot_copies() {
    let vault = SimulatedArchiveVault::new("cold", 1);
    vault.fault_config().unreachable = true;
    let (f, _) = full_fixture(vault);
    let probe = HotUsageProbe::new(Arc::new(f.hot.clone()), 1000);

    let result = CapacityMonitor::new(
        &probe,
        &f.clients,
        &f.transfer,
        quota_config(75.0).with_max_iterations(2),
    )
    .run()
    .await;

    assert!(matches!(
        result,
        Err(MonitorError::BoundExceeded { iterations: 2, .. })
    ));
    assert_eq!(f.hot.object_count(), 10);
    assert_eq!(f.vault.archive_count(), 0);
}

/// With the vault down and force delete on, the selection is dropped.
#[tokio::test]
async fn test_monitor_force_delete_when_vault_down() {
    let vault = SimulatedArchiveVault::new("cold", 1);
    vault.fault_config().unreachable = true;
    let (f, keys) = full_fixture(vault);
    let probe = HotUsageProbe::new(Arc::new(f.hot.clone()), 1000);

    let report = CapacityMonitor::new(
        &probe,
        &f.clients,
        &f.transfer,
        quota_config(75.0).with_force_delete(true),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.passes.len(), 3);
    assert!(report.passes.iter().all(|p| p.force_deleted));
    assert_eq!(f.hot.object_count(), 7);
    assert!(!f.hot.contains(&keys[0]));
    assert_eq!(f.vault.archive_count(), 0);
}

/// The monitor works the same over the filesystem hot tier.
#[tokio::test]
async fn test_monitor_filesystem_hot_tier() {
    let dir = TempDir::new().unwrap();
    let hot = Arc::new(
        FilesystemObjectStorage::new(FilesystemConfig::for_testing(dir.path()))
            .await
            .unwrap(),
    );
    for (key, _) in History::daily("web", day(2024, 3, 1), 10).keys() {
        hot.put(&key, Bytes::from(vec![0x5a; 100])).await.unwrap();
    }

    let scratch = TempDir::new().unwrap();
    let vault = SimulatedArchiveVault::new("cold", 1);
    let clients = StorageClients::new(hot.clone()).with_cold(Arc::new(vault.clone()));
    let transfer =
        StreamingTransfer::new(Arc::new(LocalRunner), TransferConfig::for_testing(scratch.path()));
    let probe = HotUsageProbe::new(hot.clone(), 1000);

    let report = CapacityMonitor::new(&probe, &clients, &transfer, quota_config(80.0))
        .run()
        .await
        .unwrap();

    assert_eq!(report.passes.len(), 2);
    assert_eq!(hot.list("web/").await.unwrap().len(), 8);
    assert_eq!(vault.archive_count(), 2);
    assert!(vault.descriptions().iter().all(|d| d.starts_with("web/files-")));
}
