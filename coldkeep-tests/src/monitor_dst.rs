//! Capacity monitor simulation across seeds.
//!
//! Vault uploads and hot deletes fail at seeded rates. Whatever the seed,
//! no backup may disappear from both tiers unless force delete is on, and
//! the same seed must replay the same history.

use std::sync::Arc;

use coldkeep_capacity::{
    CapacityMonitor, CapacityThreshold, HotUsageProbe, MonitorConfig, MonitorError, MonitorReport,
};
use coldkeep_core::ObjectKey;
use coldkeep_tier::{
    LocalRunner, ObjectStorageFaultConfig, SimulatedArchiveVault, SimulatedObjectStorage,
    StorageClients, StreamingTransfer, TransferConfig, VaultFaultConfig,
};
use tempfile::TempDir;

use crate::scenarios::{day, History, SEEDS};

const OBJECTS: u32 = 20;
const OBJECT_BYTES: usize = 100;
const QUOTA_BYTES: u64 = 2000;
const THRESHOLD_PERCENT: f64 = 50.0;

struct Run {
    result: Result<MonitorReport, MonitorError>,
    hot: SimulatedObjectStorage,
    vault: SimulatedArchiveVault,
    keys: Vec<ObjectKey>,
}

async fn run_seed(seed: u64, force_delete: bool) -> Run {
    let hot = SimulatedObjectStorage::with_faults(
        seed,
        ObjectStorageFaultConfig {
            delete_fail_rate: 0.2,
            ..ObjectStorageFaultConfig::none()
        },
    );
    let keys = History::daily("web", day(2024, 1, 1), OBJECTS)
        .with_object_bytes(OBJECT_BYTES)
        .seed(&hot);
    let vault = SimulatedArchiveVault::with_faults(
        "cold",
        seed,
        VaultFaultConfig::default().with_upload_fail_rate(0.3),
    );

    let scratch = TempDir::new().unwrap();
    let clients = StorageClients::new(Arc::new(hot.clone())).with_cold(Arc::new(vault.clone()));
    let transfer =
        StreamingTransfer::new(Arc::new(LocalRunner), TransferConfig::for_testing(scratch.path()));
    let probe = HotUsageProbe::new(Arc::new(hot.clone()), QUOTA_BYTES);
    let config = MonitorConfig::for_testing(CapacityThreshold::new(THRESHOLD_PERCENT, "web/").unwrap())
        .with_prefix("web/")
        .with_max_iterations(40)
        .with_force_delete(force_delete);

    let result = CapacityMonitor::new(&probe, &clients, &transfer, config)
        .run()
        .await;

    Run {
        result,
        hot,
        vault,
        keys,
    }
}

fn deleted(report: &MonitorReport) -> Vec<ObjectKey> {
    report.passes.iter().flat_map(|p| p.deleted.clone()).collect()
}

/// No backup is lost from both tiers, whatever fails.
#[tokio::test]
async fn test_dst_monitor_never_loses_backups() {
    for &seed in SEEDS {
        let run = run_seed(seed, false).await;
        let archived = run.vault.descriptions();

        for key in &run.keys {
            assert!(
                run.hot.contains(key) || archived.contains(&key.to_string()),
                "seed {seed}: {key} lost from both tiers"
            );
        }
        assert!(
            archived
                .iter()
                .all(|d| run.keys.iter().any(|k| k.as_str() == d)),
            "seed {seed}: vault holds an unknown archive"
        );

        match &run.result {
            Ok(report) => {
                assert!(report.final_sample.used_percent <= THRESHOLD_PERCENT, "seed {seed}");
                // Every reported delete really happened.
                for key in deleted(report) {
                    assert!(!run.hot.contains(&key), "seed {seed}: {key} still hot");
                }
            }
            Err(MonitorError::BoundExceeded { iterations, .. }) => assert_eq!(*iterations, 40),
            Err(e) => panic!("seed {seed}: unexpected error {e}"),
        }
    }
}

/// The same seed replays the same passes.
#[tokio::test]
async fn test_dst_monitor_is_deterministic() {
    for &seed in &SEEDS[..4] {
        let first = run_seed(seed, false).await;
        let second = run_seed(seed, false).await;

        assert_eq!(first.vault.descriptions(), second.vault.descriptions(), "seed {seed}");
        assert_eq!(first.hot.object_count(), second.hot.object_count(), "seed {seed}");
        match (&first.result, &second.result) {
            (Ok(a), Ok(b)) => {
                assert_eq!(a.passes.len(), b.passes.len(), "seed {seed}");
                assert_eq!(deleted(a), deleted(b), "seed {seed}");
            }
            (Err(_), Err(_)) => {}
            _ => panic!("seed {seed}: runs diverged"),
        }
    }
}

/// Force delete always converges, even when most migrations fail.
#[tokio::test]
async fn test_dst_monitor_force_delete_converges() {
    for &seed in SEEDS {
        let run = run_seed(seed, true).await;
        let report = match run.result {
            Ok(report) => report,
            Err(e) => panic!("seed {seed}: {e}"),
        };
        assert!(report.within_threshold(), "seed {seed}");
        assert!(run.hot.object_count() <= (OBJECTS / 2) as usize, "seed {seed}");
    }
}
