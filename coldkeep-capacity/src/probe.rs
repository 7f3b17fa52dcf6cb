//! Hot-tier utilization probes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use coldkeep_tier::{shell_quote, CommandRunner, ObjectStorage};
use serde::Serialize;

use crate::error::{CapacityError, CapacityResult};

/// Utilization limit for a monitored path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityThreshold {
    /// Maximum allowed `used_percent`.
    pub percent: f64,
    /// Filesystem path (or storage prefix) sampled.
    pub path: String,
}

impl CapacityThreshold {
    /// Creates a threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if `percent` is not within `0.0..=100.0`.
    pub fn new(percent: f64, path: impl Into<String>) -> CapacityResult<Self> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(CapacityError::InvalidArgument {
                name: "threshold percent",
                reason: format!("{percent} is not within 0-100"),
            });
        }
        Ok(Self {
            percent,
            path: path.into(),
        })
    }

    /// Returns true if `sample` is above the threshold.
    #[must_use]
    pub fn is_exceeded_by(&self, sample: &StorageCapacitySample) -> bool {
        sample.used_percent > self.percent
    }
}

/// One utilization reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageCapacitySample {
    /// Capacity in bytes.
    pub total: u64,
    /// Bytes in use.
    pub used: u64,
    /// Bytes available.
    pub available: u64,
    /// `used / total`, in percent.
    pub used_percent: f64,
}

impl StorageCapacitySample {
    /// Builds a sample, deriving `used_percent` from `used / total`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_bytes(total: u64, used: u64, available: u64) -> Self {
        let used_percent = if total == 0 {
            0.0
        } else {
            used as f64 * 100.0 / total as f64
        };
        Self {
            total,
            used,
            available,
            used_percent,
        }
    }

    /// Builds a sample at an exact utilization, for tests and previews.
    #[must_use]
    pub fn at_percent(used_percent: f64) -> Self {
        Self {
            total: 100,
            used: 0,
            available: 0,
            used_percent,
        }
    }
}

// -----------------------------------------------------------------------------
// CapacityProbe Trait
// -----------------------------------------------------------------------------

/// Source of utilization samples.
#[async_trait]
pub trait CapacityProbe: Send + Sync {
    /// Samples utilization of `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the measurement cannot be taken.
    async fn sample(&self, path: &str) -> CapacityResult<StorageCapacitySample>;
}

/// Samples a filesystem with `df`, locally or on a remote host.
#[derive(Debug, Clone)]
pub struct DfProbe<R> {
    runner: R,
}

impl<R: CommandRunner> DfProbe<R> {
    /// Creates a probe that runs `df` through `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: CommandRunner> CapacityProbe for DfProbe<R> {
    async fn sample(&self, path: &str) -> CapacityResult<StorageCapacitySample> {
        let script = format!("df -P -B1 {}", shell_quote(path));
        let stdout = self.runner.run(&script).await.into_result(self.runner.target())?;
        parse_df(&stdout)
    }
}

/// Parses POSIX `df -P -B1` output.
///
/// # Errors
///
/// Returns [`CapacityError::Parse`] if no data line with numeric
/// total/used/available columns is present.
pub fn parse_df(output: &str) -> CapacityResult<StorageCapacitySample> {
    let parse_err = |reason: String| CapacityError::Parse {
        command: "df",
        reason,
    };

    let line = output
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .last()
        .ok_or_else(|| parse_err("no data line".to_string()))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(parse_err(format!("expected at least 4 columns in '{line}'")));
    }

    let number = |idx: usize| {
        fields[idx]
            .parse::<u64>()
            .map_err(|e| parse_err(format!("column {idx} '{}': {e}", fields[idx])))
    };

    Ok(StorageCapacitySample::from_bytes(number(1)?, number(2)?, number(3)?))
}

/// Derives utilization from the bytes listed under a hot-tier prefix against
/// a fixed quota.
///
/// Used for object stores that do not report capacity themselves.
pub struct HotUsageProbe {
    storage: Arc<dyn ObjectStorage>,
    quota_bytes: u64,
}

impl HotUsageProbe {
    /// Creates a probe measuring `storage` against `quota_bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `quota_bytes` is zero.
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, quota_bytes: u64) -> Self {
        assert!(quota_bytes > 0, "quota must be positive");
        Self {
            storage,
            quota_bytes,
        }
    }
}

#[async_trait]
impl CapacityProbe for HotUsageProbe {
    async fn sample(&self, path: &str) -> CapacityResult<StorageCapacitySample> {
        let used: u64 = self.storage.list(path).await?.iter().map(|o| o.size).sum();
        Ok(StorageCapacitySample::from_bytes(
            self.quota_bytes,
            used,
            self.quota_bytes.saturating_sub(used),
        ))
    }
}

/// Replays a fixed series of samples and counts calls.
///
/// When the series runs out the last sample repeats. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    samples: Arc<Mutex<VecDeque<StorageCapacitySample>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    /// Creates a probe replaying `samples`.
    ///
    /// # Panics
    ///
    /// Panics if `samples` is empty.
    #[must_use]
    pub fn new(samples: impl IntoIterator<Item = StorageCapacitySample>) -> Self {
        let samples: VecDeque<_> = samples.into_iter().collect();
        assert!(!samples.is_empty(), "scripted probe needs at least one sample");
        Self {
            samples: Arc::new(Mutex::new(samples)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of samples taken so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapacityProbe for ScriptedProbe {
    async fn sample(&self, _path: &str) -> CapacityResult<StorageCapacitySample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut samples = self.samples.lock().expect("probe lock poisoned");
        let sample = if samples.len() > 1 {
            samples.pop_front()
        } else {
            samples.front().copied()
        };
        drop(samples);
        sample.ok_or_else(|| CapacityError::InvalidArgument {
            name: "scripted samples",
            reason: "exhausted".to_string(),
        })
    }
}
