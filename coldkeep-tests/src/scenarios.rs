//! Reusable backup histories and seeds.

use chrono::{DateTime, Duration, TimeZone, Utc};
use coldkeep_core::ObjectKey;
use coldkeep_tier::SimulatedObjectStorage;

/// Seeds for reproducible multi-seed runs.
pub const SEEDS: &[u64] = &[1, 7, 42, 1337, 2024, 9001, 65_537, 104_729];

/// Midnight plus one hour, UTC, on the given day.
///
/// # Panics
///
/// Panics if the date does not exist.
#[must_use]
pub fn day(year: i32, month: u32, date: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, date, 1, 0, 0)
        .single()
        .expect("valid date")
}

/// A daily backup history of one site.
#[derive(Debug, Clone)]
pub struct History {
    /// Key prefix, if any.
    pub prefix: Option<&'static str>,
    /// Site name.
    pub site: &'static str,
    /// Backup label.
    pub label: &'static str,
    /// First backup.
    pub first: DateTime<Utc>,
    /// Number of consecutive daily backups.
    pub days: u32,
    /// Size of each backup.
    pub object_bytes: usize,
}

impl History {
    /// A `days`-long history of `site` starting on `first`.
    #[must_use]
    pub const fn daily(site: &'static str, first: DateTime<Utc>, days: u32) -> Self {
        Self {
            prefix: None,
            site,
            label: "files",
            first,
            days,
            object_bytes: 100,
        }
    }

    /// Sets the key prefix.
    #[must_use]
    pub const fn with_prefix(mut self, prefix: &'static str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Sets the label.
    #[must_use]
    pub const fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Sets the size of each backup.
    #[must_use]
    pub const fn with_object_bytes(mut self, bytes: usize) -> Self {
        self.object_bytes = bytes;
        self
    }

    /// Keys of the history, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if a component is not a valid key component.
    #[must_use]
    pub fn keys(&self) -> Vec<(ObjectKey, DateTime<Utc>)> {
        (0..self.days)
            .map(|offset| {
                let at = self.first + Duration::days(i64::from(offset));
                let key = ObjectKey::for_backup(self.prefix, self.site, self.label, at, "tar.gz")
                    .expect("valid key components");
                (key, at)
            })
            .collect()
    }

    /// Writes the history into a simulated hot tier.
    pub fn seed(&self, hot: &SimulatedObjectStorage) -> Vec<ObjectKey> {
        self.keys()
            .into_iter()
            .map(|(key, at)| {
                hot.insert_object(&key, vec![0xab; self.object_bytes], at);
                key
            })
            .collect()
    }
}
