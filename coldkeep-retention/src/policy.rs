//! Retention policies.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use coldkeep_core::StorageObject;
use serde::{Deserialize, Serialize};

use crate::error::{RetentionError, RetentionResult};
use crate::select::{simple_overwrite, smart_tiered};

/// Quota bucket an object was admitted to by [`smart_tiered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetentionTier {
    /// Taken on the monthly anchor day.
    Monthly,
    /// Taken on the weekly anchor weekday.
    Weekly,
    /// Any other backup.
    Daily,
}

/// Date-aware tiered retention.
///
/// Anchors are evaluated against the UTC calendar date of `last_modified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartTieredPolicy {
    /// Number of daily backups to keep.
    pub keep_daily: usize,
    /// Number of weekly backups to keep.
    pub keep_weekly: usize,
    /// Number of monthly backups to keep.
    pub keep_monthly: usize,
    /// Weekday that makes a backup weekly-eligible.
    pub weekly_anchor: Weekday,
    /// Day of month (1-31) that makes a backup monthly-eligible.
    ///
    /// Months shorter than the anchor match on their last day.
    pub monthly_anchor_day: u32,
}

impl Default for SmartTieredPolicy {
    fn default() -> Self {
        Self {
            keep_daily: 7,
            keep_weekly: 4,
            keep_monthly: 12,
            weekly_anchor: Weekday::Sun,
            monthly_anchor_day: 1,
        }
    }
}

impl SmartTieredPolicy {
    /// Creates a policy with the given quotas and default anchors
    /// (Sunday, first of the month).
    #[must_use]
    pub fn new(keep_daily: usize, keep_weekly: usize, keep_monthly: usize) -> Self {
        Self {
            keep_daily,
            keep_weekly,
            keep_monthly,
            ..Self::default()
        }
    }

    /// Sets the weekly anchor weekday.
    #[must_use]
    pub const fn with_weekly_anchor(mut self, weekday: Weekday) -> Self {
        self.weekly_anchor = weekday;
        self
    }

    /// Sets the monthly anchor day.
    #[must_use]
    pub const fn with_monthly_anchor_day(mut self, day: u32) -> Self {
        self.monthly_anchor_day = day;
        self
    }

    /// Checks the anchor day lies in `1..=31`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::InvalidPolicy`] for an out-of-range anchor.
    pub fn validate(&self) -> RetentionResult<()> {
        if !(1..=31).contains(&self.monthly_anchor_day) {
            return Err(RetentionError::InvalidPolicy {
                reason: format!(
                    "monthly anchor day must be 1-31, got {}",
                    self.monthly_anchor_day
                ),
            });
        }
        Ok(())
    }

    /// Upper bound on the number of objects this policy retains.
    #[must_use]
    pub const fn total_quota(&self) -> usize {
        self.keep_daily + self.keep_weekly + self.keep_monthly
    }

    /// Returns true if `at` falls on the monthly anchor.
    #[must_use]
    pub fn matches_monthly(&self, at: DateTime<Utc>) -> bool {
        let date = at.date_naive();
        date.day() == self.monthly_anchor_day.min(days_in_month(date))
    }

    /// Returns true if `at` falls on the weekly anchor.
    #[must_use]
    pub fn matches_weekly(&self, at: DateTime<Utc>) -> bool {
        at.weekday() == self.weekly_anchor
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// A retention discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetentionPolicy {
    /// Keep the `keep` most recent objects.
    SimpleOverwrite {
        /// Number of objects to keep.
        keep: usize,
    },
    /// Keep objects per daily/weekly/monthly quota.
    SmartTiered(SmartTieredPolicy),
}

impl RetentionPolicy {
    /// Returns the objects this policy discards, newest first.
    #[must_use]
    pub fn select(&self, objects: &[StorageObject]) -> Vec<StorageObject> {
        match self {
            Self::SimpleOverwrite { keep } => simple_overwrite(objects, *keep),
            Self::SmartTiered(policy) => smart_tiered(objects, policy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_monthly_anchor_exact_day() {
        let policy = SmartTieredPolicy::default().with_monthly_anchor_day(15);
        assert!(policy.matches_monthly(day(2024, 5, 15)));
        assert!(!policy.matches_monthly(day(2024, 5, 14)));
    }

    #[test]
    fn test_monthly_anchor_clamps_to_month_end() {
        let policy = SmartTieredPolicy::default().with_monthly_anchor_day(31);
        assert!(policy.matches_monthly(day(2024, 2, 29)));
        assert!(policy.matches_monthly(day(2023, 2, 28)));
        assert!(policy.matches_monthly(day(2024, 4, 30)));
        assert!(policy.matches_monthly(day(2024, 12, 31)));
        assert!(!policy.matches_monthly(day(2024, 12, 30)));
    }

    #[test]
    fn test_weekly_anchor() {
        let policy = SmartTieredPolicy::default().with_weekly_anchor(Weekday::Mon);
        // 2024-06-03 is a Monday.
        assert!(policy.matches_weekly(day(2024, 6, 3)));
        assert!(!policy.matches_weekly(day(2024, 6, 4)));
    }

    #[test]
    fn test_validate_anchor_day() {
        assert!(SmartTieredPolicy::default().validate().is_ok());
        let bad = SmartTieredPolicy::default().with_monthly_anchor_day(0);
        assert!(matches!(
            bad.validate(),
            Err(RetentionError::InvalidPolicy { .. })
        ));
        let bad = SmartTieredPolicy::default().with_monthly_anchor_day(32);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_total_quota() {
        assert_eq!(SmartTieredPolicy::new(7, 4, 12).total_quota(), 23);
    }
}
