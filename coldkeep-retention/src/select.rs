//! Selection functions.
//!
//! Each selector copies its input, establishes newest-first order and returns
//! a new list. Inputs are never mutated.

use coldkeep_core::StorageObject;

use crate::error::{RetentionError, RetentionResult};
use crate::policy::{RetentionTier, SmartTieredPolicy};
use crate::range::{DateRange, NumericRange};

/// Returns a copy of `objects` ordered newest first.
///
/// Ties on `last_modified` are broken by key, descending, so the order is
/// total and independent of the input order.
#[must_use]
pub fn sorted_newest_first(objects: &[StorageObject]) -> Vec<StorageObject> {
    let mut sorted = objects.to_vec();
    sorted.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| b.key.cmp(&a.key))
    });
    sorted
}

/// Keeps the `keep` most recent objects and returns the rest, newest first.
///
/// Returns an empty list when there are at most `keep` objects.
#[must_use]
pub fn simple_overwrite(objects: &[StorageObject], keep: usize) -> Vec<StorageObject> {
    if objects.len() <= keep {
        return Vec::new();
    }
    let discarded: Vec<_> = sorted_newest_first(objects).into_iter().skip(keep).collect();

    // Postcondition: exactly the surplus is discarded.
    debug_assert_eq!(discarded.len(), objects.len() - keep);
    discarded
}

/// Outcome of a smart tiered evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TieredPlan {
    /// Retained objects with the quota bucket each one consumed, newest first.
    pub kept: Vec<(StorageObject, RetentionTier)>,
    /// Objects no quota admitted, newest first.
    pub discarded: Vec<StorageObject>,
}

impl TieredPlan {
    /// Number of retained objects counted against `tier`.
    #[must_use]
    pub fn count(&self, tier: RetentionTier) -> usize {
        self.kept.iter().filter(|(_, t)| *t == tier).count()
    }
}

/// Evaluates `policy` and reports which bucket admitted each retained object.
///
/// Objects are scanned newest first. An object on the monthly anchor takes a
/// monthly slot while one remains; otherwise an object on the weekly anchor
/// takes a weekly slot; otherwise any object takes a daily slot. Once admitted
/// an object is never bumped by a later one.
#[must_use]
pub fn smart_tiered_plan(objects: &[StorageObject], policy: &SmartTieredPolicy) -> TieredPlan {
    let mut plan = TieredPlan::default();
    let (mut monthly, mut weekly, mut daily) = (0usize, 0usize, 0usize);

    for object in sorted_newest_first(objects) {
        let at = object.last_modified;
        let tier = if policy.matches_monthly(at) && monthly < policy.keep_monthly {
            monthly += 1;
            Some(RetentionTier::Monthly)
        } else if policy.matches_weekly(at) && weekly < policy.keep_weekly {
            weekly += 1;
            Some(RetentionTier::Weekly)
        } else if daily < policy.keep_daily {
            daily += 1;
            Some(RetentionTier::Daily)
        } else {
            None
        };

        match tier {
            Some(tier) => plan.kept.push((object, tier)),
            None => plan.discarded.push(object),
        }
    }

    // Postcondition: quotas are never exceeded.
    debug_assert!(plan.kept.len() <= policy.total_quota());
    plan
}

/// Returns the objects `policy` does not retain, newest first.
#[must_use]
pub fn smart_tiered(objects: &[StorageObject], policy: &SmartTieredPolicy) -> Vec<StorageObject> {
    smart_tiered_plan(objects, policy).discarded
}

/// Returns positions `start..=end` (1-based) of the newest-first order.
///
/// `end` is clamped to the list length.
///
/// # Errors
///
/// Returns [`RetentionError::StartOutOfRange`] if `start` exceeds the list
/// length.
pub fn by_numeric_range(
    objects: &[StorageObject],
    range: NumericRange,
) -> RetentionResult<Vec<StorageObject>> {
    let len = objects.len();
    if range.start > len {
        return Err(RetentionError::StartOutOfRange {
            start: range.start,
            len,
        });
    }
    let end = range.end.min(len);
    let sorted = sorted_newest_first(objects);
    Ok(sorted[range.start - 1..end].to_vec())
}

/// Returns objects modified within `range` (inclusive), newest first.
#[must_use]
pub fn by_date_range(objects: &[StorageObject], range: &DateRange) -> Vec<StorageObject> {
    sorted_newest_first(objects)
        .into_iter()
        .filter(|o| range.contains(o.last_modified))
        .collect()
}

/// Returns objects whose key starts with `prefix`, newest first.
#[must_use]
pub fn by_prefix(objects: &[StorageObject], prefix: &str) -> Vec<StorageObject> {
    sorted_newest_first(objects)
        .into_iter()
        .filter(|o| o.key.as_str().starts_with(prefix))
        .collect()
}

/// Returns the oldest `percent`% of `objects`, oldest first.
///
/// The count is rounded up, so any positive percentage of a non-empty list
/// selects at least one object. Percentages above 100 select everything.
#[must_use]
pub fn oldest_percent(objects: &[StorageObject], percent: f64) -> Vec<StorageObject> {
    if objects.is_empty() || percent.is_nan() || percent <= 0.0 {
        return Vec::new();
    }

    let len = objects.len();
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let count = ((len as f64) * percent.min(100.0) / 100.0).ceil() as usize;
    let count = count.clamp(1, len);

    let mut oldest: Vec<_> = sorted_newest_first(objects)
        .into_iter()
        .skip(len - count)
        .collect();
    oldest.reverse();
    oldest
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc, Weekday};
    use coldkeep_core::ObjectKey;
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn object_at(at: DateTime<Utc>) -> StorageObject {
        let key = ObjectKey::for_backup(Some("hot"), "site", "files", at, "tar.gz").unwrap();
        StorageObject::new(key, 100, at)
    }

    fn hourly(count: u32) -> Vec<StorageObject> {
        (0..count)
            .map(|h| object_at(base() + Duration::hours(i64::from(h))))
            .collect()
    }

    fn daily_from(start: DateTime<Utc>, days: i64) -> Vec<StorageObject> {
        (0..days).map(|d| object_at(start + Duration::days(d))).collect()
    }

    #[test]
    fn test_simple_overwrite_discards_single_oldest() {
        let objects = hourly(6);
        let discarded = simple_overwrite(&objects, 5);
        assert_eq!(discarded.len(), 1);
        assert_eq!(discarded[0].last_modified, base());
    }

    #[test]
    fn test_simple_overwrite_keep_exceeds_len() {
        assert!(simple_overwrite(&hourly(3), 5).is_empty());
        assert!(simple_overwrite(&hourly(3), 3).is_empty());
        assert!(simple_overwrite(&[], 0).is_empty());
    }

    #[test]
    fn test_simple_overwrite_ignores_input_order() {
        let mut objects = hourly(8);
        let expected = simple_overwrite(&objects, 3);
        objects.reverse();
        objects.swap(1, 5);
        assert_eq!(simple_overwrite(&objects, 3), expected);
    }

    #[test]
    fn test_smart_tiered_daily_only() {
        // No anchors hit: monthly anchor day 31 never appears in 10 days of
        // January starting on the 2nd, weekly anchor hits are counted daily
        // once the weekly quota is zero.
        let objects = daily_from(Utc.with_ymd_and_hms(2024, 1, 2, 3, 0, 0).unwrap(), 10);
        let policy = SmartTieredPolicy::new(3, 0, 0).with_monthly_anchor_day(31);
        let plan = smart_tiered_plan(&objects, &policy);
        assert_eq!(plan.kept.len(), 3);
        assert_eq!(plan.discarded.len(), 7);
        // Newest three retained.
        assert_eq!(plan.kept[0].0.last_modified.date_naive().to_string(), "2024-01-11");
    }

    #[test]
    fn test_smart_tiered_weekly_and_monthly_buckets() {
        // 2024-01-01 .. 2024-03-31, one backup per day at 03:00.
        let objects = daily_from(Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap(), 91);
        let policy = SmartTieredPolicy::new(7, 4, 3)
            .with_weekly_anchor(Weekday::Sun)
            .with_monthly_anchor_day(1);
        let plan = smart_tiered_plan(&objects, &policy);

        assert_eq!(plan.count(RetentionTier::Daily), 7);
        assert_eq!(plan.count(RetentionTier::Weekly), 4);
        assert_eq!(plan.count(RetentionTier::Monthly), 3);
        assert_eq!(plan.kept.len() + plan.discarded.len(), objects.len());

        for (object, tier) in &plan.kept {
            match tier {
                RetentionTier::Monthly => assert!(policy.matches_monthly(object.last_modified)),
                RetentionTier::Weekly => assert!(policy.matches_weekly(object.last_modified)),
                RetentionTier::Daily => {}
            }
        }
    }

    #[test]
    fn test_smart_tiered_monthly_wins_when_anchors_coincide() {
        // 2024-09-01 is a Sunday: both the weekly and monthly anchor.
        let sunday_first = Utc.with_ymd_and_hms(2024, 9, 1, 3, 0, 0).unwrap();
        let policy = SmartTieredPolicy::new(0, 1, 1)
            .with_weekly_anchor(Weekday::Sun)
            .with_monthly_anchor_day(1);
        let plan = smart_tiered_plan(&[object_at(sunday_first)], &policy);
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(plan.kept[0].1, RetentionTier::Monthly);
        assert_eq!(plan.count(RetentionTier::Weekly), 0);
    }

    #[test]
    fn test_smart_tiered_coinciding_anchor_falls_to_weekly_when_monthly_full() {
        let newer = object_at(Utc.with_ymd_and_hms(2024, 9, 1, 3, 0, 0).unwrap());
        let older = object_at(Utc.with_ymd_and_hms(2023, 10, 1, 3, 0, 0).unwrap());
        // 2023-10-01 is also a Sunday.
        let policy = SmartTieredPolicy::new(0, 1, 1)
            .with_weekly_anchor(Weekday::Sun)
            .with_monthly_anchor_day(1);
        let plan = smart_tiered_plan(&[older, newer], &policy);
        assert_eq!(plan.count(RetentionTier::Monthly), 1);
        assert_eq!(plan.count(RetentionTier::Weekly), 1);
        assert!(plan.discarded.is_empty());
    }

    #[test]
    fn test_smart_tiered_zero_quotas_discards_everything() {
        let objects = hourly(4);
        let discarded = smart_tiered(&objects, &SmartTieredPolicy::new(0, 0, 0));
        assert_eq!(discarded.len(), 4);
    }

    #[test]
    fn test_numeric_range_full_list_newest_first() {
        let objects = hourly(5);
        let range = NumericRange::new(1, objects.len()).unwrap();
        let selected = by_numeric_range(&objects, range).unwrap();
        assert_eq!(selected, sorted_newest_first(&objects));
    }

    #[test]
    fn test_numeric_range_end_clamped() {
        let objects = hourly(5);
        let selected = by_numeric_range(&objects, NumericRange::new(4, 100).unwrap()).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[1].last_modified, base());
    }

    #[test]
    fn test_numeric_range_start_past_end_fails() {
        let objects = hourly(3);
        let result = by_numeric_range(&objects, NumericRange::new(4, 5).unwrap());
        assert_eq!(
            result,
            Err(RetentionError::StartOutOfRange { start: 4, len: 3 })
        );
    }

    #[test]
    fn test_date_range_inclusive_endpoints() {
        let objects = hourly(10);
        let range = DateRange {
            start: base() + Duration::hours(2),
            end: base() + Duration::hours(5),
        };
        let selected = by_date_range(&objects, &range);
        assert_eq!(selected.len(), 4);
        assert_eq!(selected[0].last_modified, range.end);
        assert_eq!(selected[3].last_modified, range.start);
    }

    #[test]
    fn test_by_prefix() {
        let mut objects = hourly(3);
        let other = ObjectKey::for_backup(Some("hot"), "db", "pg", base(), "sql.gz").unwrap();
        objects.push(StorageObject::new(other, 5, base()));
        assert_eq!(by_prefix(&objects, "hot/site/").len(), 3);
        assert_eq!(by_prefix(&objects, "hot/db/").len(), 1);
        assert_eq!(by_prefix(&objects, "cold/").len(), 0);
    }

    #[test]
    fn test_oldest_percent_rounds_up() {
        let objects = hourly(10);
        let selected = oldest_percent(&objects, 15.0);
        assert_eq!(selected.len(), 2);
        // Oldest first.
        assert_eq!(selected[0].last_modified, base());
        assert_eq!(selected[1].last_modified, base() + Duration::hours(1));
    }

    #[test]
    fn test_oldest_percent_bounds() {
        let objects = hourly(4);
        assert!(oldest_percent(&objects, 0.0).is_empty());
        assert!(oldest_percent(&[], 50.0).is_empty());
        assert_eq!(oldest_percent(&objects, 1.0).len(), 1);
        assert_eq!(oldest_percent(&objects, 250.0).len(), 4);
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Distinct timestamps in arbitrary order.
    fn arb_objects() -> impl Strategy<Value = Vec<StorageObject>> {
        proptest::collection::btree_set(0i64..5_000_000, 0..40).prop_flat_map(|offsets| {
            let objects: Vec<_> = offsets
                .into_iter()
                .map(|secs| object_at(base() + Duration::seconds(secs * 60)))
                .collect();
            Just(objects).prop_shuffle()
        })
    }

    proptest! {
        #[test]
        fn prop_simple_overwrite_discards_surplus(objects in arb_objects(), keep in 0usize..50) {
            let discarded = simple_overwrite(&objects, keep);
            if keep >= objects.len() {
                prop_assert!(discarded.is_empty());
            } else {
                prop_assert_eq!(discarded.len(), objects.len() - keep);
                let retained: Vec<_> = sorted_newest_first(&objects).into_iter().take(keep).collect();
                for gone in &discarded {
                    for kept in &retained {
                        prop_assert!(gone.last_modified < kept.last_modified);
                    }
                }
            }
        }

        #[test]
        fn prop_smart_tiered_single_bucket_and_quota(
            objects in arb_objects(),
            daily in 0usize..6,
            weekly in 0usize..6,
            monthly in 0usize..6,
            anchor_day in 1u32..=31,
        ) {
            let policy = SmartTieredPolicy::new(daily, weekly, monthly)
                .with_monthly_anchor_day(anchor_day);
            let plan = smart_tiered_plan(&objects, &policy);

            prop_assert!(plan.kept.len() <= policy.total_quota());
            prop_assert!(plan.count(RetentionTier::Daily) <= daily);
            prop_assert!(plan.count(RetentionTier::Weekly) <= weekly);
            prop_assert!(plan.count(RetentionTier::Monthly) <= monthly);
            prop_assert_eq!(plan.kept.len() + plan.discarded.len(), objects.len());

            let mut keys: Vec<_> = plan.kept.iter().map(|(o, _)| o.key.clone()).collect();
            keys.extend(plan.discarded.iter().map(|o| o.key.clone()));
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), objects.len());
        }

        #[test]
        fn prop_selectors_ignore_input_order(objects in arb_objects(), keep in 0usize..10) {
            let mut reversed = objects.clone();
            reversed.reverse();
            prop_assert_eq!(simple_overwrite(&objects, keep), simple_overwrite(&reversed, keep));
            let policy = SmartTieredPolicy::new(keep, 2, 2);
            prop_assert_eq!(smart_tiered(&objects, &policy), smart_tiered(&reversed, &policy));
        }

        #[test]
        fn prop_numeric_range_full_is_everything(objects in arb_objects()) {
            prop_assume!(!objects.is_empty());
            let range = NumericRange::new(1, objects.len()).unwrap();
            let selected = by_numeric_range(&objects, range).unwrap();
            prop_assert_eq!(selected, sorted_newest_first(&objects));
        }
    }
}
