//! Numeric and date range parsing for ad-hoc selection.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::error::{RetentionError, RetentionResult};

/// An inclusive, 1-based position range (`"3-7"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericRange {
    /// First position, at least 1.
    pub start: usize,
    /// Last position, at least `start`.
    pub end: usize,
}

impl NumericRange {
    /// Creates a range, validating `1 <= start <= end`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::InvalidRange`] if the bounds are invalid.
    pub fn new(start: usize, end: usize) -> RetentionResult<Self> {
        let input = format!("{start}-{end}");
        if start == 0 {
            return Err(RetentionError::InvalidRange {
                input,
                reason: "start must be at least 1",
            });
        }
        if end < start {
            return Err(RetentionError::InvalidRange {
                input,
                reason: "end must not be less than start",
            });
        }
        Ok(Self { start, end })
    }

    /// Parses `"start-end"`, or a single `"n"` meaning `n-n`.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::InvalidRange`] on malformed input, a zero
    /// start, or an end before the start.
    pub fn parse(input: &str) -> RetentionResult<Self> {
        let trimmed = input.trim();
        let (start, end) = match trimmed.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (trimmed, trimmed),
        };

        let parse = |value: &str| {
            value.parse::<usize>().map_err(|_| RetentionError::InvalidRange {
                input: input.to_string(),
                reason: "expected positive integers in the form start-end",
            })
        };
        let start = parse(start)?;
        let end = parse(end)?;

        Self::new(start, end).map_err(|e| match e {
            RetentionError::InvalidRange { reason, .. } => RetentionError::InvalidRange {
                input: input.to_string(),
                reason,
            },
            other => other,
        })
    }
}

/// An inclusive modification-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// Earliest included instant.
    pub start: DateTime<Utc>,
    /// Latest included instant.
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Parses a window from two date strings.
    ///
    /// Each bound accepts RFC 3339 (`2024-05-01T10:00:00Z`) or a bare date
    /// (`2024-05-01`). A bare start means the start of that day; a bare end
    /// means the last instant of that day.
    ///
    /// # Errors
    ///
    /// Returns an error if either bound is unparseable or `end < start`.
    pub fn parse(start: &str, end: &str) -> RetentionResult<Self> {
        let start_at = parse_bound(start, NaiveTime::default())?;
        let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap_or_default();
        let end_at = parse_bound(end, end_of_day)?;

        if end_at < start_at {
            return Err(RetentionError::InvertedDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        Ok(Self {
            start: start_at,
            end: end_at,
        })
    }

    /// Returns true if `at` lies within the window, endpoints included.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

fn parse_bound(input: &str, date_only_time: NaiveTime) -> RetentionResult<DateTime<Utc>> {
    let trimmed = input.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|date| date.and_time(date_only_time).and_utc())
        .map_err(|_| RetentionError::InvalidDate {
            input: input.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_numeric_range() {
        assert_eq!(
            NumericRange::parse("1-10").unwrap(),
            NumericRange { start: 1, end: 10 }
        );
        assert_eq!(
            NumericRange::parse(" 4 - 4 ").unwrap(),
            NumericRange { start: 4, end: 4 }
        );
        assert_eq!(
            NumericRange::parse("3").unwrap(),
            NumericRange { start: 3, end: 3 }
        );
    }

    #[test]
    fn test_parse_numeric_range_zero_start_fails() {
        let err = NumericRange::parse("0-5").unwrap_err();
        assert!(matches!(err, RetentionError::InvalidRange { ref input, .. } if input == "0-5"));
    }

    #[test]
    fn test_parse_numeric_range_inverted_fails() {
        assert!(matches!(
            NumericRange::parse("10-5"),
            Err(RetentionError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_parse_numeric_range_garbage_fails() {
        assert!(NumericRange::parse("a-b").is_err());
        assert!(NumericRange::parse("").is_err());
        assert!(NumericRange::parse("-3").is_err());
    }

    #[test]
    fn test_date_range_expands_date_only_end() {
        let range = DateRange::parse("2024-05-01", "2024-05-02").unwrap();
        assert_eq!(range.start, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 5, 2, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_date_range_rfc3339() {
        let range = DateRange::parse("2024-05-01T10:00:00Z", "2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(range.end, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
        assert!(range.contains(range.start));
        assert!(range.contains(range.end));
    }

    #[test]
    fn test_date_range_inverted() {
        assert!(matches!(
            DateRange::parse("2024-05-02", "2024-05-01"),
            Err(RetentionError::InvertedDateRange { .. })
        ));
    }

    #[test]
    fn test_date_range_same_day() {
        let range = DateRange::parse("2024-05-01", "2024-05-01").unwrap();
        assert!(range.contains(Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap()));
    }

    #[test]
    fn test_date_range_invalid() {
        assert!(matches!(
            DateRange::parse("yesterday", "2024-05-01"),
            Err(RetentionError::InvalidDate { .. })
        ));
    }
}
