//! Half-open UTC time ranges.
//!
//! Every reason slot covers a `[lower, upper)` range that is never empty.
//! The type enforces that at construction so the engine never has to
//! re-check it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::domain::errors::{DomainError, DomainResult};

/// A non-empty half-open time range `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimeRange {
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty or inverted bounds.
    pub fn new(lower: DateTime<Utc>, upper: DateTime<Utc>) -> DomainResult<Self> {
        if lower >= upper {
            return Err(DomainError::EmptyRange { lower, upper });
        }
        Ok(Self { lower, upper })
    }

    /// Build a range from a start and a positive duration.
    pub fn starting_at(lower: DateTime<Utc>, duration: Duration) -> DomainResult<Self> {
        Self::new(lower, lower + duration)
    }

    pub const fn lower(&self) -> DateTime<Utc> {
        self.lower
    }

    pub const fn upper(&self) -> DateTime<Utc> {
        self.upper
    }

    pub fn duration(&self) -> Duration {
        self.upper - self.lower
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.lower <= at && at < self.upper
    }

    /// `other ⊆ self`
    pub fn contains_range(&self, other: &Self) -> bool {
        self.lower <= other.lower && other.upper <= self.upper
    }

    /// `other ⊊ self`
    pub fn strictly_contains_range(&self, other: &Self) -> bool {
        self.contains_range(other) && self != other
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    /// `self` ends exactly where `other` starts.
    pub fn meets(&self, other: &Self) -> bool {
        self.upper == other.lower
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        (lower < upper).then_some(Self { lower, upper })
    }

    /// Union of two ranges that overlap or meet.
    pub fn span(&self, other: &Self) -> Option<Self> {
        if self.overlaps(other) || self.meets(other) || other.meets(self) {
            Some(Self {
                lower: self.lower.min(other.lower),
                upper: self.upper.max(other.upper),
            })
        } else {
            None
        }
    }

    /// Pieces of `self` not covered by `inner`, in chronological order.
    ///
    /// Returns at most two ranges (before and after).
    pub fn difference(&self, inner: &Self) -> Vec<Self> {
        let mut pieces = Vec::with_capacity(2);
        if !self.overlaps(inner) {
            pieces.push(*self);
            return pieces;
        }
        if self.lower < inner.lower {
            pieces.push(Self {
                lower: self.lower,
                upper: inner.lower,
            });
        }
        if inner.upper < self.upper {
            pieces.push(Self {
                lower: inner.upper,
                upper: self.upper,
            });
        }
        pieces
    }

    /// Split at an interior instant.
    pub fn split_at(&self, at: DateTime<Utc>) -> Option<(Self, Self)> {
        if self.lower < at && at < self.upper {
            Some((
                Self {
                    lower: self.lower,
                    upper: at,
                },
                Self {
                    lower: at,
                    upper: self.upper,
                },
            ))
        } else {
            None
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.lower.to_rfc3339(),
            self.upper.to_rfc3339()
        )
    }
}

#[derive(Deserialize)]
struct RawTimeRange {
    lower: DateTime<Utc>,
    upper: DateTime<Utc>,
}

impl<'de> Deserialize<'de> for TimeRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawTimeRange::deserialize(deserializer)?;
        Self::new(raw.lower, raw.upper).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn range(a: i64, b: i64) -> TimeRange {
        TimeRange::new(t(a), t(b)).unwrap()
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(TimeRange::new(t(10), t(10)).is_err());
        assert!(TimeRange::new(t(10), t(5)).is_err());
    }

    #[test]
    fn test_half_open_contains() {
        let r = range(0, 10);
        assert!(r.contains(t(0)));
        assert!(r.contains(t(9)));
        assert!(!r.contains(t(10)));
    }

    #[test]
    fn test_meeting_ranges_do_not_overlap() {
        assert!(!range(0, 10).overlaps(&range(10, 20)));
        assert!(range(0, 10).meets(&range(10, 20)));
        assert_eq!(range(0, 10).span(&range(10, 20)), Some(range(0, 20)));
        assert_eq!(range(0, 10).span(&range(11, 20)), None);
    }

    #[test]
    fn test_difference_middle() {
        let pieces = range(0, 100).difference(&range(40, 60));
        assert_eq!(pieces, vec![range(0, 40), range(60, 100)]);
    }

    #[test]
    fn test_difference_prefix_and_disjoint() {
        assert_eq!(range(0, 100).difference(&range(0, 50)), vec![range(50, 100)]);
        assert_eq!(range(0, 10).difference(&range(20, 30)), vec![range(0, 10)]);
        assert!(range(0, 10).difference(&range(0, 10)).is_empty());
    }

    #[test]
    fn test_deserialize_rejects_empty() {
        let json = r#"{"lower":"2024-01-01T00:00:00Z","upper":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<TimeRange>(json).is_err());
    }
}
