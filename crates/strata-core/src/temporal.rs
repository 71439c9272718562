//! How a layer's time dimension is stored.
//!
//! A layer can carry any number of temporal attributes; a record matches a
//! temporal query if any one of them matches. Each attribute knows whether
//! its column(s) store timezone-aware values and carries the data source's
//! default timezone, used to interpret timezone-naive storage.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A point or interval time dimension on a layer.
///
/// Immutable value object; constructed during discovery (or overlay merge)
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TemporalAttribute {
    /// A single timestamp or date column.
    Instant {
        field: String,
        tz_aware: bool,
        tz: Tz,
    },
    /// A start/end column pair; a null bound denotes an open-ended interval.
    Range {
        start_field: String,
        start_tz_aware: bool,
        end_field: String,
        end_tz_aware: bool,
        tz: Tz,
    },
}

/// A query instant re-expressed in the domain a stored column compares in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLiteral {
    /// Compared against timezone-aware storage; passed through unchanged.
    Aware(DateTime<Utc>),
    /// Compared against timezone-naive storage; the instant re-expressed in
    /// the source's default timezone with the zone dropped.
    Naive(NaiveDateTime),
}

/// Convert a query instant into a column's comparison domain.
pub fn align_query_time(query_time: &DateTime<Utc>, tz_aware: bool, tz: Tz) -> TimeLiteral {
    if tz_aware {
        TimeLiteral::Aware(*query_time)
    } else {
        TimeLiteral::Naive(query_time.with_timezone(&tz).naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_aware_column_passes_query_through() {
        let query = Utc.with_ymd_and_hms(2020, 10, 1, 12, 0, 0).unwrap();
        assert_eq!(
            align_query_time(&query, true, chrono_tz::Australia::Sydney),
            TimeLiteral::Aware(query)
        );
    }

    #[test]
    fn test_naive_column_reexpresses_query_in_default_zone() {
        // 2020-10-01T12:00:00Z is 22:00 in Sydney (AEST+10, no DST yet on Oct 1)
        let query = Utc.with_ymd_and_hms(2020, 10, 1, 12, 0, 0).unwrap();
        let aligned = align_query_time(&query, false, chrono_tz::Australia::Sydney);
        assert_eq!(
            aligned,
            TimeLiteral::Naive(
                chrono::NaiveDate::from_ymd_opt(2020, 10, 1)
                    .unwrap()
                    .and_hms_opt(22, 0, 0)
                    .unwrap()
            )
        );
    }

    #[test]
    fn test_utc_default_zone_drops_offset_only() {
        let query = Utc.with_ymd_and_hms(2021, 8, 4, 15, 2, 59).unwrap();
        assert_eq!(
            align_query_time(&query, false, chrono_tz::UTC),
            TimeLiteral::Naive(query.naive_utc())
        );
    }
}
