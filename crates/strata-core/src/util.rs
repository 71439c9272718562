use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Render a timestamp as RFC3339 in UTC with second precision ("Z" suffix).
pub fn datetime_as_rfc3339<Tz: TimeZone>(datetime: &DateTime<Tz>) -> String {
    datetime
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time as RFC3339 in UTC with second precision.
pub fn now_as_rfc3339() -> String {
    datetime_as_rfc3339(&Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_rfc3339_rendered_in_utc() {
        let offset = FixedOffset::east_opt(10 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2021, 8, 5, 1, 2, 59).unwrap();
        assert_eq!(datetime_as_rfc3339(&local), "2021-08-04T15:02:59Z");
    }

    #[test]
    fn test_rfc3339_second_precision() {
        let instant = Utc.with_ymd_and_hms(2020, 10, 1, 0, 0, 0).unwrap();
        assert_eq!(datetime_as_rfc3339(&instant), "2020-10-01T00:00:00Z");
    }
}
