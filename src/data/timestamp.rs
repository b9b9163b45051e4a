//! Lenient timestamp parsing
//!
//! Every timestamp-bearing column is parsed to a UTC instant. Values that do
//! not parse become missing instead of failing the load.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Epoch values above this are read as milliseconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp cell; naive values are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(epoch) = value.parse::<f64>() {
        return from_epoch(epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // pandas writes "+00:00" offsets but some exports end in a bare "Z" or " UTC"
    let normalized = value.trim_end_matches(" UTC").trim_end_matches('Z');

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(normalized, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(normalized, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn from_epoch(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    let millis = if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    DateTime::from_timestamp_millis(millis.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_timestamp("2024-01-02T03:04:05Z"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
        assert_eq!(parse_timestamp("2024-01-02T05:04:05+02:00"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
    }

    #[test]
    fn test_parse_pandas_style() {
        assert_eq!(parse_timestamp("2024-01-02 03:04:05+00:00"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
        let ts = parse_timestamp("2024-01-02 03:04:05.250+00:00").unwrap();
        assert_eq!(ts.nanosecond(), 250_000_000);
    }

    #[test]
    fn test_parse_naive_as_utc() {
        assert_eq!(parse_timestamp("2024-01-02 03:04:05"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
        assert_eq!(parse_timestamp("2024-01-02 03:04:05 UTC"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
        let date = parse_timestamp("2024-01-02").unwrap();
        assert_eq!((date.year(), date.month(), date.day(), date.hour()), (2024, 1, 2, 0));
    }

    #[test]
    fn test_parse_epochs() {
        assert_eq!(parse_timestamp("1704164645000"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
        assert_eq!(parse_timestamp("1704164645"), Some(ymd_hms(2024, 1, 2, 3, 4, 5)));
    }

    #[test]
    fn test_unparsable_is_missing() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a time"), None);
        assert_eq!(parse_timestamp("NaT"), None);
        assert_eq!(parse_timestamp("2024-13-45 00:00:00"), None);
    }
}
