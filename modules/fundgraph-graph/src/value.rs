//! Conversion boundary between Bolt values and Rust values.
//!
//! Every row read in this crate goes through these helpers. Numbers in
//! particular may come back as Bolt integers or floats depending on how they
//! were written (`sum()` over integers, literals in migrations, ...); callers
//! always see `f64` or `i64`.

use chrono::{DateTime, Utc};
use neo4rs::{BoltNull, BoltType, Row};

/// Numeric cell as `f64`, accepting either integer or float encodings.
pub fn number(row: &Row, key: &str) -> Option<f64> {
    if let Ok(v) = row.get::<f64>(key) {
        return Some(v);
    }
    row.get::<i64>(key).ok().map(|v| v as f64)
}

/// Numeric cell defaulting to zero, for counts and sums.
pub fn number_or_zero(row: &Row, key: &str) -> f64 {
    number(row, key).unwrap_or(0.0)
}

/// Integer cell, accepting a float encoding of a whole number.
pub fn integer(row: &Row, key: &str) -> Option<i64> {
    if let Ok(v) = row.get::<i64>(key) {
        return Some(v);
    }
    row.get::<f64>(key)
        .ok()
        .filter(|v| v.fract() == 0.0)
        .map(|v| v as i64)
}

pub fn count(row: &Row, key: &str) -> u64 {
    integer(row, key).unwrap_or(0).max(0) as u64
}

pub fn string(row: &Row, key: &str) -> Option<String> {
    row.get::<String>(key).ok()
}

pub fn string_list(row: &Row, key: &str) -> Vec<String> {
    row.get::<Vec<String>>(key).unwrap_or_default()
}

pub fn boolean(row: &Row, key: &str) -> bool {
    row.get::<bool>(key).unwrap_or(false)
}

/// Read an optional datetime, handling both Neo4j DateTime types (written via
/// Cypher `datetime()`) and plain string values.
pub fn datetime(row: &Row, key: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = row.get::<DateTime<chrono::FixedOffset>>(key) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = row.get::<chrono::NaiveDateTime>(key) {
        return Some(ndt.and_utc());
    }
    row.get::<String>(key).ok().and_then(|s| parse_datetime(&s))
}

/// Format for Cypher's `datetime()`: no offset suffix, microsecond precision.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc)))
}

/// Optional parameter: `None` becomes a Bolt null so Cypher `IS NULL` guards work.
pub fn opt<T: Into<BoltType>>(value: Option<T>) -> BoltType {
    match value {
        Some(v) => v.into(),
        None => BoltType::Null(BoltNull),
    }
}

/// Optional string parameter; blank strings count as absent.
pub fn opt_str(value: Option<&str>) -> BoltType {
    opt(value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
}

/// List parameter; an empty list counts as absent.
pub fn opt_list(values: &[String]) -> BoltType {
    if values.is_empty() {
        BoltType::Null(BoltNull)
    } else {
        values.to_vec().into()
    }
}

/// Optional datetime parameter, formatted for `datetime()`.
pub fn opt_datetime(value: Option<&DateTime<Utc>>) -> BoltType {
    opt(value.map(format_datetime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_format_round_trips() {
        let dt = DateTime::parse_from_rfc3339("2025-03-04T05:06:07.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let s = format_datetime(&dt);
        assert_eq!(s, "2025-03-04T05:06:07.123456");
        assert_eq!(parse_datetime(&s), Some(dt));
    }

    #[test]
    fn parse_accepts_rfc3339_and_rejects_garbage() {
        assert!(parse_datetime("2025-01-01T00:00:00Z").is_some());
        assert!(parse_datetime("").is_none());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn blank_and_empty_params_are_null() {
        assert!(matches!(opt_str(Some("   ")), BoltType::Null(_)));
        assert!(matches!(opt_str(None), BoltType::Null(_)));
        assert!(matches!(opt_list(&[]), BoltType::Null(_)));
        assert!(matches!(opt(Some(1.5f64)), BoltType::Float(_)));
    }
}
