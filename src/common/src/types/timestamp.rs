use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Format used for `JobCreateTime` on the wire.
pub const WIRE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Creation time of a job as submitted by a caller.
///
/// Callers send either a date-time string or a sentinel integer (usually `-1`)
/// meaning "unset". Anything that does not parse is kept as `Invalid` with the
/// raw value so it can be reported, and never reaches the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum JobTimestamp {
    Valid(DateTime<Utc>),
    Invalid(Value),
}

impl JobTimestamp {
    pub fn sentinel() -> Self {
        JobTimestamp::Invalid(Value::from(-1))
    }

    pub fn from_wire(value: Value) -> Self {
        match value {
            Value::String(text) => match parse_timestamp(&text) {
                Some(ts) => JobTimestamp::Valid(ts),
                None => JobTimestamp::Invalid(Value::String(text)),
            },
            other => JobTimestamp::Invalid(other),
        }
    }

    pub fn to_wire(&self) -> Value {
        match self {
            JobTimestamp::Valid(ts) => Value::String(ts.format(WIRE_TIME_FORMAT).to_string()),
            JobTimestamp::Invalid(raw) => raw.clone(),
        }
    }

    pub fn valid(&self) -> Option<DateTime<Utc>> {
        match self {
            JobTimestamp::Valid(ts) => Some(*ts),
            JobTimestamp::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, JobTimestamp::Valid(_))
    }
}

impl From<DateTime<Utc>> for JobTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        JobTimestamp::Valid(ts)
    }
}

impl fmt::Display for JobTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobTimestamp::Valid(ts) => write!(f, "{}", ts.format(WIRE_TIME_FORMAT)),
            JobTimestamp::Invalid(raw) => write!(f, "{}", raw),
        }
    }
}

impl Serialize for JobTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(JobTimestamp::from_wire)
    }
}

/// Parses a wire timestamp. RFC 3339 strings keep their offset; naive
/// `YYYY-MM-DD HH:MM:SS` strings (optionally with `T` and fractional seconds)
/// are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_parses_wire_format_as_utc() {
        let ts = parse_timestamp("2025-08-27 14:33:00").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 8, 27));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 33, 0));
    }

    #[rstest]
    #[case::t_separator("2025-08-27T14:33:00")]
    #[case::fractional("2025-08-27 14:33:00.250")]
    #[case::rfc3339_utc("2025-08-27T14:33:00Z")]
    #[case::padded("  2025-08-27 14:33:00 ")]
    fn test_accepts_iso_like_variants(#[case] text: &str) {
        let ts = parse_timestamp(text).expect("timestamp should parse");
        assert_eq!(ts.format(WIRE_TIME_FORMAT).to_string(), "2025-08-27 14:33:00");
    }

    #[test]
    fn test_rfc3339_offset_is_normalized() {
        let ts = parse_timestamp("2025-08-27T16:33:00+02:00").unwrap();
        assert_eq!(ts.format(WIRE_TIME_FORMAT).to_string(), "2025-08-27 14:33:00");
    }

    #[rstest]
    #[case::sentinel(json!(-1))]
    #[case::other_integer(json!(1724769180))]
    #[case::garbage_text(json!("yesterday"))]
    #[case::impossible_date(json!("2025-02-30 10:00:00"))]
    #[case::boolean(json!(true))]
    #[case::object(json!({"at": "2025-08-27 14:33:00"}))]
    fn test_unparseable_values_are_invalid(#[case] raw: Value) {
        let ts = JobTimestamp::from_wire(raw.clone());
        assert_eq!(ts, JobTimestamp::Invalid(raw));
        assert!(ts.valid().is_none());
    }

    #[test]
    fn test_wire_representation() {
        let ts = JobTimestamp::from_wire(json!("2025-08-27 14:33:00"));
        assert!(ts.is_valid());
        assert_eq!(ts.to_wire(), json!("2025-08-27 14:33:00"));
        assert_eq!(JobTimestamp::sentinel().to_wire(), json!(-1));
        assert_eq!(JobTimestamp::sentinel().to_string(), "-1");
    }
}
