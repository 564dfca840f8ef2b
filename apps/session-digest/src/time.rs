use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::Deserialize;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Timestamp as it appears in a session export: a string in RFC 3339 or
/// database form, or epoch milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Str(String),
    Int(i64),
    Float(f64),
}

impl RawTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Str(s) => parse_timestamp(s),
            RawTimestamp::Int(ms) => millis_to_dt(*ms),
            RawTimestamp::Float(ms) => millis_to_dt(*ms as i64),
        }
    }
}

/// Database exports carry naive timestamps; those are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(trimmed, format)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    })
}

fn millis_to_dt(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// `2022-02-05T19:02:14Z`
pub fn format_utc_seconds(dt: &DateTime<Utc>) -> String {
    dt.trunc_subsecs(0).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Serde adapter writing instants with second precision and a `Z` suffix.
pub mod utc_seconds {
    use super::{format_utc_seconds, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_utc_seconds(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw}")))
    }

    pub mod option {
        use super::super::{format_utc_seconds, parse_timestamp};
        use chrono::{DateTime, Utc};
        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => serializer.serialize_some(&format_utc_seconds(dt)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => parse_timestamp(&raw)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid timestamp {raw}"))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_database_and_rfc3339_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01 09:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 09:00:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T09:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T10:00:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn epoch_millis_round_to_instants() {
        let ts = RawTimestamp::Int(1_709_283_600_000);
        assert_eq!(
            ts.to_datetime(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn formats_without_subseconds() {
        let dt = Utc.timestamp_opt(1_709_283_600, 123_000_000).unwrap();
        assert_eq!(format_utc_seconds(&dt), "2024-03-01T09:00:00Z");
    }
}
