//! Timestamp codec shared by the durable store and the latest-value cache.
//!
//! Every instant that reaches storage, the cache, or a comparison goes
//! through [`normalize`]: converted to UTC and truncated to whole seconds.
//! The canonical string form is `YYYY-MM-DDTHH:MM:SSZ`, e.g.
//! `2016-07-13T10:09:56Z`. For years 0000 through 9999 it sorts
//! lexicographically in time order, which lets the SQLite backend compare
//! timestamps as text. Outside that range `%Y` gains a sign and more digits
//! and the ordering breaks, so writes reject such instants (see
//! [`check_storable`]) and range scans clamp to [`storable_range`].
//!
//! The conversion is lossy on purpose: sub-second precision and the
//! original UTC offset are not preserved, so only UTC whole-second instants
//! survive `decode(encode(ts))` unchanged.

use std::ops::RangeInclusive;

use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc};

use crate::error::TimestampError;

/// `strftime` format of the canonical timestamp string.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// `0000-01-01T00:00:00Z` as Unix seconds.
const MIN_STORABLE_SECS: i64 = -62_167_219_200;

/// `9999-12-31T23:59:59Z` as Unix seconds.
const MAX_STORABLE_SECS: i64 = 253_402_300_799;

/// Naive formats accepted by [`parse_instant`], interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Conversion of an instant into UTC.
///
/// Timezone-aware instants are converted; naive instants are taken to be
/// UTC already.
pub trait IntoUtc {
    /// Returns the instant in UTC, keeping sub-second precision.
    fn into_utc(self) -> DateTime<Utc>;
}

impl<Tz: TimeZone> IntoUtc for DateTime<Tz> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl<Tz: TimeZone> IntoUtc for &DateTime<Tz> {
    fn into_utc(self) -> DateTime<Utc> {
        self.with_timezone(&Utc)
    }
}

impl IntoUtc for NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        self.and_utc()
    }
}

impl IntoUtc for &NaiveDateTime {
    fn into_utc(self) -> DateTime<Utc> {
        self.and_utc()
    }
}

/// Drops sub-second precision.
pub fn truncate(ts: DateTime<Utc>) -> DateTime<Utc> {
    // nanosecond 0 is always representable
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Rounds up to the next whole second unless already whole.
pub fn ceil_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate(ts);
    if floor == ts {
        ts
    } else {
        floor + TimeDelta::seconds(1)
    }
}

/// Converts to UTC and drops sub-second precision.
pub fn normalize(ts: impl IntoUtc) -> DateTime<Utc> {
    truncate(ts.into_utc())
}

/// Whole-second instants whose canonical strings have a four-digit year.
pub fn storable_range() -> RangeInclusive<DateTime<Utc>> {
    let min =
        DateTime::<Utc>::from_timestamp(MIN_STORABLE_SECS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let max =
        DateTime::<Utc>::from_timestamp(MAX_STORABLE_SECS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC);
    min..=max
}

/// Normalizes `ts` and checks that it lies in [`storable_range`].
///
/// # Errors
///
/// Returns [`TimestampError::OutOfRange`] for years before 0000 or after 9999.
pub fn check_storable(ts: impl IntoUtc) -> Result<DateTime<Utc>, TimestampError> {
    let ts = normalize(ts);
    if storable_range().contains(&ts) {
        Ok(ts)
    } else {
        Err(TimestampError::OutOfRange { ts })
    }
}

/// Encodes a timezone-aware instant as its canonical string.
pub fn encode<Tz: TimeZone>(ts: &DateTime<Tz>) -> String {
    normalize(ts).format(CANONICAL_FORMAT).to_string()
}

/// Encodes a naive instant as-is, without any timezone conversion.
pub fn encode_naive(ts: &NaiveDateTime) -> String {
    let ts = ts.with_nanosecond(0).unwrap_or(*ts);
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Decodes a canonical timestamp string into a UTC instant.
///
/// # Errors
///
/// Returns [`TimestampError::Malformed`] if `s` is not in the canonical format.
pub fn decode(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    NaiveDateTime::parse_from_str(s, CANONICAL_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| TimestampError::Malformed {
            input: s.to_string(),
            source,
        })
}

/// Parses a user-supplied instant.
///
/// Accepts RFC 3339 (any offset), the canonical format, or a naive
/// `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS`, which is taken as UTC.
/// Sub-second precision is kept; callers normalize as needed.
///
/// # Errors
///
/// Returns [`TimestampError::Malformed`] with the RFC 3339 parse error if no
/// format matches.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    let s = s.trim();
    let rfc3339_err = match DateTime::parse_from_rfc3339(s) {
        Ok(ts) => return Ok(ts.with_timezone(&Utc)),
        Err(e) => e,
    };
    if let Ok(ts) = decode(s) {
        return Ok(ts);
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(TimestampError::Malformed {
        input: s.to_string(),
        source: rfc3339_err,
    })
}

/// Serde adapter storing a UTC instant as its canonical string.
///
/// Use with `#[serde(with = "okq_records::timestamp::canonical")]`.
pub mod canonical {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes `ts` with [`super::encode`].
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::encode(ts))
    }

    /// Deserializes a canonical string with [`super::decode`].
    ///
    /// # Errors
    ///
    /// Fails if the input is not a canonical timestamp string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_encode_example() {
        let ts = utc(2016, 7, 13, 10, 9, 56);
        assert_eq!(encode(&ts), "2016-07-13T10:09:56Z");
    }

    #[test]
    fn test_encode_drops_subseconds() {
        let ts = utc(2024, 1, 1, 0, 0, 0) + TimeDelta::milliseconds(999);
        assert_eq!(encode(&ts), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_encode_converts_offset_to_utc() {
        let cst = FixedOffset::east_opt(8 * 3600).unwrap();
        let ts = cst.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();
        assert_eq!(encode(&ts), "2024-01-01T00:30:00Z");
    }

    #[test]
    fn test_encode_naive_keeps_wall_clock() {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 500)
            .unwrap();
        assert_eq!(encode_naive(&naive), "2024-03-05T23:59:58Z");
    }

    #[test]
    fn test_round_trip_whole_second_utc() {
        for ts in [
            utc(1970, 1, 1, 0, 0, 0),
            utc(2016, 7, 13, 10, 9, 56),
            utc(2024, 2, 29, 23, 59, 59),
        ] {
            assert_eq!(decode(&encode(&ts)).unwrap(), ts);
        }
    }

    #[test]
    fn test_decode_rejects_other_formats() {
        assert!(decode("2024-01-01 00:00:00").is_err());
        assert!(decode("2024-01-01T00:00:00+00:00").is_err());
        assert!(decode("").is_err());
    }

    #[test]
    fn test_ceil_second() {
        let whole = utc(2024, 1, 1, 0, 0, 5);
        assert_eq!(ceil_second(whole), whole);
        assert_eq!(
            ceil_second(whole + TimeDelta::microseconds(1)),
            utc(2024, 1, 1, 0, 0, 6)
        );
    }

    #[test]
    fn test_normalize_naive_is_utc() {
        let naive = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(normalize(naive), utc(2024, 1, 1, 12, 0, 0));
    }

    #[test]
    fn test_parse_instant_formats() {
        let expected = utc(2024, 1, 1, 0, 5, 0);
        assert_eq!(parse_instant("2024-01-01T00:05:00Z").unwrap(), expected);
        assert_eq!(parse_instant("2024-01-01T08:05:00+08:00").unwrap(), expected);
        assert_eq!(parse_instant("2024-01-01T00:05:00").unwrap(), expected);
        assert_eq!(parse_instant(" 2024-01-01 00:05:00 ").unwrap(), expected);
        assert!(parse_instant("yesterday").is_err());
    }

    #[test]
    fn test_storable_range_edges() {
        let range = storable_range();
        assert_eq!(encode(range.start()), "0000-01-01T00:00:00Z");
        assert_eq!(encode(range.end()), "9999-12-31T23:59:59Z");
        assert_eq!(decode(&encode(range.end())).unwrap(), *range.end());
    }

    #[test]
    fn test_check_storable() {
        let last = utc(9999, 12, 31, 23, 0, 0);
        assert_eq!(check_storable(last + TimeDelta::milliseconds(300)).unwrap(), last);
        assert_eq!(check_storable(utc(0, 1, 1, 0, 0, 0)).unwrap(), utc(0, 1, 1, 0, 0, 0));

        // these would encode as "+10000-..." and "-0001-..."
        for ts in [utc(10000, 1, 1, 1, 0, 0), utc(-1, 12, 31, 23, 59, 59)] {
            let err = check_storable(ts).unwrap_err();
            assert!(matches!(err, TimestampError::OutOfRange { ts: rejected } if rejected == ts));
        }
    }

    #[test]
    fn test_canonical_serde() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Wrapper {
            #[serde(with = "canonical")]
            ts: DateTime<Utc>,
        }

        let value = Wrapper {
            ts: utc(2024, 1, 1, 0, 5, 0),
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"ts":"2024-01-01T00:05:00Z"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), value);
    }
}
