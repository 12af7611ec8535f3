//! Retention ages (`max_age`).
//!
//! A max age can be written three ways:
//!
//! - a non-negative number of seconds (`max_age = 86400` or `max_age = 1.5`)
//! - an ISO-8601-style duration string (`max_age = "P1D"`, `"pt30m"`, `"P1Y2M3WT4H"`)
//! - an already-typed `std::time::Duration` in its serde form (`{ secs, nanos }`)
//!
//! Calendar units are fixed: a year is 365 days and a month is 30 days.

use std::{fmt, time::Duration};

use serde::{
    Deserializer, Serializer,
    de::{self, MapAccess, Visitor},
};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Errors produced while reading a duration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationError {
    #[error("'{0}' is not a valid duration (expected P[nY][nM][nW][nD][T[nH][nM][nS]])")]
    Invalid(String),

    #[error("Duration must not be negative")]
    Negative,

    #[error("Duration {0} seconds cannot be represented")]
    OutOfRange(String),
}

/// Parse `P[nY][nM][nW][nD][T[nH][nM][nS]]`, case-insensitive.
///
/// `P` alone is rejected, as is a `T` separator with no time component after it.
pub fn parse_iso8601(input: &str) -> Result<Duration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let upper = input.trim().to_ascii_uppercase();
    let rest = upper.strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut seconds = 0u64;
    sum_components(
        date,
        &[('Y', 365 * DAY), ('M', 30 * DAY), ('W', 7 * DAY), ('D', DAY)],
        &mut seconds,
    )
    .ok_or_else(invalid)?;

    if let Some(time) = time {
        if !time.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(invalid());
        }
        sum_components(time, &[('H', HOUR), ('M', MINUTE), ('S', 1)], &mut seconds)
            .ok_or_else(invalid)?;
    }

    Ok(Duration::from_secs(seconds))
}

/// Walk `<digits><designator>` pairs in `units` order, each unit at most once.
fn sum_components(mut s: &str, units: &[(char, u64)], total: &mut u64) -> Option<()> {
    let mut next_unit = 0;
    while !s.is_empty() {
        let digits = s.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let value: u64 = s[..digits].parse().ok()?;
        let designator = s[digits..].chars().next()?;

        let offset = units[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == designator)?;
        let (_, scale) = units[next_unit + offset];
        next_unit += offset + 1;

        *total = total.checked_add(value.checked_mul(scale)?)?;
        s = &s[digits + designator.len_utf8()..];
    }
    Some(())
}

/// Render a duration in the same notation `parse_iso8601` accepts.
pub fn format_iso8601(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    if secs == 0 {
        return "PT0S".to_string();
    }

    let days = secs / DAY;
    secs %= DAY;
    let hours = secs / HOUR;
    secs %= HOUR;
    let minutes = secs / MINUTE;
    secs %= MINUTE;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours > 0 || minutes > 0 || secs > 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if secs > 0 {
            out.push_str(&format!("{secs}S"));
        }
    }
    out
}

struct MaxAgeVisitor;

impl<'de> Visitor<'de> for MaxAgeVisitor {
    type Value = Option<Duration>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number of seconds, an ISO-8601 duration string or a duration")
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(MaxAgeVisitor)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(Duration::from_secs(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        u64::try_from(v)
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| E::custom(DurationError::Negative))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v < 0.0 {
            return Err(E::custom(DurationError::Negative));
        }
        Duration::try_from_secs_f64(v)
            .map(Some)
            .map_err(|_| E::custom(DurationError::OutOfRange(v.to_string())))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        parse_iso8601(v).map(Some).map_err(E::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut secs: Option<u64> = None;
        let mut nanos: Option<u32> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "secs" => secs = Some(map.next_value()?),
                "nanos" => nanos = Some(map.next_value()?),
                other => return Err(de::Error::unknown_field(other, &["secs", "nanos"])),
            }
        }
        let secs = secs.ok_or_else(|| de::Error::missing_field("secs"))?;
        Ok(Some(Duration::new(secs, nanos.unwrap_or(0))))
    }
}

/// `deserialize_with` for `Option<Duration>` fields.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_option(MaxAgeVisitor)
}

/// `serialize_with` for `Option<Duration>` fields.
pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(duration) => serializer.serialize_str(&format_iso8601(*duration)),
        None => serializer.serialize_none(),
    }
}
