//! Timestamps and durations.
//!
//! RRSIG inception and expiration are 32 bit UNIX timestamps on the wire;
//! the XML interchange format writes them as RFC 3339 date-times and writes
//! validity periods as ISO 8601 durations. [`Timestamp`] keeps the wire
//! representation and converts at the edges, so signature input is always
//! derived from the exact value that will be emitted.

use serde::de;
use std::fmt;
use std::ops;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

//------------ Timestamp -----------------------------------------------------

/// A point in time as seconds since the UNIX epoch.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Timestamp(u32);

impl Timestamp {
    /// Creates a timestamp from raw UNIX seconds.
    pub const fn from_unix(secs: u32) -> Self {
        Timestamp(secs)
    }

    /// Returns the raw UNIX seconds.
    pub const fn into_int(self) -> u32 {
        self.0
    }

    /// Creates a timestamp from a date-time.
    ///
    /// Fails if the value lies outside the 32 bit UNIX range.
    pub fn from_datetime(when: OffsetDateTime) -> Result<Self, TimeError> {
        let secs = when.unix_timestamp();
        u32::try_from(secs)
            .map(Timestamp)
            .map_err(|_| TimeError::OutOfRange)
    }

    /// Returns the timestamp as a date-time in UTC.
    pub fn to_datetime(self) -> OffsetDateTime {
        // Every u32 is a valid UNIX timestamp.
        OffsetDateTime::from_unix_timestamp(self.0.into())
            .expect("u32 timestamp in range")
    }

    /// The signed distance from `earlier` to `self`.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::seconds(i64::from(self.0) - i64::from(earlier.0))
    }

    /// Adds a duration, failing on over- or underflow.
    pub fn checked_add(self, duration: Duration) -> Option<Timestamp> {
        let secs = i64::from(self.0) + duration.whole_seconds();
        u32::try_from(secs).ok().map(Timestamp)
    }

    /// Subtracts a duration, failing on over- or underflow.
    pub fn checked_sub(self, duration: Duration) -> Option<Timestamp> {
        self.checked_add(-duration)
    }
}

//--- FromStr and Display

impl FromStr for Timestamp {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let when = OffsetDateTime::parse(s, &Rfc3339)
            .map_err(|_| TimeError::BadDateTime)?;
        Self::from_datetime(when)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let formatted = self
            .to_datetime()
            .format(&Rfc3339)
            .map_err(|_| fmt::Error)?;
        f.write_str(&formatted)
    }
}

//--- Arithmetic

impl ops::Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        self.duration_since(rhs)
    }
}

//--- Deserialize

impl<'de> de::Deserialize<'de> for Timestamp {
    fn deserialize<D: de::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an RFC 3339 date-time")
            }

            fn visit_str<E: de::Error>(
                self,
                v: &str,
            ) -> Result<Self::Value, E> {
                v.parse().map_err(|err| {
                    E::custom(format!("bad date-time '{}': {}", v, err))
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

//------------ ISO 8601 Durations --------------------------------------------

/// Parses an ISO 8601 duration.
///
/// Week, day, hour, minute and second designators are accepted. Year and
/// month designators are rejected: their length depends on the calendar,
/// which has no place in signature validity arithmetic.
pub fn parse_duration(s: &str) -> Result<Duration, TimeError> {
    let mut chars = s.chars().peekable();
    if chars.next() != Some('P') {
        return Err(TimeError::BadDuration);
    }

    let mut secs: i64 = 0;
    let mut in_time = false;
    let mut seen_part = false;

    while let Some(&ch) = chars.peek() {
        if ch == 'T' {
            if in_time {
                return Err(TimeError::BadDuration);
            }
            in_time = true;
            chars.next();
            continue;
        }

        let mut value: i64 = 0;
        let mut digits = 0;
        while let Some(&digit) = chars.peek() {
            let Some(d) = digit.to_digit(10) else { break };
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(d.into()))
                .ok_or(TimeError::BadDuration)?;
            digits += 1;
            chars.next();
        }
        if digits == 0 {
            return Err(TimeError::BadDuration);
        }

        let unit = chars.next().ok_or(TimeError::BadDuration)?;
        let factor = match (unit, in_time) {
            ('W', false) => 7 * 86_400,
            ('D', false) => 86_400,
            ('H', true) => 3_600,
            ('M', true) => 60,
            ('S', true) => 1,
            // 'Y' always, 'M' outside a time part.
            _ => return Err(TimeError::BadDuration),
        };
        secs = value
            .checked_mul(factor)
            .and_then(|v| secs.checked_add(v))
            .ok_or(TimeError::BadDuration)?;
        seen_part = true;
    }

    if !seen_part {
        return Err(TimeError::BadDuration);
    }
    Ok(Duration::seconds(secs))
}

/// Formats a duration as an ISO 8601 duration string.
///
/// The output uses day, hour, minute and second designators, never weeks,
/// so that a given duration always formats the same way.
pub fn fmt_duration(duration: Duration) -> String {
    let mut secs = duration.whole_seconds();
    let mut res = String::new();
    if secs < 0 {
        res.push('-');
        secs = -secs;
    }
    res.push('P');

    let days = secs / 86_400;
    secs %= 86_400;
    if days > 0 {
        res.push_str(&format!("{}D", days));
    }
    if secs > 0 {
        res.push('T');
        let hours = secs / 3_600;
        let mins = secs % 3_600 / 60;
        let rest = secs % 60;
        if hours > 0 {
            res.push_str(&format!("{}H", hours));
        }
        if mins > 0 {
            res.push_str(&format!("{}M", mins));
        }
        if rest > 0 {
            res.push_str(&format!("{}S", rest));
        }
    } else if days == 0 {
        res.push_str("T0S");
    }
    res
}

/// Deserializes a `time::Duration` from an ISO 8601 string.
///
/// For use with `#[serde(deserialize_with = ...)]` on policy fields.
pub fn de_duration<'de, D: de::Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    struct Visitor;

    impl de::Visitor<'_> for Visitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an ISO 8601 duration")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_duration(v).map_err(|err| {
                E::custom(format!("bad duration '{}': {}", v, err))
            })
        }
    }

    deserializer.deserialize_str(Visitor)
}

//============ Error Types ===================================================

//------------ TimeError -----------------------------------------------------

/// An error in parsing or converting a time value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeError {
    /// The value is not a valid RFC 3339 date-time.
    BadDateTime,

    /// The value is not an acceptable ISO 8601 duration.
    BadDuration,

    /// The value lies outside the 32 bit UNIX timestamp range.
    OutOfRange,
}

//--- Display and Error

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TimeError::BadDateTime => f.write_str("invalid date-time"),
            TimeError::BadDuration => f.write_str("invalid duration"),
            TimeError::OutOfRange => {
                f.write_str("timestamp outside the 32 bit UNIX range")
            }
        }
    }
}

impl std::error::Error for TimeError {}

//============ Test ==========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timestamp_round_trip() {
        let ts: Timestamp = "2018-01-01T00:00:00Z".parse().unwrap();
        assert_eq!(ts.into_int(), 1514764800);
        assert_eq!(ts.to_string(), "2018-01-01T00:00:00Z");

        let ts: Timestamp = "2018-01-01T00:00:00+00:00".parse().unwrap();
        assert_eq!(ts.into_int(), 1514764800);

        assert!("not-a-date".parse::<Timestamp>().is_err());
        assert!("1969-12-31T23:59:59Z".parse::<Timestamp>().is_err());
    }

    #[test]
    fn timestamp_arithmetic() {
        let a = Timestamp::from_unix(1000);
        let b = Timestamp::from_unix(4000);
        assert_eq!(b - a, Duration::seconds(3000));
        assert_eq!(a - b, Duration::seconds(-3000));
        assert_eq!(
            a.checked_add(Duration::seconds(500)),
            Some(Timestamp::from_unix(1500))
        );
        assert_eq!(a.checked_sub(Duration::seconds(2000)), None);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("P10D").unwrap(), Duration::days(10));
        assert_eq!(parse_duration("P2W").unwrap(), Duration::days(14));
        assert_eq!(parse_duration("PT3600S").unwrap(), Duration::hours(1));
        assert_eq!(
            parse_duration("P1DT2H3M4S").unwrap(),
            Duration::seconds(86_400 + 2 * 3_600 + 3 * 60 + 4)
        );
        assert_eq!(parse_duration("PT0S").unwrap(), Duration::ZERO);

        assert!(parse_duration("").is_err());
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("10D").is_err());
        assert!(parse_duration("P1Y").is_err());
        assert!(parse_duration("P1M").is_err());
        assert!(parse_duration("P1D2H").is_err());

        assert_eq!(fmt_duration(Duration::days(10)), "P10D");
        assert_eq!(fmt_duration(Duration::hours(1)), "PT1H");
        assert_eq!(fmt_duration(Duration::ZERO), "PT0S");
        assert_eq!(
            fmt_duration(Duration::seconds(86_400 + 2 * 3_600 + 4)),
            "P1DT2H4S"
        );

        // Emission is canonical: whatever spelling came in, the value
        // formats the same way.
        let parsed = parse_duration("PT240H").unwrap();
        assert_eq!(fmt_duration(parsed), "P10D");
    }
}
