use crate::error::{ConfigError, Result};
use std::time::Duration;

const NANOS_PER_MILLI: f64 = 1_000_000.0;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Parse a duration string (e.g., "500ms", "10s", "5m", "1h", "1m30s", "1.5s")
///
/// A bare `"0"` is accepted as zero. Negative values are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let input = s.trim();
    if input.is_empty() {
        return Err(ConfigError::invalid_duration(s, "empty string"));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let is_numeric = |c: char| c.is_ascii_digit() || c == '.';

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let num_end = rest.find(|c: char| !is_numeric(c)).ok_or_else(|| {
            ConfigError::invalid_duration(s, format!("missing unit after '{}'", rest))
        })?;
        if num_end == 0 {
            return Err(ConfigError::invalid_duration(
                s,
                format!("expected a number at '{}'", rest),
            ));
        }

        let (number, tail) = rest.split_at(num_end);
        let value: f64 = number
            .parse()
            .map_err(|_| ConfigError::invalid_duration(s, format!("invalid number '{}'", number)))?;

        let unit_end = tail.find(is_numeric).unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let nanos_per_unit = match unit {
            "ms" => NANOS_PER_MILLI,
            "s" => NANOS_PER_SEC,
            "m" => 60.0 * NANOS_PER_SEC,
            "h" => 3600.0 * NANOS_PER_SEC,
            other => {
                return Err(ConfigError::invalid_duration(
                    s,
                    format!("unknown unit '{}'", other),
                ))
            }
        };

        let nanos = (value * nanos_per_unit).round();
        if !nanos.is_finite() || nanos > u64::MAX as f64 {
            return Err(ConfigError::invalid_duration(s, "value out of range"));
        }
        total = total
            .checked_add(Duration::from_nanos(nanos as u64))
            .ok_or_else(|| ConfigError::invalid_duration(s, "value out of range"))?;

        rest = next;
    }

    Ok(total)
}

/// Format a duration in the same unit syntax accepted by [`parse_duration`].
///
/// Sub-millisecond precision is dropped: `Duration::from_micros(1500)` formats
/// as `"1ms"`.
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }

    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    out
}

/// Serde adapter for `Duration` fields written as unit strings in YAML
pub mod humanized {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h5m").unwrap(), Duration::from_secs(3900));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 2s ").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_zero() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("5 minutes").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("1..5s").is_err());
    }

    #[test]
    fn test_parse_rejects_overflow() {
        let err = parse_duration("99999999999999999999999h").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_secs(300)), "5m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1s500ms");
        assert_eq!(format_duration(Duration::from_secs(3605)), "1h5s");
    }

    #[test]
    fn test_format_output_parses_back() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(59),
            Duration::from_secs(7322),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }
}
