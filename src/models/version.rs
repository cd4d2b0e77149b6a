//! Entity versions derived from update timestamps.
//!
//! A version is the entity's `updated_at` rendered as nanoseconds since the
//! Unix epoch in base 32. The encoding carries no other metadata, so two
//! versions are equal exactly when the underlying timestamps are. Base 32 is
//! the largest base the decoder accepts; current-era timestamps render in 13
//! characters.

use chrono::{DateTime, Utc};
use thiserror::Error;

const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Errors from parsing or rendering a version string.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("malformed version string {0:?}")]
    Malformed(String),

    #[error("timestamp {0} not representable as a version")]
    Unrepresentable(DateTime<Utc>),
}

/// Render `updated_at` as an opaque version string.
pub fn format(updated_at: DateTime<Utc>) -> Result<String, VersionError> {
    let nanos = updated_at
        .timestamp_nanos_opt()
        .filter(|n| *n >= 0)
        .ok_or(VersionError::Unrepresentable(updated_at))?;

    let mut n = nanos as u64;
    if n == 0 {
        return Ok("0".to_string());
    }

    let mut buf = [0u8; 13];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = DIGITS[(n % 32) as usize];
        n /= 32;
    }

    Ok(String::from_utf8_lossy(&buf[i..]).into_owned())
}

/// Parse a version string back into its timestamp.
pub fn parse(version: &str) -> Result<DateTime<Utc>, VersionError> {
    let nanos = u64::from_str_radix(version, 32)
        .map_err(|_| VersionError::Malformed(version.to_string()))?;
    if nanos > i64::MAX as u64 {
        return Err(VersionError::Malformed(version.to_string()));
    }

    Ok(DateTime::from_timestamp_nanos(nanos as i64))
}

/// Whether a client-submitted version admits a mutation of a row stamped
/// `updated_at`. An empty version is an unconditional (blind) write.
pub fn matches(version: &str, updated_at: DateTime<Utc>) -> bool {
    if version.is_empty() {
        return true;
    }
    match format(updated_at) {
        Ok(current) => version == current,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_round_trip() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let v = format(t).unwrap();
        assert_eq!(parse(&v).unwrap(), t);
    }

    #[test]
    fn test_format_is_injective_over_distinct_timestamps() {
        let a = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert_ne!(format(a).unwrap(), format(b).unwrap());
    }

    #[test]
    fn test_current_era_renders_in_13_characters() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(format(t).unwrap().len(), 13);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("not a version").is_err());
        assert!(parse("").is_err());
        // 'w' is outside the base-32 alphabet.
        assert!(parse("wwww").is_err());
    }

    #[test]
    fn test_matches_empty_version_is_blind() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(matches("", t));
    }

    #[test]
    fn test_matches_rejects_stale_version() {
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let stale = format(t - chrono::Duration::seconds(1)).unwrap();
        assert!(!matches(&stale, t));
        assert!(!matches("garbage", t));
        assert!(matches(&format(t).unwrap(), t));
    }
}
