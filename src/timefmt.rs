//! Textual timestamp codec for backends without native mtime support
//!
//! Stores that cannot persist platform modification times carry them in a
//! custom property holding `"EEE, d MMM yyyy HH:mm:ss z"` in GMT (the RFC
//! 2822 shape with an unpadded day). Formatting and parsing are stateless
//! free functions; absence or garbage parses to `None`, never an error.

use chrono::{DateTime, TimeZone, Utc};

/// Format a unix timestamp (seconds) as a property value, e.g.
/// `"Mon, 5 Jan 2015 12:30:45 GMT"`.
pub fn format_timestamp(secs: i64) -> String {
    let when = Utc
        .timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH);
    when.format("%a, %-d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse a property value back to a unix timestamp (seconds).
///
/// Returns `None` for missing or malformed input so callers fall back to the
/// backend's intrinsic modification time.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|t| t.timestamp())
}

/// Compare two unix timestamps within the configured granularity window.
pub fn times_equal(a: i64, b: i64, granularity_secs: u32) -> bool {
    (a - b).abs() <= i64::from(granularity_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_known_instant() {
        // 2015-01-05 12:30:45 UTC
        assert_eq!(format_timestamp(1_420_461_045), "Mon, 5 Jan 2015 12:30:45 GMT");
    }

    #[test]
    fn test_round_trip_is_second_exact() {
        for secs in [0_i64, 1, 1_420_461_045, 2_000_000_000] {
            let text = format_timestamp(secs);
            assert_eq!(parse_timestamp(&text), Some(secs), "text was {text}");
        }
    }

    #[test]
    fn test_parse_accepts_numeric_offset() {
        assert_eq!(
            parse_timestamp("Mon, 5 Jan 2015 12:30:45 +0000"),
            Some(1_420_461_045)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("1420461045"), None);
    }

    #[test]
    fn test_times_equal_granularity() {
        assert!(times_equal(100, 102, 2));
        assert!(times_equal(102, 100, 2));
        assert!(!times_equal(100, 103, 2));
        assert!(times_equal(100, 100, 0));
        assert!(!times_equal(100, 101, 0));
    }
}
