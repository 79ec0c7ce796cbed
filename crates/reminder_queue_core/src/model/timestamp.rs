//! RFC3339 timestamp codec.
//!
//! Stored timestamps always use UTC, millisecond precision and a `Z` suffix.
//! A fixed width keeps SQL string comparison equal to chronological order.

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats an instant in the canonical storage form.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses any RFC3339 timestamp and normalizes it to UTC.
///
/// Returns `None` for malformed input.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::{format_timestamp, parse_timestamp};

    #[test]
    fn format_uses_fixed_millisecond_width() {
        let whole = parse_timestamp("2024-01-01T12:00:00Z").expect("valid timestamp");
        let fractional = parse_timestamp("2024-01-01T12:00:00.5Z").expect("valid timestamp");

        assert_eq!(format_timestamp(whole), "2024-01-01T12:00:00.000Z");
        assert_eq!(format_timestamp(fractional), "2024-01-01T12:00:00.500Z");
        assert!(format_timestamp(whole) < format_timestamp(fractional));
    }

    #[test]
    fn parse_normalizes_offsets_to_utc() {
        let parsed = parse_timestamp("2024-01-01T14:00:00+02:00").expect("offset accepted");
        assert_eq!(format_timestamp(parsed), "2024-01-01T12:00:00.000Z");
    }

    #[test]
    fn parse_rejects_malformed_values() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("2024-01-01").is_none());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
