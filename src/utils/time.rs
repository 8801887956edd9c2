//! Frequency grammar parsing, datetime parse/format, and window slicing
//!
//! Ported from the reference Python implementation's `utils.parse_frequency`,
//! `utils.parse_datetime`/`format_datetime`, and `utils.window_slices`.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static FREQUENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(min|m|h|d|w|mon)$").expect("valid regex"));

/// Parse a frequency string of the shape `<int>(min|m|h|d|w|mon)`. `mon` is
/// treated as exactly 30 days. Returns `None` for unparseable or
/// non-positive durations.
pub(crate) fn parse_frequency(input: &str) -> Option<Duration> {
    let captures = FREQUENCY_RE.captures(input.trim())?;
    let amount: i64 = captures[1].parse().ok()?;
    if amount <= 0 {
        return None;
    }
    let unit_seconds: i64 = match &captures[2] {
        "min" | "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 7 * 86400,
        "mon" => 30 * 86400,
        _ => return None,
    };
    Some(Duration::seconds(amount * unit_seconds))
}

/// Parse a timestamp using `fmt` (a `chrono` strftime format), falling back
/// to RFC 3339 parsing if `fmt` is absent.
pub(crate) fn parse_datetime(value: &str, fmt: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(fmt) = fmt {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value, fmt) {
            return Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
        }
    }
    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp using `fmt`, falling back to RFC 3339 if absent.
pub(crate) fn format_datetime(value: DateTime<Utc>, fmt: Option<&str>) -> String {
    match fmt {
        Some(fmt) => value.format(fmt).to_string(),
        None => value.to_rfc3339(),
    }
}

/// Split `[start, end]` into contiguous sub-windows of length `delta`; the
/// final slice is truncated to `end`.
pub(crate) fn window_slices(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta: Duration,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    if delta <= Duration::zero() || start >= end {
        return vec![(start, end)];
    }

    let mut slices = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = std::cmp::min(cursor + delta, end);
        slices.push((cursor, next));
        cursor = next;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse_frequency("5min").unwrap(), Duration::minutes(5));
        assert_eq!(parse_frequency("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_frequency("1d").unwrap(), Duration::hours(24));
        assert_eq!(parse_frequency("1w").unwrap(), Duration::days(7));
        assert_eq!(parse_frequency("2mon").unwrap(), Duration::days(60));
    }

    #[test]
    fn rejects_non_positive() {
        assert!(parse_frequency("0min").is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_frequency("five minutes").is_none());
    }

    #[test]
    fn window_slices_cover_the_full_range() {
        let start: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2026-01-01T00:05:00Z".parse().unwrap();
        let slices = window_slices(start, end, Duration::minutes(1));
        assert_eq!(slices.len(), 5);
        assert_eq!(slices[0], (start, start + Duration::minutes(1)));
        assert_eq!(slices.last().unwrap().1, end);
    }

    #[test]
    fn round_trips_formatted_timestamps() {
        let fmt = "%Y-%m-%dT%H:%M:%SZ";
        let value: DateTime<Utc> = "2026-07-27T12:00:00Z".parse().unwrap();
        let formatted = format_datetime(value, Some(fmt));
        let parsed = parse_datetime(&formatted, Some(fmt)).unwrap();
        assert_eq!(parsed, value);
    }
}
