//! Due date parsing for the task commands.

use chrono::{DateTime, NaiveDateTime, Utc};
use miette::Result;

/// Formats accepted for dates without an offset. These are taken as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse a due date given on the command line.
pub fn parse_due(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            miette::miette!(
                "invalid due date '{}', expected RFC 3339 or YYYY-MM-DDTHH:MM[:SS]",
                s
            )
        })
}

/// Render a due date for display.
pub fn format_due(due: Option<DateTime<Utc>>) -> String {
    match due {
        Some(due) => due.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_rfc3339_converts_to_utc() {
        let due = parse_due("2025-03-01T14:00:00+02:00").unwrap();
        assert_eq!(due, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_as_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_due("2025-03-01T12:30").unwrap(), expected);
        assert_eq!(parse_due("2025-03-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_due(" 2025-03-01 12:30 ").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_due("tomorrow").is_err());
        assert!(parse_due("2025-13-01T00:00").is_err());
    }

    #[test]
    fn test_format_due() {
        let due = Utc.with_ymd_and_hms(2025, 3, 1, 9, 5, 0).unwrap();
        assert_eq!(format_due(Some(due)), "2025-03-01 09:05 UTC");
        assert_eq!(format_due(None), "-");
    }
}
