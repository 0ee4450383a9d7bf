//! Helpers shared by the SQLite stores.

use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width UTC timestamp so that string comparison follows time order.
pub(crate) fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_optional_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_formatted_times_sort_chronologically() {
        let earlier = Utc::now();
        let later = earlier + Duration::milliseconds(1);
        assert!(fmt_time(earlier) < fmt_time(later));
        assert_eq!(fmt_time(earlier).len(), fmt_time(later).len());
    }

    #[test]
    fn test_parse_roundtrip() {
        let now = Utc::now();
        let parsed = parse_time(&fmt_time(now));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
        assert!(parse_optional_time(None).is_none());
        assert!(parse_optional_time(Some("garbage".to_string())).is_none());
    }
}
