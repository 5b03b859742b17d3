//! Timestamp formats seen on feed records.

use chrono::{DateTime, FixedOffset};

/// `Wed Aug 27 13:08:45 +0000 2008`
const TWITTER_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
/// `2011-01-01T12:00:00+0000`
const FACEBOOK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Parses a record timestamp in any of the formats the feed emits.
///
/// Returns `None` for anything unrecognised; callers treat that as "no timestamp".
pub fn parse_created_at(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_str(raw, TWITTER_FORMAT)
        .or_else(|_| DateTime::parse_from_str(raw, FACEBOOK_FORMAT))
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::parse_created_at;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_twitter_style_timestamps() {
        let parsed = parse_created_at("Wed Aug 27 13:08:45 +0000 2008").expect("twitter date");
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2008, 8, 27));
        assert_eq!((parsed.hour(), parsed.minute(), parsed.second()), (13, 8, 45));
        assert_eq!(parsed.offset().local_minus_utc(), 0);
    }

    #[test]
    fn parses_facebook_style_timestamps_with_offset() {
        let parsed = parse_created_at("2011-01-01T12:00:00+0130").expect("facebook date");
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2011, 1, 1));
        assert_eq!(parsed.offset().local_minus_utc(), 90 * 60);
    }

    #[test]
    fn falls_back_to_rfc3339() {
        assert!(parse_created_at("2012-03-04T05:06:07Z").is_some());
    }

    #[test]
    fn rejects_unknown_formats() {
        assert_eq!(parse_created_at(""), None);
        assert_eq!(parse_created_at("yesterday"), None);
        assert_eq!(parse_created_at("2011/01/01 12:00:00"), None);
    }
}
