use chrono::{DateTime, Duration, Local, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub line: String,
}

fn time_prefix() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2})\s+(.+)$").ok())
        .as_ref()
}

/// Parse a full log batch. The result replaces whatever was shown before:
/// the backend always sends the cumulative log.
pub fn normalize<S: AsRef<str>>(lines: &[S]) -> Vec<LogEntry> {
    normalize_at(lines, Local::now())
}

/// Lines with a leading `HH:MM:SS` get that time on `now`'s date. Other lines
/// get `now + index` milliseconds so their relative order survives sorting.
pub fn normalize_at<S: AsRef<str>>(lines: &[S], now: DateTime<Local>) -> Vec<LogEntry> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let raw = raw.as_ref();
            parse_timed(raw, now).unwrap_or_else(|| LogEntry {
                timestamp: now + Duration::milliseconds(idx as i64),
                line: raw.to_string(),
            })
        })
        .collect()
}

fn parse_timed(raw: &str, now: DateTime<Local>) -> Option<LogEntry> {
    let caps = time_prefix()?.captures(raw)?;
    let h: u32 = caps[1].parse().ok()?;
    let m: u32 = caps[2].parse().ok()?;
    let s: u32 = caps[3].parse().ok()?;
    let time = NaiveTime::from_hms_opt(h, m, s)?;
    let timestamp = now
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()?;
    Some(LogEntry {
        timestamp,
        line: caps[4].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Timelike};

    fn noon() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
            .earliest()
            .unwrap()
    }

    #[test]
    fn timed_and_untimed_lines() {
        let now = noon();
        let entries = normalize_at(&["10:00:01 step started", "no-timestamp line"], now);
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].line, "step started");
        assert_eq!(
            entries[0].timestamp.date_naive(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            (
                entries[0].timestamp.hour(),
                entries[0].timestamp.minute(),
                entries[0].timestamp.second()
            ),
            (10, 0, 1)
        );

        assert_eq!(entries[1].line, "no-timestamp line");
        assert_eq!(entries[1].timestamp, now + Duration::milliseconds(1));
        assert!(entries[0].timestamp < entries[1].timestamp);
    }

    #[test]
    fn untimed_lines_keep_relative_order() {
        let now = noon();
        let entries = normalize_at(&["a", "b", "c"], now);
        assert!(entries[0].timestamp < entries[1].timestamp);
        assert!(entries[1].timestamp < entries[2].timestamp);
        assert_eq!(entries[0].timestamp, now);
    }

    #[test]
    fn out_of_range_time_is_treated_as_plain_text() {
        let now = noon();
        let entries = normalize_at(&["25:61:00 bogus"], now);
        assert_eq!(entries[0].line, "25:61:00 bogus");
        assert_eq!(entries[0].timestamp, now);
    }

    #[test]
    fn time_without_message_is_plain_text() {
        let entries = normalize_at(&["10:00:01"], noon());
        assert_eq!(entries[0].line, "10:00:01");
    }

    #[test]
    fn empty_batch_clears_view() {
        let empty: [&str; 0] = [];
        assert!(normalize(&empty).is_empty());
    }
}
