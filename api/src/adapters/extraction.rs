use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parley_core::calendar::CandidateEvent;
use regex::Regex;

use crate::error::AppError;

/// Turns generated reply text into candidate calendar events.
#[async_trait]
pub trait EventExtractor: Send + Sync {
    async fn extract_events(&self, text: &str) -> Result<Vec<CandidateEvent>, AppError>;
}

// "2025-05-01 14:00 Standup", "2025-05-01T09:30-10:15: Dentist"
static EVENT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)\b(\d{4}-\d{2}-\d{2})[ T](\d{1,2}:\d{2})(?:[ \t]*-[ \t]*(\d{1,2}:\d{2}))?[ \t]*[:\-]?[ \t]+(\S[^\r\n]*?)[ \t\r]*$",
    )
    .expect("valid event line regex")
});

/// Deterministic extractor for replies that state events as
/// `YYYY-MM-DD HH:MM[-HH:MM] Title`, one per line.
///
/// Matches with an unparseable date or time are skipped; an end time earlier
/// than the start is passed through so validation can reject that one event.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn parse(text: &str) -> Vec<CandidateEvent> {
        EVENT_LINE_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let date = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok()?;
                let start = NaiveTime::parse_from_str(&caps[2], "%H:%M").ok()?;
                let end = match caps.get(3) {
                    Some(end) => Some(NaiveTime::parse_from_str(end.as_str(), "%H:%M").ok()?),
                    None => None,
                };
                let title = caps[4].trim_end_matches(['.', '!']).trim().to_string();
                Some(CandidateEvent {
                    title,
                    start: NaiveDateTime::new(date, start),
                    end: end.map(|end| NaiveDateTime::new(date, end)),
                })
            })
            .collect()
    }
}

#[async_trait]
impl EventExtractor for PatternExtractor {
    async fn extract_events(&self, text: &str) -> Result<Vec<CandidateEvent>, AppError> {
        Ok(Self::parse(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn extracts_single_event_line() {
        let events = PatternExtractor::parse("Sure! 2025-05-01 14:00 Standup");
        assert_eq!(
            events,
            vec![CandidateEvent {
                title: "Standup".to_string(),
                start: dt("2025-05-01", "14:00"),
                end: None,
            }]
        );
    }

    #[test]
    fn extracts_ranges_and_multiple_lines() {
        let text = "Planned:\n2025-05-02T09:30-10:15: Dentist.\n2025-05-03 18:00 Dinner with Sam\nnothing else";
        let events = PatternExtractor::parse(text);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].title, "Dentist");
        assert_eq!(events[0].start, dt("2025-05-02", "09:30"));
        assert_eq!(events[0].end, Some(dt("2025-05-02", "10:15")));
        assert_eq!(events[1].title, "Dinner with Sam");
    }

    #[test]
    fn skips_impossible_dates_and_keeps_backwards_ranges() {
        let text = "2025-02-30 10:00 Ghost\n2025-05-01 15:00-14:00 Backwards";
        let events = PatternExtractor::parse(text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Backwards");
        assert!(events[0].end.unwrap() < events[0].start);
    }

    #[test]
    fn title_never_comes_from_the_next_line() {
        let text = "2025-05-01 14:00\nStandup\r\n2025-05-02 09:00 Review\r\n";
        let events = PatternExtractor::parse(text);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Review");
        assert_eq!(events[0].start, dt("2025-05-02", "09:00"));
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(PatternExtractor::parse("Let's talk tomorrow.").is_empty());
    }
}
