use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Prefix of identifiers derived from event content rather than assigned by a provider.
pub const FINGERPRINT_ID_PREFIX: &str = "fp_";

/// A calendar event as stored by (or read back from) a calendar provider.
///
/// `id` is whatever the provider assigned. Providers without durable ids
/// leave it empty; see [`stable_event_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Extractor output: wall-clock times in the user's timezone, not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
}

/// Why a single candidate event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventValidationError {
    #[error("event title must not be empty")]
    EmptyTitle,
    #[error("event end {end} is before start {start}")]
    EndBeforeStart { start: String, end: String },
    #[error("local time {0} does not exist in timezone {1}")]
    NonexistentLocalTime(NaiveDateTime, Tz),
}

impl CandidateEvent {
    /// Validate the candidate and resolve its wall-clock times in `tz`.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant.
    pub fn resolve(&self, tz: Tz) -> Result<CalendarEvent, EventValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(EventValidationError::EmptyTitle);
        }

        let start = resolve_local(self.start, tz)?;
        let end = self.end.map(|end| resolve_local(end, tz)).transpose()?;

        let event = CalendarEvent {
            id: None,
            title: title.to_string(),
            start,
            end,
        };
        validate_event(&event)?;
        Ok(event)
    }
}

fn resolve_local(local: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, EventValidationError> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(EventValidationError::NonexistentLocalTime(local, tz))
}

/// Enforce the event invariants: non-empty title, `end >= start` when present.
pub fn validate_event(event: &CalendarEvent) -> Result<(), EventValidationError> {
    if event.title.trim().is_empty() {
        return Err(EventValidationError::EmptyTitle);
    }
    if let Some(end) = event.end {
        if end < event.start {
            return Err(EventValidationError::EndBeforeStart {
                start: event.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end: end.to_rfc3339_opts(SecondsFormat::Secs, true),
            });
        }
    }
    Ok(())
}

/// Identifier used to deduplicate reminders for an event.
///
/// Uses the provider id when there is one; otherwise a fingerprint of
/// `(title, start)` so the same event read twice maps to the same key.
pub fn stable_event_id(event: &CalendarEvent) -> String {
    match event.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => fingerprint(&event.title, event.start),
    }
}

fn fingerprint(title: &str, start: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.trim().as_bytes());
    hasher.update([0u8]);
    hasher.update(start.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{FINGERPRINT_ID_PREFIX}{}", &digest[..32])
}
