use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::CalendarEvent;

/// Default look-ahead window for "due soon" events.
pub const DEFAULT_HORIZON_MINUTES: i64 = 60;

/// Ledger row: a reminder for `(user_id, event_id)` was dispatched at `sent_at`.
/// The pair is unique; rows are never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Reminder {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub sent_at: DateTime<Utc>,
}

impl Reminder {
    pub fn new(user_id: &str, event_id: &str, sent_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            event_id: event_id.to_string(),
            sent_at,
        }
    }
}

/// Notification text appended to the user's conversation.
pub fn reminder_text(event: &CalendarEvent, tz: Tz) -> String {
    let local = event.start.with_timezone(&tz);
    format!(
        "Reminder: {} starts at {} ({})",
        event.title.trim(),
        local.format("%Y-%m-%d %H:%M"),
        tz.name()
    )
}

/// Coarse classification of a per-user scheduler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AdapterTimeout,
    AdapterUnavailable,
    Storage,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserFailure {
    pub user_id: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Per-user tallies, merged into the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserTally {
    pub events_scanned: usize,
    pub reminders_sent: usize,
    pub reminders_skipped: usize,
    pub delivery_failures: usize,
}

/// Outcome of one scheduler run. Used for observability only; succeeded
/// work is never retried from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub users_scanned: usize,
    pub users_failed: usize,
    pub events_scanned: usize,
    pub reminders_sent: usize,
    /// Events another run (or an earlier attempt) already reminded
    pub reminders_skipped: usize,
    /// Ledger row written but the notification could not be appended
    pub delivery_failures: usize,
    /// The wall-clock budget ran out before every user was enumerated
    pub budget_exhausted: bool,
    /// Listing users failed; users after the failing page were not visited
    pub enumeration_failed: bool,
    pub failures: Vec<UserFailure>,
}

impl RunReport {
    pub fn new(now: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            started_at: now,
            finished_at: now,
            window_start: now,
            window_end,
            users_scanned: 0,
            users_failed: 0,
            events_scanned: 0,
            reminders_sent: 0,
            reminders_skipped: 0,
            delivery_failures: 0,
            budget_exhausted: false,
            enumeration_failed: false,
            failures: Vec::new(),
        }
    }

    pub fn record_success(&mut self, tally: UserTally) {
        self.users_scanned += 1;
        self.absorb(tally);
    }

    /// A user whose run stopped early. `partial` holds what was done for
    /// that user before the failure, so reminders already sent still count.
    pub fn record_failure(&mut self, failure: UserFailure, partial: UserTally) {
        self.users_scanned += 1;
        self.users_failed += 1;
        self.absorb(partial);
        self.failures.push(failure);
    }

    /// Listing users failed. Recorded with an empty `user_id`; no user is
    /// counted as scanned.
    pub fn record_enumeration_failure(&mut self, kind: FailureKind, reason: String) {
        self.enumeration_failed = true;
        self.failures.push(UserFailure {
            user_id: String::new(),
            kind,
            reason,
        });
    }

    fn absorb(&mut self, tally: UserTally) {
        self.events_scanned += tally.events_scanned;
        self.reminders_sent += tally.reminders_sent;
        self.reminders_skipped += tally.reminders_skipped;
        self.delivery_failures += tally.delivery_failures;
    }
}

/// Request body for a manual scheduler run
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RunRemindersRequest {
    /// Evaluation instant; defaults to the server's current time
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}
