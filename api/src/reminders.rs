//! Due-soon reminder scheduler.
//!
//! One run pages through every user, lists the events starting inside
//! `[now, now + horizon)` and, for each event not yet in the reminder ledger,
//! claims the ledger row and then appends the notification to the user's
//! conversation. Claiming first makes delivery at-most-once: a lost append
//! is reported, never repeated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parley_core::calendar::stable_event_id;
use parley_core::conversation::Role;
use parley_core::reminders::{FailureKind, RunReport, UserFailure, UserTally, reminder_text};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::adapters::{CALENDAR, CalendarAdapter, STORAGE, bounded};
use crate::config::{SchedulerSettings, Timeouts};
use crate::error::AppError;
use crate::store::{ConversationStore, ReminderLedger, UserStore};

pub struct ReminderScheduler {
    users: Arc<dyn UserStore>,
    calendar: Arc<dyn CalendarAdapter>,
    conversations: Arc<dyn ConversationStore>,
    ledger: Arc<dyn ReminderLedger>,
    settings: SchedulerSettings,
    timeouts: Timeouts,
}

type UserOutcome = (String, UserTally, Result<(), AppError>);

impl ReminderScheduler {
    pub fn new(
        users: Arc<dyn UserStore>,
        calendar: Arc<dyn CalendarAdapter>,
        conversations: Arc<dyn ConversationStore>,
        ledger: Arc<dyn ReminderLedger>,
        settings: SchedulerSettings,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            users,
            calendar,
            conversations,
            ledger,
            settings,
            timeouts,
        }
    }

    /// Execute one pass over all users as of `now`.
    ///
    /// Per-user failures are collected into the report and never abort the
    /// run. Once the wall-clock budget is spent no further users are started;
    /// users already in flight finish.
    pub async fn run_once(self: &Arc<Self>, now: DateTime<Utc>) -> RunReport {
        let started = Instant::now();
        let window_end = now + self.settings.horizon;
        let mut report = RunReport::new(now, window_end);

        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks: JoinSet<UserOutcome> = JoinSet::new();
        let mut cursor: Option<String> = None;

        'pages: loop {
            if started.elapsed() >= self.settings.budget {
                report.budget_exhausted = true;
                break;
            }

            let page = match bounded(
                STORAGE,
                self.timeouts.store,
                self.users.list_user_ids(cursor.as_deref(), self.settings.page_size),
            )
            .await
            {
                Ok(page) => page,
                Err(err) => {
                    tracing::error!(error = %err, cursor = ?cursor, "Failed to list users for reminder run");
                    report.record_enumeration_failure(err.failure_kind(), err.to_string());
                    break;
                }
            };
            let last_page = page.len() < usize::try_from(self.settings.page_size).unwrap_or(usize::MAX);
            cursor = page.last().cloned();

            for user_id in page {
                if started.elapsed() >= self.settings.budget {
                    report.budget_exhausted = true;
                    break 'pages;
                }
                let permit = match Arc::clone(&permits).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break 'pages,
                };
                // Waiting for a free slot can outlast the budget.
                if started.elapsed() >= self.settings.budget {
                    report.budget_exhausted = true;
                    break 'pages;
                }
                while let Some(joined) = tasks.try_join_next() {
                    merge(&mut report, joined);
                }

                let scheduler = Arc::clone(self);
                tasks.spawn(async move {
                    let _permit = permit;
                    let mut tally = UserTally::default();
                    let result = scheduler.remind_user(&user_id, now, window_end, &mut tally).await;
                    (user_id, tally, result)
                });
            }

            if last_page || cursor.is_none() {
                break;
            }
        }

        while let Some(joined) = tasks.join_next().await {
            merge(&mut report, joined);
        }

        report.finished_at = now
            + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        tracing::info!(
            users_scanned = report.users_scanned,
            users_failed = report.users_failed,
            reminders_sent = report.reminders_sent,
            reminders_skipped = report.reminders_skipped,
            delivery_failures = report.delivery_failures,
            budget_exhausted = report.budget_exhausted,
            "Reminder run finished"
        );
        report
    }

    async fn remind_user(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window_end: DateTime<Utc>,
        tally: &mut UserTally,
    ) -> Result<(), AppError> {
        let tz = bounded(STORAGE, self.timeouts.store, self.users.profile(user_id))
            .await?
            .map(|profile| profile.tz())
            .unwrap_or(Tz::UTC);
        let events = bounded(
            CALENDAR,
            self.timeouts.adapter,
            self.calendar.list_events(user_id, now, window_end),
        )
        .await?;

        for event in events.iter().filter(|e| e.start >= now && e.start < window_end) {
            tally.events_scanned += 1;
            let event_id = stable_event_id(event);

            let claimed = bounded(
                STORAGE,
                self.timeouts.store,
                self.ledger.try_record(user_id, &event_id, now),
            )
            .await?;
            if claimed.inserted().is_none() {
                tally.reminders_skipped += 1;
                continue;
            }

            let text = reminder_text(event, tz);
            match bounded(
                STORAGE,
                self.timeouts.store,
                self.conversations.append_message(user_id, Role::Assistant, &text, now),
            )
            .await
            {
                Ok(_) => {
                    tally.reminders_sent += 1;
                    tracing::info!(user_id, event_id = %event_id, "Reminder sent");
                }
                Err(err) => {
                    tally.delivery_failures += 1;
                    tracing::warn!(user_id, event_id = %event_id, error = %err, "Reminder recorded but not delivered");
                }
            }
        }
        Ok(())
    }
}

fn merge(report: &mut RunReport, joined: Result<UserOutcome, JoinError>) {
    match joined {
        Ok((_, tally, Ok(()))) => report.record_success(tally),
        Ok((user_id, tally, Err(err))) => {
            tracing::warn!(user_id = %user_id, error = %err, sent = tally.reminders_sent, "Reminder run failed for user");
            report.record_failure(
                UserFailure {
                    user_id,
                    kind: err.failure_kind(),
                    reason: err.to_string(),
                },
                tally,
            );
        }
        Err(err) => {
            tracing::error!(error = %err, "Reminder task aborted");
            report.record_failure(
                UserFailure {
                    user_id: String::new(),
                    kind: FailureKind::Internal,
                    reason: err.to_string(),
                },
                UserTally::default(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use parley_core::calendar::CalendarEvent;
    use parley_core::conversation::{Message, UserProfile};
    use parley_core::reminders::Reminder;

    use super::*;
    use crate::adapters::MemoryCalendar;
    use crate::store::{InsertOutcome, MemoryStore};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, m, 0).unwrap()
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            page_size: 2,
            concurrency: 4,
            ..SchedulerSettings::default()
        }
    }

    fn fast_timeouts() -> Timeouts {
        Timeouts {
            adapter: Duration::from_millis(50),
            store: Duration::from_secs(1),
        }
    }

    fn scheduler(
        store: &Arc<MemoryStore>,
        calendar: Arc<dyn CalendarAdapter>,
        settings: SchedulerSettings,
    ) -> Arc<ReminderScheduler> {
        Arc::new(ReminderScheduler::new(
            store.clone(),
            calendar,
            store.clone(),
            store.clone(),
            settings,
            fast_timeouts(),
        ))
    }

    async fn seeded(users: &[&str]) -> (Arc<MemoryStore>, Arc<MemoryCalendar>) {
        let store = Arc::new(MemoryStore::new());
        let calendar = Arc::new(MemoryCalendar::new());
        for user in users {
            store.ensure_user(user).await.unwrap();
            calendar.add_event(user, "Standup", at(14, 0), None).await.unwrap();
        }
        (store, calendar)
    }

    fn reminders(messages: &[Message]) -> Vec<&str> {
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
            .collect()
    }

    /// Calendar that hangs or errors for selected users.
    struct UnreliableCalendar {
        inner: Arc<MemoryCalendar>,
        hanging: HashSet<String>,
        broken: HashSet<String>,
    }

    #[async_trait]
    impl CalendarAdapter for UnreliableCalendar {
        async fn add_event(
            &self,
            user_id: &str,
            title: &str,
            start: DateTime<Utc>,
            end: Option<DateTime<Utc>>,
        ) -> Result<Option<String>, AppError> {
            self.inner.add_event(user_id, title, start, end).await
        }

        async fn list_events(
            &self,
            user_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>, AppError> {
            if self.hanging.contains(user_id) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.broken.contains(user_id) {
                return Err(AppError::unavailable(CALENDAR, "provider returned 503"));
            }
            self.inner.list_events(user_id, from, to).await
        }
    }

    /// Conversation log that rejects every append.
    struct MuteConversations;

    #[async_trait]
    impl ConversationStore for MuteConversations {
        async fn append_message(
            &self,
            _user_id: &str,
            _role: Role,
            _content: &str,
            _now: DateTime<Utc>,
        ) -> Result<Message, AppError> {
            Err(AppError::Internal("conversation log unavailable".to_string()))
        }

        async fn recent_messages(&self, _user_id: &str, _limit: i64) -> Result<Vec<Message>, AppError> {
            Ok(Vec::new())
        }

        async fn count_user_messages(&self, _user_id: &str) -> Result<i64, AppError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn due_event_is_reminded_exactly_once_across_runs() {
        let (store, calendar) = seeded(&["u1"]).await;
        let scheduler = scheduler(&store, calendar, settings());

        let first = scheduler.run_once(at(13, 30)).await;
        assert_eq!(first.reminders_sent, 1);
        assert_eq!(first.users_scanned, 1);
        assert!(first.failures.is_empty());

        let second = scheduler.run_once(at(13, 35)).await;
        assert_eq!(second.reminders_sent, 0);
        assert_eq!(second.reminders_skipped, 1);

        let messages = store.messages_for("u1").await;
        assert_eq!(
            reminders(&messages),
            vec!["Reminder: Standup starts at 2025-05-01 14:00 (UTC)"]
        );
        assert_eq!(store.reminders_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_runs_remind_once() {
        let (store, calendar) = seeded(&["u1", "u2", "u3"]).await;
        let scheduler = scheduler(&store, calendar, settings());

        let (a, b) = tokio::join!(scheduler.run_once(at(13, 30)), scheduler.run_once(at(13, 30)));
        assert_eq!(a.reminders_sent + b.reminders_sent, 3);
        assert_eq!(a.reminders_skipped + b.reminders_skipped, 3);

        for user in ["u1", "u2", "u3"] {
            assert_eq!(reminders(&store.messages_for(user).await).len(), 1, "{user}");
        }
    }

    #[tokio::test]
    async fn slow_calendar_for_one_user_does_not_block_others() {
        let (store, inner) = seeded(&["u1", "u2", "u3"]).await;
        let calendar = Arc::new(UnreliableCalendar {
            inner,
            hanging: HashSet::from(["u2".to_string()]),
            broken: HashSet::new(),
        });
        let scheduler = scheduler(&store, calendar, settings());

        let report = scheduler.run_once(at(13, 30)).await;
        assert_eq!(report.users_scanned, 3);
        assert_eq!(report.users_failed, 1);
        assert_eq!(report.reminders_sent, 2);
        assert_eq!(report.failures[0].user_id, "u2");
        assert_eq!(report.failures[0].kind, FailureKind::AdapterTimeout);

        assert_eq!(reminders(&store.messages_for("u1").await).len(), 1);
        assert!(reminders(&store.messages_for("u2").await).is_empty());
        assert_eq!(reminders(&store.messages_for("u3").await).len(), 1);

        // u2 is picked up once its calendar recovers.
        let recovered = scheduler_with_healthy_calendar(&store, &scheduler).await;
        assert_eq!(recovered.reminders_sent, 1);
        assert_eq!(recovered.reminders_skipped, 2);
    }

    async fn scheduler_with_healthy_calendar(
        store: &Arc<MemoryStore>,
        previous: &Arc<ReminderScheduler>,
    ) -> RunReport {
        let calendar = Arc::new(MemoryCalendar::new());
        for user in ["u1", "u2", "u3"] {
            calendar.add_event(user, "Standup", at(14, 0), None).await.unwrap();
        }
        let healthy = scheduler(store, calendar, previous.settings.clone());
        healthy.run_once(at(13, 40)).await
    }

    #[tokio::test]
    async fn unavailable_calendar_is_classified() {
        let (store, inner) = seeded(&["u1"]).await;
        let calendar = Arc::new(UnreliableCalendar {
            inner,
            hanging: HashSet::new(),
            broken: HashSet::from(["u1".to_string()]),
        });
        let report = scheduler(&store, calendar, settings()).run_once(at(13, 30)).await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::AdapterUnavailable);
    }

    #[tokio::test]
    async fn events_outside_window_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let calendar = Arc::new(MemoryCalendar::new());
        store.ensure_user("u1").await.unwrap();
        calendar.add_event("u1", "Past", at(13, 0), None).await.unwrap();
        calendar.add_event("u1", "Edge", at(14, 30), None).await.unwrap();
        calendar.add_event("u1", "Later", at(16, 0), None).await.unwrap();
        calendar.add_event("u1", "Soon", at(14, 29), None).await.unwrap();

        let report = scheduler(&store, calendar, settings()).run_once(at(13, 30)).await;
        assert_eq!(report.events_scanned, 1);
        assert_eq!(report.window_end, at(14, 30));
        assert_eq!(
            reminders(&store.messages_for("u1").await),
            vec!["Reminder: Soon starts at 2025-05-01 14:29 (UTC)"]
        );
    }

    #[tokio::test]
    async fn reminder_text_uses_user_timezone() {
        let store = Arc::new(MemoryStore::new());
        let calendar = Arc::new(MemoryCalendar::new());
        let mut profile = UserProfile::new("u1");
        profile.timezone = "Europe/Berlin".to_string();
        store.put_profile(profile).await;
        calendar.add_event("u1", "Standup", at(14, 0), None).await.unwrap();

        scheduler(&store, calendar, settings()).run_once(at(13, 30)).await;
        assert_eq!(
            reminders(&store.messages_for("u1").await),
            vec!["Reminder: Standup starts at 2025-05-01 16:00 (Europe/Berlin)"]
        );
    }

    #[tokio::test]
    async fn spent_budget_starts_no_users() {
        let (store, calendar) = seeded(&["u1", "u2"]).await;
        let settings = SchedulerSettings {
            budget: Duration::ZERO,
            ..settings()
        };
        let report = scheduler(&store, calendar, settings).run_once(at(13, 30)).await;
        assert!(report.budget_exhausted);
        assert_eq!(report.users_scanned, 0);
        assert!(store.messages_for("u1").await.is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_is_not_retried() {
        let (store, calendar) = seeded(&["u1"]).await;
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            calendar,
            Arc::new(MuteConversations),
            store.clone(),
            settings(),
            fast_timeouts(),
        ));

        let first = scheduler.run_once(at(13, 30)).await;
        assert_eq!(first.delivery_failures, 1);
        assert_eq!(first.reminders_sent, 0);
        assert!(first.failures.is_empty());

        let second = scheduler.run_once(at(13, 35)).await;
        assert_eq!(second.delivery_failures, 0);
        assert_eq!(second.reminders_skipped, 1);
    }

    #[tokio::test]
    async fn pages_through_every_user() {
        let users: Vec<String> = (0..7).map(|i| format!("user-{i:02}")).collect();
        let refs: Vec<&str> = users.iter().map(String::as_str).collect();
        let (store, calendar) = seeded(&refs).await;

        let report = scheduler(&store, calendar, settings()).run_once(at(13, 30)).await;
        assert_eq!(report.users_scanned, 7);
        assert_eq!(report.reminders_sent, 7);
    }

    /// User directory whose listing always fails.
    struct UnlistableUsers;

    #[async_trait]
    impl UserStore for UnlistableUsers {
        async fn ensure_user(&self, _user_id: &str) -> Result<(), AppError> {
            Ok(())
        }

        async fn profile(&self, _user_id: &str) -> Result<Option<UserProfile>, AppError> {
            Ok(None)
        }

        async fn list_user_ids(&self, _after: Option<&str>, _limit: i64) -> Result<Vec<String>, AppError> {
            Err(AppError::Internal("user directory offline".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_user_listing_is_reported() {
        let (store, calendar) = seeded(&["u1"]).await;
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::new(UnlistableUsers),
            calendar,
            store.clone(),
            store.clone(),
            settings(),
            fast_timeouts(),
        ));

        let report = scheduler.run_once(at(13, 30)).await;
        assert!(report.enumeration_failed);
        assert!(!report.budget_exhausted);
        assert_eq!(report.users_scanned, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user_id, "");
        assert_eq!(report.failures[0].kind, FailureKind::Internal);
        assert!(store.messages_for("u1").await.is_empty());
    }

    /// Calendar that answers only after a fixed delay.
    struct SlowCalendar {
        inner: Arc<MemoryCalendar>,
        delay: Duration,
    }

    #[async_trait]
    impl CalendarAdapter for SlowCalendar {
        async fn add_event(
            &self,
            user_id: &str,
            title: &str,
            start: DateTime<Utc>,
            end: Option<DateTime<Utc>>,
        ) -> Result<Option<String>, AppError> {
            self.inner.add_event(user_id, title, start, end).await
        }

        async fn list_events(
            &self,
            user_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<CalendarEvent>, AppError> {
            tokio::time::sleep(self.delay).await;
            self.inner.list_events(user_id, from, to).await
        }
    }

    #[tokio::test]
    async fn budget_spent_waiting_for_a_slot_starts_no_more_users() {
        let (store, inner) = seeded(&["u1", "u2"]).await;
        let calendar = Arc::new(SlowCalendar {
            inner,
            delay: Duration::from_millis(400),
        });
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            calendar,
            store.clone(),
            store.clone(),
            SchedulerSettings {
                budget: Duration::from_millis(100),
                concurrency: 1,
                ..settings()
            },
            Timeouts {
                adapter: Duration::from_secs(2),
                store: Duration::from_secs(1),
            },
        ));

        let report = scheduler.run_once(at(13, 30)).await;
        assert!(report.budget_exhausted);
        assert_eq!(report.users_scanned, 1);
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(reminders(&store.messages_for("u1").await).len(), 1);
        assert!(store.messages_for("u2").await.is_empty());
    }

    /// Ledger that fails every claim after the first `healthy` ones.
    struct FailingLedger {
        inner: Arc<MemoryStore>,
        healthy: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReminderLedger for FailingLedger {
        async fn try_record(
            &self,
            user_id: &str,
            event_id: &str,
            sent_at: DateTime<Utc>,
        ) -> Result<InsertOutcome<Reminder>, AppError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy {
                return Err(AppError::Internal("ledger write failed".to_string()));
            }
            self.inner.try_record(user_id, event_id, sent_at).await
        }

        async fn reminders_for_user(&self, user_id: &str) -> Result<Vec<Reminder>, AppError> {
            self.inner.reminders_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn ledger_failure_mid_user_keeps_sent_reminders_in_report() {
        let (store, calendar) = seeded(&["u1"]).await;
        calendar.add_event("u1", "Review", at(14, 10), None).await.unwrap();
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            calendar,
            store.clone(),
            Arc::new(FailingLedger {
                inner: store.clone(),
                healthy: 1,
                calls: AtomicUsize::new(0),
            }),
            settings(),
            fast_timeouts(),
        ));

        let report = scheduler.run_once(at(13, 30)).await;
        assert_eq!(report.users_scanned, 1);
        assert_eq!(report.users_failed, 1);
        assert_eq!(report.events_scanned, 2);
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(report.failures[0].user_id, "u1");
        assert_eq!(reminders(&store.messages_for("u1").await).len(), 1);
    }
}
