//! Achievement rule engine.
//!
//! Evaluation skips codes the user already owns before looking at any
//! predicate, then claims each newly qualifying code with an
//! insert-or-ignore into the ledger. Only the winner of that insert runs
//! enrichment, which moves the record `pending -> completed` (or `failed`
//! once its attempt budget is spent).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::achievements::{
    Achievement, AchievementView, Enrichment, RetrySummary, RuleCatalog, Trigger,
};

use crate::adapters::{ENRICHMENT, STORAGE, bounded};
use crate::config::Timeouts;
use crate::error::AppError;
use crate::store::AchievementLedger;

/// Fills in the display fields of a pending achievement. May be slow or
/// remote; failures are retried up to the engine's attempt budget.
#[async_trait]
pub trait AchievementEnricher: Send + Sync {
    async fn enrich(&self, record: &Achievement) -> Result<Enrichment, AppError>;
}

/// Copies title and icon from the static rule catalog.
pub struct CatalogEnricher {
    catalog: Arc<RuleCatalog>,
}

impl CatalogEnricher {
    pub fn new(catalog: Arc<RuleCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl AchievementEnricher for CatalogEnricher {
    async fn enrich(&self, record: &Achievement) -> Result<Enrichment, AppError> {
        let rule = self.catalog.get(&record.code).ok_or_else(|| {
            AppError::Internal(format!("no catalog rule for achievement '{}'", record.code))
        })?;
        Ok(Enrichment {
            title: rule.title.clone(),
            icon: rule.icon.clone(),
        })
    }
}

/// What one enrichment attempt did to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    Completed(AchievementView),
    Retrying,
    Failed,
    /// Someone else moved the record out of pending first.
    Superseded,
}

pub struct AchievementEngine {
    ledger: Arc<dyn AchievementLedger>,
    catalog: Arc<RuleCatalog>,
    enricher: Arc<dyn AchievementEnricher>,
    max_attempts: i32,
    timeouts: Timeouts,
}

impl AchievementEngine {
    pub fn new(
        ledger: Arc<dyn AchievementLedger>,
        catalog: Arc<RuleCatalog>,
        enricher: Arc<dyn AchievementEnricher>,
        max_attempts: i32,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            ledger,
            catalog,
            enricher,
            max_attempts: max_attempts.max(1),
            timeouts,
        }
    }

    /// Evaluate every rule against one chat turn. Returns the achievements
    /// that reached `completed` during this call.
    pub async fn evaluate(
        &self,
        trigger: &Trigger,
        now: DateTime<Utc>,
    ) -> Result<Vec<AchievementView>, AppError> {
        let user_id = trigger.user_id.as_str();
        let owned: HashSet<String> = bounded(
            STORAGE,
            self.timeouts.store,
            self.ledger.owned_codes(user_id),
        )
        .await?
        .into_iter()
        .collect();

        let mut completed = Vec::new();
        for rule in self.catalog.rules() {
            if owned.contains(&rule.code) || !rule.predicate.holds(trigger) {
                continue;
            }

            let inserted = bounded(
                STORAGE,
                self.timeouts.store,
                self.ledger.try_insert_pending(user_id, &rule.code, now),
            )
            .await;
            let record = match inserted {
                Ok(outcome) => match outcome.inserted() {
                    Some(record) => record,
                    None => {
                        tracing::debug!(user_id, code = %rule.code, "Achievement already claimed");
                        continue;
                    }
                },
                Err(err) => {
                    tracing::warn!(user_id, code = %rule.code, error = %err, "Could not record achievement");
                    continue;
                }
            };

            tracing::info!(user_id, code = %rule.code, "Achievement unlocked, pending enrichment");
            match self.attempt(&record, now).await {
                Ok(AttemptOutcome::Completed(view)) => completed.push(view),
                Ok(outcome) => {
                    tracing::debug!(user_id, code = %rule.code, ?outcome, "Achievement not completed yet");
                }
                Err(err) => {
                    tracing::warn!(user_id, code = %rule.code, error = %err, "Enrichment bookkeeping failed");
                }
            }
        }

        Ok(completed)
    }

    /// Re-attempt enrichment for records still pending, oldest first.
    pub async fn retry_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<RetrySummary, AppError> {
        let pending = bounded(STORAGE, self.timeouts.store, self.ledger.list_pending(limit)).await?;

        let mut summary = RetrySummary::default();
        for record in pending {
            summary.examined += 1;
            match self.attempt(&record, now).await {
                Ok(AttemptOutcome::Completed(_)) => summary.completed += 1,
                Ok(AttemptOutcome::Failed) => summary.failed += 1,
                Ok(AttemptOutcome::Retrying) => summary.still_pending += 1,
                Ok(AttemptOutcome::Superseded) => {}
                Err(err) => {
                    summary.still_pending += 1;
                    tracing::warn!(
                        user_id = %record.user_id,
                        code = %record.code,
                        error = %err,
                        "Pending achievement retry failed"
                    );
                }
            }
        }
        Ok(summary)
    }

    pub async fn list_completed(&self, user_id: &str) -> Result<Vec<AchievementView>, AppError> {
        bounded(STORAGE, self.timeouts.store, self.ledger.list_completed(user_id)).await
    }

    async fn attempt(&self, record: &Achievement, now: DateTime<Utc>) -> Result<AttemptOutcome, AppError> {
        if record.attempts >= self.max_attempts {
            return self.give_up(record, record.attempts, now).await;
        }

        let enriched = bounded(ENRICHMENT, self.timeouts.adapter, self.enricher.enrich(record)).await;
        match enriched {
            Ok(enrichment) => {
                let moved = bounded(
                    STORAGE,
                    self.timeouts.store,
                    self.ledger.mark_completed(record.id, &enrichment, now),
                )
                .await?;
                if !moved {
                    return Ok(AttemptOutcome::Superseded);
                }
                tracing::info!(user_id = %record.user_id, code = %record.code, "Achievement completed");
                Ok(AttemptOutcome::Completed(AchievementView {
                    code: record.code.clone(),
                    title: enrichment.title,
                    icon: enrichment.icon,
                    unlocked_at: now,
                }))
            }
            Err(err) => {
                let attempts = bounded(
                    STORAGE,
                    self.timeouts.store,
                    self.ledger.record_attempt_failure(record.id, &err.to_string(), now),
                )
                .await?;
                tracing::warn!(
                    user_id = %record.user_id,
                    code = %record.code,
                    attempts,
                    error = %err,
                    "Achievement enrichment attempt failed"
                );
                if attempts >= self.max_attempts {
                    self.give_up(record, attempts, now).await
                } else {
                    Ok(AttemptOutcome::Retrying)
                }
            }
        }
    }

    async fn give_up(
        &self,
        record: &Achievement,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome, AppError> {
        let moved = bounded(STORAGE, self.timeouts.store, self.ledger.mark_failed(record.id, now)).await?;
        if !moved {
            return Ok(AttemptOutcome::Superseded);
        }
        let exhausted = AppError::EnrichmentExhausted {
            code: record.code.clone(),
            attempts,
        };
        tracing::error!(user_id = %record.user_id, error = %exhausted, "Achievement failed");
        Ok(AttemptOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use parley_core::achievements::{
        AchievementStatus, DEFAULT_COURTESY_MARKER, FIRST_EVENT, POLITE,
    };
    use parley_core::calendar::CalendarEvent;

    use super::*;
    use crate::store::{InsertOutcome, MemoryStore};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, m, 0).unwrap()
    }

    fn catalog() -> Arc<RuleCatalog> {
        Arc::new(RuleCatalog::builtin(DEFAULT_COURTESY_MARKER))
    }

    fn event(title: &str) -> CalendarEvent {
        CalendarEvent {
            id: None,
            title: title.to_string(),
            start: at(14, 0),
            end: None,
        }
    }

    fn trigger(user_id: &str, reply: &str, events: Vec<CalendarEvent>) -> Trigger {
        Trigger {
            user_id: user_id.to_string(),
            message_count: 1,
            reply_text: reply.to_string(),
            extracted_events: events,
        }
    }

    fn engine(store: Arc<MemoryStore>, enricher: Arc<dyn AchievementEnricher>, max_attempts: i32) -> AchievementEngine {
        AchievementEngine::new(store, catalog(), enricher, max_attempts, Timeouts::default())
    }

    /// Fails the first `failures` calls, then behaves like the catalog enricher.
    struct FlakyEnricher {
        failures: usize,
        calls: AtomicUsize,
        inner: CatalogEnricher,
    }

    impl FlakyEnricher {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                inner: CatalogEnricher::new(catalog()),
            }
        }
    }

    #[async_trait]
    impl AchievementEnricher for FlakyEnricher {
        async fn enrich(&self, record: &Achievement) -> Result<Enrichment, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(AppError::unavailable(ENRICHMENT, "asset service down"));
            }
            self.inner.enrich(record).await
        }
    }

    /// Counts pending inserts so tests can see whether a rule was re-tried.
    struct CountingLedger {
        inner: Arc<MemoryStore>,
        inserts: AtomicUsize,
    }

    #[async_trait]
    impl AchievementLedger for CountingLedger {
        async fn owned_codes(&self, user_id: &str) -> Result<Vec<String>, AppError> {
            self.inner.owned_codes(user_id).await
        }
        async fn try_insert_pending(
            &self,
            user_id: &str,
            code: &str,
            now: DateTime<Utc>,
        ) -> Result<InsertOutcome<Achievement>, AppError> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.inner.try_insert_pending(user_id, code, now).await
        }
        async fn mark_completed(
            &self,
            id: uuid::Uuid,
            enrichment: &Enrichment,
            now: DateTime<Utc>,
        ) -> Result<bool, AppError> {
            self.inner.mark_completed(id, enrichment, now).await
        }
        async fn record_attempt_failure(
            &self,
            id: uuid::Uuid,
            error: &str,
            now: DateTime<Utc>,
        ) -> Result<i32, AppError> {
            self.inner.record_attempt_failure(id, error, now).await
        }
        async fn mark_failed(&self, id: uuid::Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
            self.inner.mark_failed(id, now).await
        }
        async fn list_pending(&self, limit: i64) -> Result<Vec<Achievement>, AppError> {
            self.inner.list_pending(limit).await
        }
        async fn list_completed(&self, user_id: &str) -> Result<Vec<AchievementView>, AppError> {
            self.inner.list_completed(user_id).await
        }
        async fn achievements_for_user(&self, user_id: &str) -> Result<Vec<Achievement>, AppError> {
            self.inner.achievements_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn first_event_is_awarded_once_across_turns() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(CatalogEnricher::new(catalog())), 3);

        let awarded = engine
            .evaluate(&trigger("u1", "Noted", vec![event("Standup")]), at(12, 0))
            .await
            .unwrap();
        assert_eq!(awarded.len(), 1);
        assert_eq!(awarded[0].code, FIRST_EVENT);
        assert_eq!(awarded[0].title, "First Event");

        for minute in 1..5 {
            let again = engine
                .evaluate(&trigger("u1", "Noted", vec![event("Retro")]), at(12, minute))
                .await
                .unwrap();
            assert!(again.is_empty());
        }

        let records = store.achievements_for_user("u1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AchievementStatus::Completed);
    }

    #[tokio::test]
    async fn owned_codes_are_skipped_before_predicates_run() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(CountingLedger {
            inner: store.clone(),
            inserts: AtomicUsize::new(0),
        });
        let engine = AchievementEngine::new(
            ledger.clone(),
            catalog(),
            Arc::new(CatalogEnricher::new(catalog())),
            3,
            Timeouts::default(),
        );

        let qualifying = trigger("u1", "thank you!", vec![event("Standup")]);
        engine.evaluate(&qualifying, at(12, 0)).await.unwrap();
        assert_eq!(ledger.inserts.load(Ordering::SeqCst), 2);

        engine.evaluate(&qualifying, at(12, 1)).await.unwrap();
        assert_eq!(ledger.inserts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rules_are_awarded_in_catalog_order() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store, Arc::new(CatalogEnricher::new(catalog())), 3);

        let awarded = engine
            .evaluate(&trigger("u1", "Thank you, booked it.", vec![event("Standup")]), at(12, 0))
            .await
            .unwrap();
        let codes: Vec<&str> = awarded.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, vec![FIRST_EVENT, POLITE]);
    }

    #[tokio::test]
    async fn concurrent_evaluations_award_once() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(engine(store.clone(), Arc::new(CatalogEnricher::new(catalog())), 3));
        let qualifying = trigger("u1", "Noted", vec![event("Standup")]);

        let (a, b) = tokio::join!(
            engine.evaluate(&qualifying, at(12, 0)),
            engine.evaluate(&qualifying, at(12, 0))
        );
        let total = a.unwrap().len() + b.unwrap().len();
        assert_eq!(total, 1);
        assert_eq!(store.achievements_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn flaky_enrichment_completes_on_retry_sweep() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(FlakyEnricher::new(1)), 3);

        let awarded = engine
            .evaluate(&trigger("u1", "Noted", vec![event("Standup")]), at(12, 0))
            .await
            .unwrap();
        assert!(awarded.is_empty());
        assert!(engine.list_completed("u1").await.unwrap().is_empty());

        let records = store.achievements_for_user("u1").await.unwrap();
        assert_eq!(records[0].status, AchievementStatus::Pending);
        assert_eq!(records[0].attempts, 1);

        let summary = engine.retry_pending(at(12, 5), 10).await.unwrap();
        assert_eq!(
            summary,
            RetrySummary {
                examined: 1,
                completed: 1,
                failed: 0,
                still_pending: 0,
            }
        );

        let listed = engine.list_completed("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].unlocked_at, at(12, 5));
    }

    #[tokio::test]
    async fn exhausted_enrichment_fails_and_stays_hidden() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(FlakyEnricher::new(usize::MAX)), 2);

        let qualifying = trigger("u1", "Noted", vec![event("Standup")]);
        engine.evaluate(&qualifying, at(12, 0)).await.unwrap();

        let summary = engine.retry_pending(at(12, 5), 10).await.unwrap();
        assert_eq!(summary.failed, 1);

        let records = store.achievements_for_user("u1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, AchievementStatus::Failed);
        assert_eq!(records[0].attempts, 2);
        assert!(records[0].last_error.is_some());

        assert!(engine.list_completed("u1").await.unwrap().is_empty());
        assert!(store.list_pending(10).await.unwrap().is_empty());

        // A failed code is still owned and never re-awarded.
        assert!(engine.evaluate(&qualifying, at(12, 10)).await.unwrap().is_empty());
        assert_eq!(store.achievements_for_user("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn award_keeps_catalog_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone(), Arc::new(CatalogEnricher::new(catalog())), 3);
        engine
            .evaluate(&trigger("u1", "Noted", vec![event("Standup")]), at(12, 0))
            .await
            .unwrap();

        let records = store.achievements_for_user("u1").await.unwrap();
        assert_eq!(records[0].title.as_deref(), Some("First Event"));
        assert_eq!(records[0].icon.as_deref(), Some("calendar-check"));
    }
}
