//! Storage seams for the conversation log and the two ledgers.
//!
//! Ledger inserts are insert-or-ignore against a uniqueness constraint and
//! report [`InsertOutcome::AlreadyExists`] instead of failing, so two
//! overlapping scheduler runs (or two retried chat requests) race safely.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::achievements::{Achievement, AchievementView, Enrichment};
use parley_core::conversation::{Message, Role, UserProfile};
use parley_core::reminders::Reminder;

use crate::error::AppError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of a unique-constrained insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<T> {
    Inserted(T),
    /// The key was already present: another run or an earlier attempt won.
    AlreadyExists,
}

impl<T> InsertOutcome<T> {
    pub fn inserted(self) -> Option<T> {
        match self {
            InsertOutcome::Inserted(value) => Some(value),
            InsertOutcome::AlreadyExists => None,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create the user on first contact; existing users are left untouched.
    async fn ensure_user(&self, user_id: &str) -> Result<(), AppError>;

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError>;

    /// Keyset page of user ids in ascending order, strictly after `after`.
    async fn list_user_ids(&self, after: Option<&str>, limit: i64) -> Result<Vec<String>, AppError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, AppError>;

    /// The latest `limit` messages, returned oldest first.
    async fn recent_messages(&self, user_id: &str, limit: i64) -> Result<Vec<Message>, AppError>;

    /// Number of user-authored messages.
    async fn count_user_messages(&self, user_id: &str) -> Result<i64, AppError>;
}

#[async_trait]
pub trait ReminderLedger: Send + Sync {
    /// Atomically record that `(user_id, event_id)` was reminded.
    async fn try_record(
        &self,
        user_id: &str,
        event_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<InsertOutcome<Reminder>, AppError>;

    async fn reminders_for_user(&self, user_id: &str) -> Result<Vec<Reminder>, AppError>;
}

#[async_trait]
pub trait AchievementLedger: Send + Sync {
    /// Codes the user already holds, in any status.
    async fn owned_codes(&self, user_id: &str) -> Result<Vec<String>, AppError>;

    /// Atomically create a pending record for `(user_id, code)`.
    async fn try_insert_pending(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome<Achievement>, AppError>;

    /// `Pending -> Completed`. Returns false when the record was no longer pending.
    async fn mark_completed(
        &self,
        id: uuid::Uuid,
        enrichment: &Enrichment,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Count a failed enrichment attempt; returns the new attempt total.
    async fn record_attempt_failure(
        &self,
        id: uuid::Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<i32, AppError>;

    /// `Pending -> Failed`. Returns false when the record was no longer pending.
    async fn mark_failed(&self, id: uuid::Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Oldest pending records first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<Achievement>, AppError>;

    /// Completed achievements ordered by unlock time ascending.
    async fn list_completed(&self, user_id: &str) -> Result<Vec<AchievementView>, AppError>;

    async fn achievements_for_user(&self, user_id: &str) -> Result<Vec<Achievement>, AppError>;
}
