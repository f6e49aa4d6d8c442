//! Process-local store for development and tests.
//!
//! Every operation runs inside one critical section, which gives the ledger
//! inserts the same insert-or-ignore atomicity the Postgres constraints do.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::achievements::{Achievement, AchievementStatus, AchievementView, Enrichment};
use parley_core::conversation::{Message, Role, UserProfile};
use parley_core::reminders::Reminder;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AchievementLedger, ConversationStore, InsertOutcome, ReminderLedger, UserStore,
};
use crate::error::AppError;

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<String, UserProfile>,
    messages: HashMap<String, Vec<Message>>,
    reminders: HashMap<(String, String), Reminder>,
    achievements: HashMap<Uuid, Achievement>,
    achievement_keys: HashMap<(String, String), Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn put_profile(&self, profile: UserProfile) {
        let mut state = self.state.lock().await;
        state.users.insert(profile.user_id.clone(), profile);
    }

    #[cfg(test)]
    pub async fn messages_for(&self, user_id: &str) -> Vec<Message> {
        let state = self.state.lock().await;
        state.messages.get(user_id).cloned().unwrap_or_default()
    }
}

fn missing_achievement(id: Uuid) -> AppError {
    AppError::NotFound {
        resource: format!("achievement {id}"),
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn ensure_user(&self, user_id: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserProfile::new(user_id));
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        let state = self.state.lock().await;
        Ok(state.users.get(user_id).cloned())
    }

    async fn list_user_ids(&self, after: Option<&str>, limit: i64) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(state
            .users
            .keys()
            .filter(|id| after.is_none_or(|after| id.as_str() > after))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let message = Message {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        };
        let mut state = self.state.lock().await;
        state
            .messages
            .entry(user_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn recent_messages(&self, user_id: &str, limit: i64) -> Result<Vec<Message>, AppError> {
        let state = self.state.lock().await;
        let mut messages = state.messages.get(user_id).cloned().unwrap_or_default();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by_key(|m| m.created_at);
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn count_user_messages(&self, user_id: &str) -> Result<i64, AppError> {
        let state = self.state.lock().await;
        let count = state
            .messages
            .get(user_id)
            .map(|messages| messages.iter().filter(|m| m.role == Role::User).count())
            .unwrap_or(0);
        Ok(count as i64)
    }
}

#[async_trait]
impl ReminderLedger for MemoryStore {
    async fn try_record(
        &self,
        user_id: &str,
        event_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<InsertOutcome<Reminder>, AppError> {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), event_id.to_string());
        if state.reminders.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let reminder = Reminder::new(user_id, event_id, sent_at);
        state.reminders.insert(key, reminder.clone());
        Ok(InsertOutcome::Inserted(reminder))
    }

    async fn reminders_for_user(&self, user_id: &str) -> Result<Vec<Reminder>, AppError> {
        let state = self.state.lock().await;
        let mut reminders: Vec<Reminder> = state
            .reminders
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reminders.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
        Ok(reminders)
    }
}

#[async_trait]
impl AchievementLedger for MemoryStore {
    async fn owned_codes(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .achievement_keys
            .keys()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, code)| code.clone())
            .collect())
    }

    async fn try_insert_pending(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome<Achievement>, AppError> {
        let mut state = self.state.lock().await;
        let key = (user_id.to_string(), code.to_string());
        if state.achievement_keys.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        let record = Achievement::pending(user_id, code, now);
        state.achievement_keys.insert(key, record.id);
        state.achievements.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        enrichment: &Enrichment,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let record = state
            .achievements
            .get_mut(&id)
            .ok_or_else(|| missing_achievement(id))?;
        if record.status != AchievementStatus::Pending {
            return Ok(false);
        }
        record.status = AchievementStatus::Completed;
        record.title = Some(enrichment.title.clone());
        record.icon = Some(enrichment.icon.clone());
        record.updated_at = now;
        Ok(true)
    }

    async fn record_attempt_failure(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        let mut state = self.state.lock().await;
        let record = state
            .achievements
            .get_mut(&id)
            .ok_or_else(|| missing_achievement(id))?;
        if record.status == AchievementStatus::Pending {
            record.attempts += 1;
            record.last_error = Some(error.to_string());
            record.updated_at = now;
        }
        Ok(record.attempts)
    }

    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        let record = state
            .achievements
            .get_mut(&id)
            .ok_or_else(|| missing_achievement(id))?;
        if record.status != AchievementStatus::Pending {
            return Ok(false);
        }
        record.status = AchievementStatus::Failed;
        record.updated_at = now;
        Ok(true)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Achievement>, AppError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Achievement> = state
            .achievements
            .values()
            .filter(|a| a.status == AchievementStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(pending)
    }

    async fn list_completed(&self, user_id: &str) -> Result<Vec<AchievementView>, AppError> {
        let state = self.state.lock().await;
        let mut views: Vec<AchievementView> = state
            .achievements
            .values()
            .filter(|a| a.user_id == user_id)
            .filter_map(Achievement::view)
            .collect();
        views.sort_by(|a, b| a.unlocked_at.cmp(&b.unlocked_at).then(a.code.cmp(&b.code)));
        Ok(views)
    }

    async fn achievements_for_user(&self, user_id: &str) -> Result<Vec<Achievement>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<Achievement> = state
            .achievements
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}
