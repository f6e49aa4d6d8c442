use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::achievements::{Achievement, AchievementStatus, AchievementView, Enrichment};
use parley_core::conversation::{Message, Role, UserProfile};
use parley_core::reminders::Reminder;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    AchievementLedger, ConversationStore, InsertOutcome, ReminderLedger, UserStore,
};
use crate::error::{AppError, is_unique_violation};

/// Postgres-backed store. Uniqueness of both ledgers is enforced by the
/// `reminders_user_event_key` and `achievements_user_code_key` constraints.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map an insert-or-ignore result. `ON CONFLICT DO NOTHING` yields no row;
/// a unique violation from a concurrent writer is treated the same way.
fn insert_outcome<R, T>(
    result: Result<Option<R>, sqlx::Error>,
    into: impl FnOnce(R) -> Result<T, AppError>,
) -> Result<InsertOutcome<T>, AppError> {
    match result {
        Ok(Some(row)) => Ok(InsertOutcome::Inserted(into(row)?)),
        Ok(None) => Ok(InsertOutcome::AlreadyExists),
        Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::AlreadyExists),
        Err(err) => Err(AppError::Database(err)),
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    display_name: Option<String>,
    timezone: String,
    settings: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    user_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, AppError> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            AppError::Internal(format!("message {} has unknown role '{}'", self.id, self.role))
        })?;
        Ok(Message {
            id: self.id,
            user_id: self.user_id,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReminderRow {
    id: Uuid,
    user_id: String,
    event_id: String,
    sent_at: DateTime<Utc>,
}

impl ReminderRow {
    fn into_reminder(self) -> Reminder {
        Reminder {
            id: self.id,
            user_id: self.user_id,
            event_id: self.event_id,
            sent_at: self.sent_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AchievementRow {
    id: Uuid,
    user_id: String,
    code: String,
    status: String,
    title: Option<String>,
    icon: Option<String>,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AchievementRow {
    fn into_achievement(self) -> Result<Achievement, AppError> {
        let status = AchievementStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(format!(
                "achievement {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(Achievement {
            id: self.id,
            user_id: self.user_id,
            code: self.code,
            status,
            title: self.title,
            icon: self.icon,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const ACHIEVEMENT_COLUMNS: &str =
    "id, user_id, code, status, title, icon, attempts, last_error, created_at, updated_at";

#[async_trait]
impl UserStore for PgStore {
    async fn ensure_user(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, display_name, timezone, settings FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserProfile {
            user_id: r.id,
            display_name: r.display_name,
            timezone: r.timezone,
            settings: r.settings,
        }))
    }

    async fn list_user_ids(&self, after: Option<&str>, limit: i64) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id
            FROM users
            WHERE ($1::text IS NULL OR id > $1)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ConversationStore for PgStore {
    async fn append_message(
        &self,
        user_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Message, AppError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (id, user_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, role, content, created_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(role.as_str())
        .bind(content)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row.into_message()
    }

    async fn recent_messages(&self, user_id: &str, limit: i64) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, user_id, role, content, created_at
            FROM (
                SELECT id, user_id, role, content, created_at
                FROM messages
                WHERE user_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn count_user_messages(&self, user_id: &str) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE user_id = $1 AND role = 'user'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl ReminderLedger for PgStore {
    async fn try_record(
        &self,
        user_id: &str,
        event_id: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<InsertOutcome<Reminder>, AppError> {
        let result = sqlx::query_as::<_, ReminderRow>(
            r#"
            INSERT INTO reminders (id, user_id, event_id, sent_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT reminders_user_event_key DO NOTHING
            RETURNING id, user_id, event_id, sent_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(event_id)
        .bind(sent_at)
        .fetch_optional(&self.pool)
        .await;

        insert_outcome(result, |row| Ok(row.into_reminder()))
    }

    async fn reminders_for_user(&self, user_id: &str) -> Result<Vec<Reminder>, AppError> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT id, user_id, event_id, sent_at
            FROM reminders
            WHERE user_id = $1
            ORDER BY sent_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReminderRow::into_reminder).collect())
    }
}

#[async_trait]
impl AchievementLedger for PgStore {
    async fn owned_codes(&self, user_id: &str) -> Result<Vec<String>, AppError> {
        let codes = sqlx::query_scalar::<_, String>(
            "SELECT code FROM achievements WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(codes)
    }

    async fn try_insert_pending(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome<Achievement>, AppError> {
        let result = sqlx::query_as::<_, AchievementRow>(&format!(
            r#"
            INSERT INTO achievements (id, user_id, code, status, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, $4)
            ON CONFLICT ON CONSTRAINT achievements_user_code_key DO NOTHING
            RETURNING {ACHIEVEMENT_COLUMNS}
            "#
        ))
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await;

        insert_outcome(result, AchievementRow::into_achievement)
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        enrichment: &Enrichment,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE achievements
            SET status = 'completed', title = $2, icon = $3, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(&enrichment.title)
        .bind(&enrichment.icon)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_attempt_failure(
        &self,
        id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE achievements
            SET attempts = attempts + CASE WHEN status = 'pending' THEN 1 ELSE 0 END,
                last_error = CASE WHEN status = 'pending' THEN $2 ELSE last_error END,
                updated_at = CASE WHEN status = 'pending' THEN $3 ELSE updated_at END
            WHERE id = $1
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or_else(|| AppError::NotFound {
            resource: format!("achievement {id}"),
        })
    }

    async fn mark_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE achievements
            SET status = 'failed', updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<Achievement>, AppError> {
        let rows = sqlx::query_as::<_, AchievementRow>(&format!(
            r#"
            SELECT {ACHIEVEMENT_COLUMNS}
            FROM achievements
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AchievementRow::into_achievement).collect()
    }

    async fn list_completed(&self, user_id: &str) -> Result<Vec<AchievementView>, AppError> {
        let rows = sqlx::query_as::<_, AchievementRow>(&format!(
            r#"
            SELECT {ACHIEVEMENT_COLUMNS}
            FROM achievements
            WHERE user_id = $1 AND status = 'completed'
            ORDER BY updated_at ASC, code ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(view) = row.into_achievement()?.view() {
                views.push(view);
            }
        }
        Ok(views)
    }

    async fn achievements_for_user(&self, user_id: &str) -> Result<Vec<Achievement>, AppError> {
        let rows = sqlx::query_as::<_, AchievementRow>(&format!(
            r#"
            SELECT {ACHIEVEMENT_COLUMNS}
            FROM achievements
            WHERE user_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AchievementRow::into_achievement).collect()
    }
}
