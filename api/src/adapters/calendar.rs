use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_core::calendar::{CalendarEvent, validate_event};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

/// A user's calendar. Listing an empty window returns an empty vec, not an error.
#[async_trait]
pub trait CalendarAdapter: Send + Sync {
    /// Store an event; returns the provider id when the provider assigns durable ids.
    async fn add_event(
        &self,
        user_id: &str,
        title: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<String>, AppError>;

    /// Events whose start lies in `[from, to)`, ordered by start.
    async fn list_events(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, AppError>;
}

fn check(title: &str, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> Result<(), AppError> {
    let event = CalendarEvent {
        id: None,
        title: title.to_string(),
        start,
        end,
    };
    validate_event(&event).map_err(|err| AppError::validation(err.to_string(), "event"))
}

/// Durable provider backed by the `calendar_events` table.
#[derive(Clone)]
pub struct PgCalendar {
    pool: PgPool,
}

impl PgCalendar {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CalendarEventRow {
    id: Uuid,
    title: String,
    start_at: DateTime<Utc>,
    end_at: Option<DateTime<Utc>>,
}

#[async_trait]
impl CalendarAdapter for PgCalendar {
    async fn add_event(
        &self,
        user_id: &str,
        title: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<String>, AppError> {
        check(title, start, end)?;
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO calendar_events (id, user_id, title, start_at, end_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(title.trim())
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(id.to_string()))
    }

    async fn list_events(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, AppError> {
        let rows = sqlx::query_as::<_, CalendarEventRow>(
            r#"
            SELECT id, title, start_at, end_at
            FROM calendar_events
            WHERE user_id = $1 AND start_at >= $2 AND start_at < $3
            ORDER BY start_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CalendarEvent {
                id: Some(row.id.to_string()),
                title: row.title,
                start: row.start_at,
                end: row.end_at,
            })
            .collect())
    }
}

/// In-process calendar. Assigns no durable ids, so reminders for its events
/// are keyed by content fingerprint.
#[derive(Default)]
pub struct MemoryCalendar {
    events: RwLock<HashMap<String, Vec<CalendarEvent>>>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarAdapter for MemoryCalendar {
    async fn add_event(
        &self,
        user_id: &str,
        title: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Option<String>, AppError> {
        check(title, start, end)?;
        let mut events = self.events.write().await;
        events.entry(user_id.to_string()).or_default().push(CalendarEvent {
            id: None,
            title: title.trim().to_string(),
            start,
            end,
        });
        Ok(None)
    }

    async fn list_events(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, AppError> {
        let events = self.events.read().await;
        let mut found: Vec<CalendarEvent> = events
            .get(user_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.start >= from && e.start < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by_key(|e| e.start);
        Ok(found)
    }
}
