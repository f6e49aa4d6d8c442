use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parley_core::achievements::Trigger;
use parley_core::calendar::CalendarEvent;
use parley_core::conversation::{ChatResponse, MAX_MESSAGE_CHARS, Role, validate_user_id};

use crate::achievements::AchievementEngine;
use crate::adapters::{
    CALENDAR, CalendarAdapter, EXTRACTION, EventExtractor, GENERATION, STORAGE, TextGenerator,
    bounded,
};
use crate::config::Timeouts;
use crate::error::AppError;
use crate::store::{ConversationStore, UserStore};

/// One conversational turn: persist, reply, derive events, award.
///
/// Only storage and generation failures fail the turn. Extraction, calendar
/// and achievement problems are logged and the turn still succeeds.
pub struct ChatPipeline {
    users: Arc<dyn UserStore>,
    conversations: Arc<dyn ConversationStore>,
    generator: Arc<dyn TextGenerator>,
    extractor: Arc<dyn EventExtractor>,
    calendar: Arc<dyn CalendarAdapter>,
    achievements: Arc<AchievementEngine>,
    context_window: i64,
    timeouts: Timeouts,
}

impl ChatPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        conversations: Arc<dyn ConversationStore>,
        generator: Arc<dyn TextGenerator>,
        extractor: Arc<dyn EventExtractor>,
        calendar: Arc<dyn CalendarAdapter>,
        achievements: Arc<AchievementEngine>,
        context_window: i64,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            users,
            conversations,
            generator,
            extractor,
            calendar,
            achievements,
            context_window: context_window.max(1),
            timeouts,
        }
    }

    pub async fn handle_turn(
        &self,
        user_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatResponse, AppError> {
        validate_user_id(user_id).map_err(|msg| AppError::validation(msg, "headers.x-user-id"))?;
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::validation("content must not be empty", "content"));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::validation(
                format!("content must be <= {MAX_MESSAGE_CHARS} characters"),
                "content",
            ));
        }

        let store = self.timeouts.store;
        bounded(STORAGE, store, self.users.ensure_user(user_id)).await?;
        bounded(
            STORAGE,
            store,
            self.conversations.append_message(user_id, Role::User, content, now),
        )
        .await?;

        let context = bounded(
            STORAGE,
            store,
            self.conversations.recent_messages(user_id, self.context_window),
        )
        .await?;
        let reply = bounded(
            GENERATION,
            self.timeouts.adapter,
            self.generator.generate(content, &context),
        )
        .await?;
        bounded(
            STORAGE,
            store,
            self.conversations.append_message(user_id, Role::Assistant, &reply, now),
        )
        .await?;

        let tz = match bounded(STORAGE, store, self.users.profile(user_id)).await {
            Ok(profile) => profile.map(|p| p.tz()).unwrap_or(Tz::UTC),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Profile lookup failed, resolving events in UTC");
                Tz::UTC
            }
        };
        let events = self.record_events(user_id, &reply, tz).await;

        let trigger = Trigger {
            user_id: user_id.to_string(),
            message_count: match bounded(STORAGE, store, self.conversations.count_user_messages(user_id)).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "Message count unavailable");
                    0
                }
            },
            reply_text: reply.clone(),
            extracted_events: events.clone(),
        };
        let achievements = match self.achievements.evaluate(&trigger, now).await {
            Ok(unlocked) => unlocked.into_iter().map(|a| a.code).collect(),
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Achievement evaluation failed");
                Vec::new()
            }
        };

        Ok(ChatResponse {
            reply,
            events,
            achievements,
        })
    }

    /// Extract, validate and store the events mentioned in `reply`.
    async fn record_events(&self, user_id: &str, reply: &str, tz: Tz) -> Vec<CalendarEvent> {
        let candidates = match bounded(
            EXTRACTION,
            self.timeouts.adapter,
            self.extractor.extract_events(reply),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(user_id, error = %err, "Event extraction failed");
                return Vec::new();
            }
        };

        let mut stored = Vec::with_capacity(candidates.len());
        let mut rejected = 0usize;
        for candidate in &candidates {
            let mut event = match candidate.resolve(tz) {
                Ok(event) => event,
                Err(err) => {
                    rejected += 1;
                    tracing::info!(user_id, title = %candidate.title, error = %err, "Rejected extracted event");
                    continue;
                }
            };
            match bounded(
                CALENDAR,
                self.timeouts.adapter,
                self.calendar.add_event(user_id, &event.title, event.start, event.end),
            )
            .await
            {
                Ok(id) => {
                    event.id = id;
                    stored.push(event);
                }
                Err(err) => {
                    tracing::warn!(user_id, title = %event.title, error = %err, "Failed to add event to calendar");
                }
            }
        }

        if !candidates.is_empty() {
            tracing::debug!(
                user_id,
                extracted = candidates.len(),
                stored = stored.len(),
                rejected,
                "Processed extracted events"
            );
        }
        stored
    }
}
