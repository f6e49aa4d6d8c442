use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::CalendarEvent;

/// Maximum accepted length (in characters) of a single user message.
pub const MAX_MESSAGE_CHARS: usize = 8_000;

/// Maximum accepted length of an opaque user identity key.
pub const MAX_USER_ID_CHARS: usize = 128;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single entry of a user's conversation log. Messages are immutable once
/// written and ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    /// UUIDv7, so insertion order breaks `created_at` ties
    pub id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Profile fields of a user. The identity key is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// IANA timezone name, e.g. "Europe/Berlin"
    pub timezone: String,
    /// Free-form settings blob
    pub settings: serde_json::Value,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            timezone: "UTC".to_string(),
            settings: serde_json::json!({}),
        }
    }

    /// The profile's timezone; unknown names fall back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }
}

/// Returns a human-readable reason when `user_id` is not an acceptable identity key.
pub fn validate_user_id(user_id: &str) -> Result<(), String> {
    if user_id.trim().is_empty() {
        return Err("user id must not be empty".to_string());
    }
    if user_id.chars().count() > MAX_USER_ID_CHARS {
        return Err(format!("user id must be <= {MAX_USER_ID_CHARS} characters"));
    }
    Ok(())
}

/// Request to run one chat turn
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// The user's message
    pub content: String,
}

/// Result of one chat turn
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatResponse {
    /// The generated assistant reply
    pub reply: String,
    /// Calendar events derived from the reply and stored in the user's calendar
    pub events: Vec<CalendarEvent>,
    /// Codes of achievements unlocked by this turn
    pub achievements: Vec<String>,
}
