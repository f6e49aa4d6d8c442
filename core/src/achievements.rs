use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::calendar::CalendarEvent;

pub const FIRST_EVENT: &str = "first_event";
pub const POLITE: &str = "polite";
pub const CONVERSATIONALIST: &str = "conversationalist";

pub const DEFAULT_COURTESY_MARKER: &str = "thank you";
pub const DEFAULT_CONVERSATIONALIST_MESSAGES: i64 = 10;

/// Lifecycle of an unlock record.
///
/// `Pending -> Completed` once display fields are filled in,
/// `Pending -> Failed` once enrichment runs out of attempts.
/// Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AchievementStatus {
    Pending,
    Completed,
    Failed,
}

impl AchievementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AchievementStatus::Pending => "pending",
            AchievementStatus::Completed => "completed",
            AchievementStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(AchievementStatus::Pending),
            "completed" => Some(AchievementStatus::Completed),
            "failed" => Some(AchievementStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AchievementStatus::Pending)
    }
}

/// Condition under which a rule unlocks. Tagged by `kind` in catalog JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    /// The turn produced at least `at_least` calendar events.
    ExtractedEvents { at_least: usize },
    /// The generated reply contains `marker`, ignoring case.
    ReplyContains { marker: String },
    /// The user has sent at least `at_least` messages in total.
    MessageCount { at_least: i64 },
}

impl RulePredicate {
    pub fn holds(&self, trigger: &Trigger) -> bool {
        match self {
            RulePredicate::ExtractedEvents { at_least } => {
                trigger.extracted_events.len() >= (*at_least).max(1)
            }
            RulePredicate::ReplyContains { marker } => {
                let marker = marker.trim().to_lowercase();
                !marker.is_empty() && trigger.reply_text.to_lowercase().contains(&marker)
            }
            RulePredicate::MessageCount { at_least } => trigger.message_count >= *at_least,
        }
    }
}

/// Static catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementRule {
    pub code: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub predicate: RulePredicate,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("rule #{0} has an empty code")]
    EmptyCode(usize),
    #[error("rule code '{0}' appears more than once")]
    DuplicateCode(String),
}

/// Ordered, immutable rule list. Evaluation follows list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCatalog {
    rules: Vec<AchievementRule>,
}

impl RuleCatalog {
    pub fn new(rules: Vec<AchievementRule>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for (index, rule) in rules.iter().enumerate() {
            if rule.code.trim().is_empty() {
                return Err(CatalogError::EmptyCode(index));
            }
            if !seen.insert(rule.code.as_str()) {
                return Err(CatalogError::DuplicateCode(rule.code.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Parse a catalog file: a JSON array of rules.
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let rules: Vec<AchievementRule> = serde_json::from_str(raw)?;
        Self::new(rules)
    }

    /// Built-in catalog used when no catalog file is configured.
    pub fn builtin(courtesy_marker: &str) -> Self {
        Self {
            rules: vec![
                AchievementRule {
                    code: FIRST_EVENT.to_string(),
                    title: "First Event".to_string(),
                    description: "A conversation put something on your calendar.".to_string(),
                    icon: "calendar-check".to_string(),
                    predicate: RulePredicate::ExtractedEvents { at_least: 1 },
                },
                AchievementRule {
                    code: POLITE.to_string(),
                    title: "Good Manners".to_string(),
                    description: "Your assistant thanked you.".to_string(),
                    icon: "sparkles".to_string(),
                    predicate: RulePredicate::ReplyContains {
                        marker: courtesy_marker.to_string(),
                    },
                },
                AchievementRule {
                    code: CONVERSATIONALIST.to_string(),
                    title: "Conversationalist".to_string(),
                    description: format!(
                        "Sent {DEFAULT_CONVERSATIONALIST_MESSAGES} messages."
                    ),
                    icon: "chat-bubbles".to_string(),
                    predicate: RulePredicate::MessageCount {
                        at_least: DEFAULT_CONVERSATIONALIST_MESSAGES,
                    },
                },
            ],
        }
    }

    pub fn rules(&self) -> &[AchievementRule] {
        &self.rules
    }

    pub fn get(&self, code: &str) -> Option<&AchievementRule> {
        self.rules.iter().find(|rule| rule.code == code)
    }
}

/// Facts about one chat turn handed to the rule engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub user_id: String,
    /// Running count of messages the user has sent, including this turn's
    pub message_count: i64,
    pub reply_text: String,
    /// Events extracted and stored during this turn
    pub extracted_events: Vec<CalendarEvent>,
}

/// Ledger row for one (user, code) unlock.
///
/// `title` and `icon` are snapshots taken when enrichment completes and are
/// never rewritten from the catalog afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Achievement {
    pub id: Uuid,
    pub user_id: String,
    pub code: String,
    pub status: AchievementStatus,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Achievement {
    pub fn pending(user_id: &str, code: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            code: code.to_string(),
            status: AchievementStatus::Pending,
            title: None,
            icon: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// User-facing projection; only completed records have one.
    pub fn view(&self) -> Option<AchievementView> {
        if self.status != AchievementStatus::Completed {
            return None;
        }
        Some(AchievementView {
            code: self.code.clone(),
            title: self.title.clone().unwrap_or_default(),
            icon: self.icon.clone().unwrap_or_default(),
            unlocked_at: self.updated_at,
        })
    }
}

/// Display fields produced by an enrichment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub title: String,
    pub icon: String,
}

/// A completed achievement as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AchievementView {
    pub code: String,
    pub title: String,
    pub icon: String,
    pub unlocked_at: DateTime<Utc>,
}

/// Outcome of a sweep over pending achievements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RetrySummary {
    pub examined: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
}
