//! External collaborator boundaries: calendar, text generation, event extraction.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

pub mod calendar;
pub mod extraction;
pub mod generation;

pub use calendar::{CalendarAdapter, MemoryCalendar, PgCalendar};
pub use extraction::{EventExtractor, PatternExtractor};
pub use generation::{EchoGenerator, OpenAiChatGenerator, TextGenerator};

pub const CALENDAR: &str = "calendar";
pub const ENRICHMENT: &str = "achievement_enrichment";
pub const EXTRACTION: &str = "event_extraction";
pub const GENERATION: &str = "text_generation";
pub const STORAGE: &str = "storage";

/// Run one call into an adapter or the store with an upper time bound.
/// An elapsed bound becomes [`AppError::AdapterTimeout`] instead of a hang.
pub async fn bounded<T, F>(adapter: &'static str, limit: Duration, call: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::AdapterTimeout {
            adapter,
            after: limit,
        }),
    }
}
