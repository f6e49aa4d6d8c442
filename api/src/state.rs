use std::sync::Arc;

use parley_core::achievements::{CatalogError, RuleCatalog};
use sqlx::PgPool;

use crate::achievements::{AchievementEngine, CatalogEnricher};
use crate::adapters::{
    CalendarAdapter, EchoGenerator, MemoryCalendar, OpenAiChatGenerator, PatternExtractor,
    PgCalendar, TextGenerator,
};
use crate::chat::ChatPipeline;
use crate::config::{CalendarBackend, Config, GenerationBackend, StoreBackend, Timeouts};
use crate::reminders::ReminderScheduler;
use crate::store::{
    AchievementLedger, ConversationStore, MemoryStore, PgStore, ReminderLedger, UserStore,
};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0} backend needs DATABASE_URL")]
    MissingDatabase(&'static str),
    #[error("OpenAI generation backend needs PARLEY_LLM_* settings")]
    MissingLlm,
    #[error("failed to read achievement catalog {path}: {source}")]
    CatalogRead {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid achievement catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// The four storage seams, all served by one backend.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub reminders: Arc<dyn ReminderLedger>,
    pub achievements: Arc<dyn AchievementLedger>,
}

impl Stores {
    fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: UserStore + ConversationStore + ReminderLedger + AchievementLedger + 'static,
    {
        Self {
            users: store.clone(),
            conversations: store.clone(),
            reminders: store.clone(),
            achievements: store,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Option<PgPool>,
    pub stores: Stores,
    pub chat: Arc<ChatPipeline>,
    pub achievements: Arc<AchievementEngine>,
    pub scheduler: Arc<ReminderScheduler>,
    pub admin_token: Option<String>,
    pub timeouts: Timeouts,
}

/// Load the rule catalog from `PARLEY_ACHIEVEMENT_CATALOG`, or the built-in one.
pub fn load_catalog(config: &Config) -> Result<RuleCatalog, StartupError> {
    match &config.achievement_catalog {
        None => Ok(RuleCatalog::builtin(&config.courtesy_marker)),
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| StartupError::CatalogRead {
                path: path.clone(),
                source,
            })?;
            Ok(RuleCatalog::from_json(&raw)?)
        }
    }
}

impl AppState {
    /// Resolve every configured backend once. `db` must be present when any
    /// backend is `postgres`.
    pub fn build(config: &Config, db: Option<PgPool>, catalog: RuleCatalog) -> Result<Self, StartupError> {
        let stores = match config.store {
            StoreBackend::Postgres => {
                let pool = db.clone().ok_or(StartupError::MissingDatabase("store"))?;
                Stores::from_backend(Arc::new(PgStore::new(pool)))
            }
            StoreBackend::Memory => Stores::from_backend(Arc::new(MemoryStore::new())),
        };

        let calendar: Arc<dyn CalendarAdapter> = match config.calendar {
            CalendarBackend::Postgres => {
                let pool = db.clone().ok_or(StartupError::MissingDatabase("calendar"))?;
                Arc::new(PgCalendar::new(pool))
            }
            CalendarBackend::Memory => Arc::new(MemoryCalendar::new()),
        };

        let generator: Arc<dyn TextGenerator> = match config.generation {
            GenerationBackend::Echo => Arc::new(EchoGenerator),
            GenerationBackend::OpenAi => {
                let llm = config.llm.clone().ok_or(StartupError::MissingLlm)?;
                Arc::new(OpenAiChatGenerator::new(llm))
            }
        };

        tracing::info!(
            store = ?config.store,
            calendar = ?config.calendar,
            generation = ?config.generation,
            rules = catalog.rules().len(),
            "Backends resolved"
        );

        Ok(Self::assemble(
            db,
            stores,
            calendar,
            generator,
            catalog,
            config,
        ))
    }

    fn assemble(
        db: Option<PgPool>,
        stores: Stores,
        calendar: Arc<dyn CalendarAdapter>,
        generator: Arc<dyn TextGenerator>,
        catalog: RuleCatalog,
        config: &Config,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let achievements = Arc::new(AchievementEngine::new(
            stores.achievements.clone(),
            catalog.clone(),
            Arc::new(CatalogEnricher::new(catalog)),
            config.enrichment_max_attempts,
            config.timeouts,
        ));
        let chat = Arc::new(ChatPipeline::new(
            stores.users.clone(),
            stores.conversations.clone(),
            generator,
            Arc::new(PatternExtractor),
            calendar.clone(),
            achievements.clone(),
            config.context_window,
            config.timeouts,
        ));
        let scheduler = Arc::new(ReminderScheduler::new(
            stores.users.clone(),
            calendar,
            stores.conversations.clone(),
            stores.reminders.clone(),
            config.scheduler.clone(),
            config.timeouts,
        ));

        Self {
            db,
            stores,
            chat,
            achievements,
            scheduler,
            admin_token: config.admin_token.clone(),
            timeouts: config.timeouts,
        }
    }
}
