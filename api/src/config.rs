use std::str::FromStr;
use std::time::Duration;

use parley_core::achievements::DEFAULT_COURTESY_MARKER;
use parley_core::reminders::DEFAULT_HORIZON_MINUTES;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },
    #[error("{key} has invalid value '{value}': expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Where users, messages and ledgers live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

/// Which calendar provider backs the calendar adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalendarBackend {
    Postgres,
    Memory,
}

/// Which text generation backend answers chat turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenerationBackend {
    Echo,
    OpenAi,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for CalendarBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "echo" => Ok(Self::Echo),
            "openai" => Ok(Self::OpenAi),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub horizon: chrono::Duration,
    pub interval: Duration,
    pub budget: Duration,
    pub page_size: i64,
    pub concurrency: usize,
}

/// Upper bounds applied to every adapter and storage call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub adapter: Duration,
    pub store: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            adapter: Duration::from_secs(15),
            store: Duration::from_secs(5),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            horizon: chrono::Duration::minutes(DEFAULT_HORIZON_MINUTES),
            interval: Duration::from_secs(300),
            budget: Duration::from_secs(120),
            page_size: 100,
            concurrency: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub store: StoreBackend,
    pub calendar: CalendarBackend,
    pub generation: GenerationBackend,
    pub llm: Option<LlmConfig>,
    pub scheduler: SchedulerSettings,
    pub timeouts: Timeouts,
    pub context_window: i64,
    pub enrichment_max_attempts: i32,
    pub courtesy_marker: String,
    pub achievement_catalog: Option<String>,
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Every value is
    /// parsed here so a bad deployment fails at startup, not at first use.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = parse_or(&get, "PARLEY_STORE_BACKEND", StoreBackend::Postgres, "postgres|memory")?;
        let calendar = parse_or(
            &get,
            "PARLEY_CALENDAR_BACKEND",
            CalendarBackend::Postgres,
            "postgres|memory",
        )?;
        let generation = parse_or(
            &get,
            "PARLEY_GENERATION_BACKEND",
            GenerationBackend::Echo,
            "echo|openai",
        )?;

        // calendar_events rows reference users, which must live in the same database.
        if store == StoreBackend::Memory && calendar == CalendarBackend::Postgres {
            return Err(ConfigError::Invalid {
                key: "PARLEY_CALENDAR_BACKEND",
                value: "postgres".to_string(),
                expected: "memory when PARLEY_STORE_BACKEND is memory",
            });
        }

        let database_url = get("DATABASE_URL");
        let needs_db = store == StoreBackend::Postgres || calendar == CalendarBackend::Postgres;
        if needs_db && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        let llm = match generation {
            GenerationBackend::Echo => None,
            GenerationBackend::OpenAi => Some(LlmConfig {
                base_url: get("PARLEY_LLM_BASE_URL")
                    .ok_or(ConfigError::Missing { key: "PARLEY_LLM_BASE_URL" })?,
                api_key: get("PARLEY_LLM_API_KEY")
                    .ok_or(ConfigError::Missing { key: "PARLEY_LLM_API_KEY" })?,
                model: get("PARLEY_LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            }),
        };

        let horizon_minutes: i64 = parse_positive(&get, "PARLEY_REMINDER_HORIZON_MINUTES", DEFAULT_HORIZON_MINUTES)?;
        let scheduler = SchedulerSettings {
            horizon: chrono::Duration::minutes(horizon_minutes),
            interval: Duration::from_secs(parse_positive(&get, "PARLEY_SCHEDULER_INTERVAL_SECS", 300)?),
            budget: Duration::from_secs(parse_positive(&get, "PARLEY_SCHEDULER_BUDGET_SECS", 120)?),
            page_size: parse_positive(&get, "PARLEY_SCHEDULER_PAGE_SIZE", 100)?,
            concurrency: parse_positive(&get, "PARLEY_SCHEDULER_CONCURRENCY", 8)?,
        };
        let timeouts = Timeouts {
            adapter: Duration::from_secs(parse_positive(&get, "PARLEY_ADAPTER_TIMEOUT_SECS", 15)?),
            store: Duration::from_secs(parse_positive(&get, "PARLEY_STORE_TIMEOUT_SECS", 5)?),
        };

        Ok(Self {
            port: parse_or(&get, "PORT", 3000, "a TCP port")?,
            database_url,
            store,
            calendar,
            generation,
            llm,
            scheduler,
            timeouts,
            context_window: parse_positive(&get, "PARLEY_CONTEXT_WINDOW", 20)?,
            enrichment_max_attempts: parse_positive(&get, "PARLEY_ENRICHMENT_MAX_ATTEMPTS", 3)?,
            courtesy_marker: get("PARLEY_COURTESY_MARKER")
                .unwrap_or_else(|| DEFAULT_COURTESY_MARKER.to_string()),
            achievement_catalog: get("PARLEY_ACHIEVEMENT_CATALOG"),
            admin_token: get("PARLEY_ADMIN_TOKEN"),
            cors_origins: get("PARLEY_CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key,
            value,
            expected,
        }),
    }
}

fn parse_positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default, "a positive integer")?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: get(key).unwrap_or_default(),
            expected: "a positive integer",
        });
    }
    Ok(value)
}
