use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod achievements;
mod adapters;
mod chat;
mod config;
mod error;
mod extract;
mod middleware;
mod reminders;
mod routes;
mod state;
mod store;

use crate::achievements::AchievementEngine;
use crate::config::{CalendarBackend, Config, StoreBackend};
use crate::reminders::ReminderScheduler;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Parley API",
        version = "0.1.0",
        description = "Conversational assistant that turns chat into calendar events, reminders and achievements."
    ),
    paths(
        routes::health::health_check,
        routes::chat::chat,
        routes::chat::list_messages,
        routes::achievements::list_achievements,
        routes::admin::run_reminders,
        routes::admin::retry_achievements,
        routes::admin::user_achievements,
        routes::reminders::list_reminders,
    ),
    components(schemas(
        HealthResponse,
        parley_core::error::ApiError,
        parley_core::conversation::ChatRequest,
        parley_core::conversation::ChatResponse,
        parley_core::conversation::Message,
        parley_core::conversation::Role,
        parley_core::calendar::CalendarEvent,
        parley_core::achievements::Achievement,
        parley_core::achievements::AchievementStatus,
        parley_core::achievements::AchievementView,
        parley_core::achievements::RetrySummary,
        parley_core::reminders::Reminder,
        parley_core::reminders::RunRemindersRequest,
        parley_core::reminders::RunReport,
        parley_core::reminders::UserFailure,
        parley_core::reminders::FailureKind,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub fn app(app_state: state::AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::chat::router())
        .merge(routes::achievements::router())
        .merge(routes::reminders::router())
        .merge(routes::admin::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(cors_origins)),
        )
        .with_state(app_state)
}

/// Background ticker: one reminder run and one enrichment retry sweep per
/// interval. A slow run delays the next tick instead of overlapping it.
fn spawn_ticker(
    scheduler: Arc<ReminderScheduler>,
    achievements: Arc<AchievementEngine>,
    every: std::time::Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            scheduler.run_once(Utc::now()).await;
            match achievements
                .retry_pending(Utc::now(), routes::admin::RETRY_BATCH)
                .await
            {
                Ok(summary) if summary.examined > 0 => {
                    tracing::info!(?summary, "Achievement retry sweep finished");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(error = %err, "Achievement retry sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let needs_db = config.store == StoreBackend::Postgres || config.calendar == CalendarBackend::Postgres;
    let db = match (&config.database_url, needs_db) {
        (Some(database_url), true) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");
            Some(pool)
        }
        _ => None,
    };

    let app_state = match state::load_catalog(&config)
        .and_then(|catalog| state::AppState::build(&config, db, catalog))
    {
        Ok(app_state) => app_state,
        Err(err) => {
            tracing::error!(error = %err, "Startup failed");
            std::process::exit(1);
        }
    };

    spawn_ticker(
        app_state.scheduler.clone(),
        app_state.achievements.clone(),
        config.scheduler.interval,
    );

    let app = app(app_state, &config.cors_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Parley API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}
