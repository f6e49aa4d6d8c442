use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use parley_core::achievements::{Achievement, RetrySummary};
use parley_core::conversation::validate_user_id;
use parley_core::error::ApiError;
use parley_core::reminders::{RunRemindersRequest, RunReport};

use crate::adapters::{STORAGE, bounded};
use crate::error::AppError;
use crate::extract::AdminAccess;
use crate::state::AppState;

/// Pending achievements examined per retry sweep.
pub const RETRY_BATCH: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/reminders/run", post(run_reminders))
        .route("/v1/admin/achievements/retry", post(retry_achievements))
        .route("/v1/admin/users/{user_id}/achievements", get(user_achievements))
}

/// Run the reminder scheduler once
///
/// The body is optional; `now` defaults to the server clock. Safe to call
/// while the background ticker is running.
#[utoipa::path(
    post,
    path = "/v1/admin/reminders/run",
    request_body(content = RunRemindersRequest, description = "Optional evaluation instant"),
    responses(
        (status = 200, description = "Run report", body = RunReport),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Missing or invalid admin token", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn run_reminders(
    State(state): State<AppState>,
    _admin: AdminAccess,
    body: Bytes,
) -> Result<Json<RunReport>, AppError> {
    let req = parse_optional_body(&body)?;
    let now = req.now.unwrap_or_else(Utc::now);
    tracing::info!(%now, "Manual reminder run requested");
    Ok(Json(state.scheduler.run_once(now).await))
}

/// Retry enrichment of pending achievements
#[utoipa::path(
    post,
    path = "/v1/admin/achievements/retry",
    responses(
        (status = 200, description = "Sweep summary", body = RetrySummary),
        (status = 401, description = "Missing or invalid admin token", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn retry_achievements(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Result<Json<RetrySummary>, AppError> {
    let summary = state.achievements.retry_pending(Utc::now(), RETRY_BATCH).await?;
    Ok(Json(summary))
}

/// Every award record of one user, in any status
#[utoipa::path(
    get,
    path = "/v1/admin/users/{user_id}/achievements",
    params(("user_id" = String, Path, description = "User identity key")),
    responses(
        (status = 200, description = "Award records, oldest first", body = Vec<Achievement>),
        (status = 401, description = "Missing or invalid admin token", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn user_achievements(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Achievement>>, AppError> {
    validate_user_id(&user_id).map_err(|msg| AppError::validation(msg, "user_id"))?;
    let records = bounded(
        STORAGE,
        state.timeouts.store,
        state.stores.achievements.achievements_for_user(&user_id),
    )
    .await?;
    Ok(Json(records))
}

fn parse_optional_body(body: &[u8]) -> Result<RunRemindersRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunRemindersRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| AppError::Validation {
        message: format!("Invalid request body: {err}"),
        field: Some("now".to_string()),
        received: None,
        docs_hint: Some("Send {} or {\"now\": \"2025-05-01T13:30:00Z\"}.".to_string()),
    })
}
