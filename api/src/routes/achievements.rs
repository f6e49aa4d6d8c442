use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use parley_core::achievements::AchievementView;
use parley_core::error::ApiError;

use crate::error::AppError;
use crate::extract::UserId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/achievements", get(list_achievements))
}

/// Completed achievements in unlock order
///
/// Pending and failed awards are never listed.
#[utoipa::path(
    get,
    path = "/v1/achievements",
    params(("x-user-id" = String, Header, description = "Opaque user identity key")),
    responses(
        (status = 200, description = "Completed achievements", body = Vec<AchievementView>),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "achievements"
)]
pub async fn list_achievements(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<AchievementView>>, AppError> {
    Ok(Json(state.achievements.list_completed(&user_id).await?))
}
