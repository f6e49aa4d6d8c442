use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use parley_core::error::ApiError;
use parley_core::reminders::Reminder;

use crate::adapters::{STORAGE, bounded};
use crate::error::AppError;
use crate::extract::UserId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/reminders", get(list_reminders))
}

/// Reminders already delivered (or claimed) for the caller, oldest first
#[utoipa::path(
    get,
    path = "/v1/reminders",
    params(("x-user-id" = String, Header, description = "Opaque user identity key")),
    responses(
        (status = 200, description = "Reminder ledger rows", body = Vec<Reminder>),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "reminders"
)]
pub async fn list_reminders(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<Reminder>>, AppError> {
    let reminders = bounded(
        STORAGE,
        state.timeouts.store,
        state.stores.reminders.reminders_for_user(&user_id),
    )
    .await?;
    Ok(Json(reminders))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::routes::test_support::{json_body, send};
    use crate::state::testing::memory_state;

    #[tokio::test]
    async fn lists_reminders_after_a_run() {
        let state = memory_state(None);
        state
            .chat
            .handle_turn("u1", "2025-05-01 14:00 Standup", Utc::now())
            .await
            .unwrap();
        state
            .scheduler
            .run_once(Utc.with_ymd_and_hms(2025, 5, 1, 13, 30, 0).unwrap())
            .await;
        let app = router().with_state(state);

        let response = send(
            &app,
            Request::get("/v1/reminders")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert!(body[0]["event_id"].as_str().unwrap().starts_with("fp_"));
    }
}
