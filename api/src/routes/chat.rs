use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;

use parley_core::conversation::{ChatRequest, ChatResponse, Message};
use parley_core::error::ApiError;

use crate::adapters::{STORAGE, bounded};
use crate::error::AppError;
use crate::extract::{AppJson, UserId};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/messages", get(list_messages))
}

/// Run one chat turn
///
/// Stores the message, generates a reply, puts any events mentioned in the
/// reply on the user's calendar and evaluates achievements.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    params(("x-user-id" = String, Header, description = "Opaque user identity key")),
    responses(
        (status = 200, description = "Reply for this turn", body = ChatResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 502, description = "Text generation unavailable", body = ApiError),
        (status = 504, description = "Text generation timed out", body = ApiError)
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    AppJson(req): AppJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let turn = state.chat.handle_turn(&user_id, &req.content, Utc::now()).await?;
    Ok(Json(turn))
}

/// Query parameters for listing messages
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListMessagesParams {
    /// Maximum number of messages to return (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Recent conversation messages, oldest first
#[utoipa::path(
    get,
    path = "/v1/messages",
    params(
        ListMessagesParams,
        ("x-user-id" = String, Header, description = "Opaque user identity key")
    ),
    responses(
        (status = 200, description = "Most recent messages in chronological order", body = Vec<Message>),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "chat"
)]
pub async fn list_messages(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<Vec<Message>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let messages = bounded(
        STORAGE,
        state.timeouts.store,
        state.stores.conversations.recent_messages(&user_id, limit),
    )
    .await?;
    Ok(Json(messages))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};

    use super::*;
    use crate::routes::test_support::{json_body, send};
    use crate::state::testing::memory_state;

    fn chat_request(user: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::post("/v1/chat").header(header::CONTENT_TYPE, "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn chat_turn_returns_reply_events_and_awards() {
        let app = router().with_state(memory_state(None));

        let response = send(
            &app,
            chat_request(Some("u1"), r#"{"content":"2025-05-01 14:00 Standup"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["reply"], "Noted: 2025-05-01 14:00 Standup");
        assert_eq!(body["events"][0]["title"], "Standup");
        assert_eq!(body["achievements"], serde_json::json!(["first_event"]));

        let response = send(
            &app,
            Request::get("/v1/messages?limit=1")
                .header("x-user-id", "u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let messages = json_body(response).await;
        assert_eq!(messages.as_array().unwrap().len(), 1);
        assert_eq!(messages[0]["role"], "assistant");
    }

    #[tokio::test]
    async fn missing_user_header_is_a_validation_error() {
        let app = router().with_state(memory_state(None));
        let response = send(&app, chat_request(None, r#"{"content":"hi"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "validation_failed");
        assert_eq!(body["field"], "headers.x-user-id");
    }

    #[tokio::test]
    async fn malformed_body_names_the_missing_field() {
        let app = router().with_state(memory_state(None));
        let response = send(&app, chat_request(Some("u1"), r#"{"text":"hi"}"#)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["field"], "content");
    }
}
