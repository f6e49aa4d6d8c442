use serde_json::json;

use crate::util::{Caller, api_request, exit_error, require_user};

/// Largest page the server returns for `/v1/messages`.
const MAX_MESSAGES: u32 = 200;

pub async fn send(api_url: &str, caller: &Caller<'_>, content: &str) -> i32 {
    require_user(caller);
    if content.trim().is_empty() {
        exit_error("Message content must not be empty", None);
    }
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/chat",
        caller,
        Some(json!({ "content": content })),
        &[],
    )
    .await
}

pub async fn messages(api_url: &str, caller: &Caller<'_>, limit: Option<u32>) -> i32 {
    require_user(caller);
    let query = messages_query(limit);
    api_request(api_url, reqwest::Method::GET, "/v1/messages", caller, None, &query).await
}

fn messages_query(limit: Option<u32>) -> Vec<(String, String)> {
    limit
        .map(|l| vec![("limit".to_string(), l.clamp(1, MAX_MESSAGES).to_string())])
        .unwrap_or_default()
}
