use crate::util::{Caller, api_request, require_user};

pub async fn list(api_url: &str, caller: &Caller<'_>) -> i32 {
    require_user(caller);
    api_request(api_url, reqwest::Method::GET, "/v1/achievements", caller, None, &[]).await
}

pub async fn retry(api_url: &str, caller: &Caller<'_>) -> i32 {
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/admin/achievements/retry",
        caller,
        None,
        &[],
    )
    .await
}

/// Operator view: every award record of `user_id`, including pending and failed ones.
pub async fn for_user(api_url: &str, caller: &Caller<'_>, user_id: &str) -> i32 {
    let path = format!("/v1/admin/users/{}/achievements", encode_segment(user_id));
    api_request(api_url, reqwest::Method::GET, &path, caller, None, &[]).await
}

// User ids are opaque, so percent-encode everything outside the unreserved set.
fn encode_segment(raw: &str) -> String {
    raw.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
