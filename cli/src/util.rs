use chrono::{DateTime, Utc};
use serde_json::json;

/// Identity and credentials attached to a request.
#[derive(Debug, Clone, Default)]
pub struct Caller<'a> {
    pub user_id: Option<&'a str>,
    pub admin_token: Option<&'a str>,
}

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string()));
    std::process::exit(4);
}

/// Exit with a usage error unless a user id was supplied.
pub fn require_user<'a>(caller: &Caller<'a>) -> &'a str {
    match caller.user_id {
        Some(user_id) if !user_id.trim().is_empty() => user_id,
        _ => exit_error(
            "A user id is required for this command",
            Some("Set --user-id or PARLEY_USER_ID"),
        ),
    }
}

/// Accepts RFC 3339 (`2025-05-01T13:30:00Z`) or `YYYY-MM-DD HH:MM` taken as UTC.
pub fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("Invalid instant '{raw}': expected RFC 3339 or 'YYYY-MM-DD HH:MM'"))
}

/// Exit code for an HTTP status: 0=2xx, 1=4xx, 2=everything else.
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

/// Execute an API request, print the JSON response, return a structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    caller: &Caller<'_>,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{}{path}", api_url.trim_end_matches('/'))) {
        Ok(mut u) => {
            if !query.is_empty() {
                let mut q = u.query_pairs_mut();
                for (k, v) in query {
                    q.append_pair(k, v);
                }
            }
            u
        }
        Err(e) => exit_error(&format!("Invalid URL: {api_url}{path}: {e}"), None),
    };

    let mut req = client().request(method, url);
    if let Some(user_id) = caller.user_id {
        req = req.header("x-user-id", user_id);
    }
    if let Some(token) = caller.admin_token {
        req = req.bearer_auth(token);
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check PARLEY_API_URL."
            });
            eprintln!("{err:#}");
            return 3;
        }
    };

    let exit_code = exit_code_for(resp.status().as_u16());
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    if exit_code == 0 {
        println!("{resp_body:#}");
    } else {
        eprintln!("{resp_body:#}");
    }
    exit_code
}
