use clap::Subcommand;
use serde_json::json;

use crate::util::{Caller, api_request, exit_error, parse_instant, require_user};

#[derive(Subcommand)]
pub enum ReminderCommands {
    /// List reminders already sent to the current user
    List,
    /// Run the reminder scheduler once (admin)
    Run {
        /// Evaluation instant (RFC 3339 or "YYYY-MM-DD HH:MM" UTC). Defaults to the server clock.
        #[arg(long)]
        now: Option<String>,
    },
}

pub async fn run(api_url: &str, caller: &Caller<'_>, command: ReminderCommands) -> i32 {
    match command {
        ReminderCommands::List => {
            require_user(caller);
            api_request(api_url, reqwest::Method::GET, "/v1/reminders", caller, None, &[]).await
        }
        ReminderCommands::Run { now } => {
            let body = match now.as_deref().map(parse_instant).transpose() {
                Ok(now) => run_body(now),
                Err(e) => exit_error(&e, Some("Example: --now 2025-05-01T13:30:00Z")),
            };
            api_request(
                api_url,
                reqwest::Method::POST,
                "/v1/admin/reminders/run",
                caller,
                Some(body),
                &[],
            )
            .await
        }
    }
}

fn run_body(now: Option<chrono::DateTime<chrono::Utc>>) -> serde_json::Value {
    match now {
        Some(now) => json!({ "now": now.to_rfc3339() }),
        None => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn run_body_carries_optional_instant() {
        assert_eq!(run_body(None), json!({}));
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 13, 30, 0).unwrap();
        assert_eq!(run_body(Some(now)), json!({ "now": "2025-05-01T13:30:00+00:00" }));
    }
}
