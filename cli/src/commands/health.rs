use crate::util::{Caller, api_request};

pub async fn run(api_url: &str) -> i32 {
    api_request(
        api_url,
        reqwest::Method::GET,
        "/health",
        &Caller::default(),
        None,
        &[],
    )
    .await
}
