use async_trait::async_trait;
use parley_core::conversation::{Message, Role};
use serde::{Deserialize, Serialize};

use super::GENERATION;
use crate::config::LlmConfig;
use crate::error::AppError;

/// Produces the assistant's reply for a prompt given the conversation so far.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// `context` is chronological and already contains the prompt as its last user message.
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, AppError>;
}

const SYSTEM_PROMPT: &str = "You are Parley, a concise personal assistant. \
When the user mentions an appointment, restate each one on its own line as \
`YYYY-MM-DD HH:MM Title` (optionally `YYYY-MM-DD HH:MM-HH:MM Title`) in the user's local time.";

/// Offline generator for development: acknowledges the prompt verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoGenerator;

#[async_trait]
impl TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str, _context: &[Message]) -> Result<String, AppError> {
        Ok(format!("Noted: {}", prompt.trim()))
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiChatGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionReply,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatGenerator {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body<'a>(&'a self, prompt: &'a str, context: &'a [Message]) -> ChatCompletionRequest<'a> {
        let mut messages = vec![ChatCompletionMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        }];
        messages.extend(context.iter().map(|m| ChatCompletionMessage {
            role: m.role.as_str(),
            content: m.content.as_str(),
        }));
        let prompt_included = context
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == prompt);
        if !prompt_included {
            messages.push(ChatCompletionMessage {
                role: Role::User.as_str(),
                content: prompt,
            });
        }
        ChatCompletionRequest {
            model: &self.config.model,
            messages,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChatGenerator {
    async fn generate(&self, prompt: &str, context: &[Message]) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&self.request_body(prompt, context))
            .send()
            .await
            .map_err(|e| AppError::unavailable(GENERATION, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::unavailable(
                GENERATION,
                format!("upstream returned HTTP {status}"),
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AppError::unavailable(GENERATION, e))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| AppError::unavailable(GENERATION, "response contained no reply text"))
    }
}
