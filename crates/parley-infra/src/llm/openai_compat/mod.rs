//! OpenAI-compatible chat completion provider.
//!
//! Posts to `{base_url}/chat/completions` with bearer authentication. Any
//! service that speaks the OpenAI chat completions dialect works by pointing
//! `base_url` at it.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use parley_core::llm::provider::CompletionProvider;
use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError, MessageRole, Turn};

/// Provider for OpenAI-compatible chat completion APIs.
///
/// # API Key Security
///
/// The key is a [`SecretString`], exposed only when building the
/// `Authorization` header. The type does not implement `Debug`.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        api_key: SecretString,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    stop: &'a [String],
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: MessageRole,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireReplyMessage,
}

#[derive(Debug, Deserialize)]
struct WireReplyMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

fn to_body(request: &CompletionRequest) -> ChatCompletionBody<'_> {
    ChatCompletionBody {
        model: &request.model,
        messages: request
            .turns
            .iter()
            .map(|t| WireMessage {
                role: t.role,
                content: &t.content,
            })
            .collect(),
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stop: &request.stop,
    }
}

/// Map a reply body to a response, keeping each choice's role.
fn from_reply(reply: ChatCompletionReply) -> CompletionResponse {
    let choices = reply
        .choices
        .into_iter()
        .map(|choice| Turn {
            role: choice_role(&choice.message.role),
            content: choice.message.content.unwrap_or_default(),
        })
        .collect();

    CompletionResponse {
        id: reply.id,
        model: reply.model,
        choices,
    }
}

/// Roles outside system/user/assistant (`tool`, `function`, ...) are never a
/// sendable reply, so they map to a non-assistant role instead of failing the
/// whole response.
fn choice_role(wire: &str) -> MessageRole {
    wire.parse().unwrap_or_else(|_| {
        warn!(role = wire, "unrecognized choice role, treating as non-assistant");
        MessageRole::User
    })
}

fn error_for_status(status: u16, body: String) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed,
        _ => LlmError::Api {
            status,
            message: body,
        },
    }
}

impl CompletionProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&to_body(request))
            .send()
            .await
            .map_err(|e| LlmError::Transport(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), body));
        }

        let reply: ChatCompletionReply = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;
        Ok(from_reply(reply))
    }
}
