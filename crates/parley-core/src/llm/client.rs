//! Completion client used by sessions to generate replies.
//!
//! CompletionClient turns an ordered list of turns into a `CompletionRequest`,
//! sends it through a `BoxCompletionProvider` under the retry policy, and
//! returns the top choice. OTel GenAI spans instrument every call.

use tracing::{Instrument, debug, info_span};

use parley_types::config::CompletionConfig;
use parley_types::llm::{CompletionRequest, LlmError, Turn};

use super::box_provider::BoxCompletionProvider;
use super::retry::RetryPolicy;

/// Request parameters fixed for the lifetime of the client.
#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl From<&CompletionConfig> for CompletionParams {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop: config.stop.clone(),
        }
    }
}

/// Completion call with retry and error classification.
pub struct CompletionClient {
    provider: BoxCompletionProvider,
    params: CompletionParams,
    retry: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: BoxCompletionProvider, params: CompletionParams, retry: RetryPolicy) -> Self {
        Self {
            provider,
            params,
            retry,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn build_request(&self, turns: Vec<Turn>) -> CompletionRequest {
        CompletionRequest {
            model: self.params.model.clone(),
            turns,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            stop: self.params.stop.clone(),
        }
    }

    /// Complete the conversation and return the top choice.
    ///
    /// A response without choices is a permanent failure. The returned turn
    /// keeps the role reported upstream; callers decide what to do with a
    /// non-assistant choice.
    pub async fn complete(&self, turns: Vec<Turn>) -> Result<Turn, LlmError> {
        let request = self.build_request(turns);

        let span = info_span!(
            "gen_ai.complete",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.request.temperature = ?request.temperature,
            gen_ai.request.turns = request.turns.len(),
        );

        let provider = &self.provider;
        let request = &request;
        self.retry
            .run(|attempt| async move {
                debug!(attempt, "sending completion request");
                let response = provider.complete(request).await?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .ok_or(LlmError::EmptyChoices)
            })
            .instrument(span)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
