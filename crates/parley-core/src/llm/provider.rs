//! CompletionProvider trait definition.
//!
//! This is the core abstraction that all completion backends implement.

use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError};

/// Trait for chat-completion backends (OpenAI-compatible HTTP APIs, test fakes).
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). A provider makes
/// exactly one upstream call per `complete`; retrying is the caller's concern.
///
/// Implementations live in parley-infra (e.g., `OpenAiCompatibleProvider`).
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
