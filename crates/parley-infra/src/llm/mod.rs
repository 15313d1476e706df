//! Completion provider implementations.
//!
//! [`create_provider`] builds the boxed provider the completion client uses
//! from the `[completion]` section of the bot config.

pub mod openai_compat;

use secrecy::SecretString;

use parley_core::llm::box_provider::BoxCompletionProvider;
use parley_types::config::CompletionConfig;
use parley_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;

/// Environment variable holding the completion API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Create a [`BoxCompletionProvider`] for the configured endpoint.
///
/// # Errors
///
/// `AuthenticationFailed` when no API key is available.
pub fn create_provider(
    config: &CompletionConfig,
    api_key: Option<SecretString>,
) -> Result<BoxCompletionProvider, LlmError> {
    let api_key = api_key.ok_or(LlmError::AuthenticationFailed)?;
    let provider =
        OpenAiCompatibleProvider::new(api_key, config.base_url.clone(), config.request_timeout())?;
    Ok(BoxCompletionProvider::new(provider))
}

/// Read the API key from [`API_KEY_ENV`]. Blank values count as missing.
pub fn api_key_from_env() -> Option<SecretString> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}
