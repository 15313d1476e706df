//! Configuration types for Parley.
//!
//! `BotConfig` represents the `config.toml` in the data directory. Every field
//! has a default so an empty (or missing) file yields a working setup.

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Default system preamble placed before every transcript.
pub const DEFAULT_PERSONA: &str = "The following is a conversation with an AI called Chatbot, \
the smartest of all beings. The assistant is helpful, creative, clever, and very friendly.";

/// Top-level configuration for the bot.
///
/// Loaded from `~/.parley/config.toml` (or `$PARLEY_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// SQLite URL. When unset the database lives at `{data_dir}/parley.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// System preamble sent as the first turn of every completion.
    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_persona() -> String {
    DEFAULT_PERSONA.to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            persona: default_persona(),
            completion: CompletionConfig::default(),
            retry: RetryConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

/// Completion service parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
    /// Per-attempt bound. The default lets every retry fit in one respond cycle.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_stop() -> Vec<String> {
    vec!["'''".to_string()]
}

fn default_request_timeout_secs() -> u64 {
    8
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            stop: default_stop(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl CompletionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry budget for completion calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Constant pause between attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Pacing and timeout settings for sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Floor between deciding to reply and dispatching the reply.
    #[serde(default = "default_min_reply_delay_ms")]
    pub min_reply_delay_ms: u64,
    /// Bound for single-message store operations.
    #[serde(default = "default_message_timeout_secs")]
    pub message_timeout_secs: u64,
    /// Bound for a whole respond cycle.
    #[serde(default = "default_respond_timeout_secs")]
    pub respond_timeout_secs: u64,
    /// Bound for rolling back a failed transaction.
    #[serde(default = "default_rollback_timeout_secs")]
    pub rollback_timeout_secs: u64,
}

fn default_min_reply_delay_ms() -> u64 {
    500
}

fn default_message_timeout_secs() -> u64 {
    5
}

fn default_respond_timeout_secs() -> u64 {
    30
}

fn default_rollback_timeout_secs() -> u64 {
    10
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_reply_delay_ms: default_min_reply_delay_ms(),
            message_timeout_secs: default_message_timeout_secs(),
            respond_timeout_secs: default_respond_timeout_secs(),
            rollback_timeout_secs: default_rollback_timeout_secs(),
        }
    }
}

impl TimingConfig {
    pub fn min_reply_delay(&self) -> Duration {
        Duration::from_millis(self.min_reply_delay_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout_secs)
    }

    pub fn respond_timeout(&self) -> Duration {
        Duration::from_secs(self.respond_timeout_secs)
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_secs(self.rollback_timeout_secs)
    }
}
