//! Completion service abstractions for Parley.
//!
//! - `CompletionProvider`: RPITIT trait for concrete provider implementations
//! - `BoxCompletionProvider`: object-safe wrapper for dynamic dispatch
//! - `RetryPolicy`: bounded constant-backoff retry with error classification
//! - `CompletionClient`: builds requests from turns and applies the retry policy

pub mod box_provider;
pub mod client;
pub mod provider;
pub mod retry;
