//! Conversation orchestration logic and port trait definitions for Parley.
//!
//! This crate defines the "ports" (store, transport and completion traits) that
//! the infrastructure layer implements, plus the orchestration core built on
//! them: per-conversation sessions, the session registry and the connection
//! orchestrator. It depends only on `parley-types` -- never on `parley-infra`
//! or any database/IO crate.

pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
