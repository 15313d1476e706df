//! Shared domain types for Parley.
//!
//! This crate contains the types exchanged between the orchestration core and
//! its adapters: conversations and stored messages, transport lifecycle events,
//! completion requests, configuration, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod event;
pub mod llm;
