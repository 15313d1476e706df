//! Infrastructure layer for Parley.
//!
//! Implementations of the ports defined in `parley-core`: the SQLite and
//! in-memory conversation stores, the OpenAI-compatible completion provider,
//! the console transport, and the config loader.

pub mod config;
pub mod llm;
pub mod memory;
pub mod sqlite;
pub mod transport;
