//! Per-conversation processing.
//!
//! - `ConversationSession`: ordered mailbox and single-writer loop per conversation
//! - `SessionRegistry`: lazily creates and owns one session per conversation
//! - `Responder`: shared reply generation (history, completion, pacing, send, record)
//! - `PendingSet`: conversations to answer once the offline backlog is delivered

pub mod conversation;
pub mod pending;
pub mod registry;
pub mod responder;
