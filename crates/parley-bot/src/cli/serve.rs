//! `parley serve`: run the bot on the console transport.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;

use parley_core::llm::client::{CompletionClient, CompletionParams};
use parley_core::llm::retry::RetryPolicy;
use parley_core::orchestrator::ConnectionOrchestrator;
use parley_core::session::responder::{Responder, SessionSettings};
use parley_core::store::ConversationStore;
use parley_infra::llm::{API_KEY_ENV, api_key_from_env, create_provider};
use parley_infra::memory::MemoryConversationStore;
use parley_infra::transport::console::ConsoleTransport;
use parley_types::conversation::ConversationId;

use crate::state::AppState;

const SELF_ID: &str = "parley";

/// Serve with the SQLite store.
pub async fn serve(state: &AppState) -> Result<()> {
    let store = state.sqlite_store().await?;
    run(state, store).await
}

/// Serve with a process-local store, allowing the given conversations.
pub async fn serve_in_memory(state: &AppState, allow: &[String]) -> Result<()> {
    let store = MemoryConversationStore::new();
    for id in allow {
        store.allow_chat(&ConversationId::from(id.as_str())).await;
    }
    run(state, store).await
}

async fn run<S: ConversationStore>(state: &AppState, store: S) -> Result<()> {
    let config = &state.config;
    let provider = create_provider(&config.completion, api_key_from_env())
        .with_context(|| format!("set {API_KEY_ENV} to the completion API key"))?;

    let completion = CompletionClient::new(
        provider,
        CompletionParams::from(&config.completion),
        RetryPolicy::from(&config.retry),
    );
    let (transport, events) = ConsoleTransport::new(SELF_ID);
    let responder = Responder::new(
        Arc::new(store),
        Arc::new(transport),
        completion,
        config.persona.clone(),
        SessionSettings::from(&config.timing),
    );
    let orchestrator = ConnectionOrchestrator::new(Arc::new(responder));

    println!();
    println!(
        "  {} Parley is listening on the console ({})",
        style("⚡").bold(),
        style(&config.completion.model).cyan()
    );
    println!(
        "  {}",
        style("Type `<conversation>: <message>`. Press Ctrl+C to stop.").dim()
    );
    println!();

    orchestrator.run(events, crate::shutdown_signal()).await?;

    println!("\n  Stopped.");
    Ok(())
}
