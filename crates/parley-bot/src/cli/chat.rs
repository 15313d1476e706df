//! Chat allowlist commands: allow, list.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_types::conversation::ConversationId;

use crate::state::AppState;

/// Allow the bot to talk in a conversation. Allowing twice is harmless.
pub async fn allow_chat(state: &AppState, conversation_id: &str, json: bool) -> Result<()> {
    let store = state.sqlite_store().await?;
    let chat = store.allow_chat(&ConversationId::from(conversation_id)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chat)?);
    } else {
        println!(
            "  {} Chat '{}' allowed",
            style("✓").green().bold(),
            style(&chat.id).bold()
        );
    }
    Ok(())
}

pub async fn list_chats(state: &AppState, json: bool) -> Result<()> {
    let store = state.sqlite_store().await?;
    let chats = store.list_chats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&chats)?);
        return Ok(());
    }

    if chats.is_empty() {
        println!();
        println!(
            "  {} No chats allowed. Add one with: {}",
            style("i").blue().bold(),
            style("parley chat allow <conversation>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Conversation").fg(Color::White),
        Cell::new("Allowed").fg(Color::White),
    ]);
    for chat in &chats {
        table.add_row(vec![
            Cell::new(&chat.id).fg(Color::Cyan),
            Cell::new(chat.created_at.format("%Y-%m-%d %H:%M").to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} chat{}",
        style(chats.len()).bold(),
        if chats.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}
