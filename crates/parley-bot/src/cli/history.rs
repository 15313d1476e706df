//! `parley history`: print one conversation's stored transcript.

use anyhow::Result;
use console::style;

use parley_core::store::{ConversationStore, StoreTransaction, TxOptions};
use parley_types::conversation::ConversationId;

use crate::state::AppState;

pub async fn show_history(state: &AppState, conversation_id: &str, json: bool) -> Result<()> {
    let store = state.sqlite_store().await?;
    let conversation_id = ConversationId::from(conversation_id);

    let mut tx = store.begin(TxOptions::read_only()).await?;
    let messages = tx.messages_for_conversation(&conversation_id).await?;
    tx.commit().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!(
            "  {} No messages stored for '{}'",
            style("i").blue().bold(),
            style(&conversation_id).bold()
        );
        return Ok(());
    }

    println!();
    for message in &messages {
        let time = message.sent_at.format("%Y-%m-%d %H:%M:%S");
        println!(
            "  {} {} {}",
            style(time).dim(),
            style(format!("{}:", message.sender_id)).cyan().bold(),
            message.text
        );
    }
    println!();
    Ok(())
}
