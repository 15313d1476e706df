//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod chat;
pub mod history;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Conversational bot that answers every allowed chat with a completion model.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory holding config.toml and the default database.
    #[arg(long, env = "PARLEY_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Database URL, overriding `database_url` in config.toml.
    #[arg(long, env = "PARLEY_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot on the console transport until Ctrl+C.
    Serve {
        /// Keep conversations in memory instead of the database.
        #[arg(long)]
        memory: bool,

        /// Conversation to allow (in-memory mode only; repeatable).
        #[arg(long, requires = "memory")]
        allow: Vec<String>,
    },

    /// Manage the chat allowlist.
    Chat {
        #[command(subcommand)]
        action: ChatCommand,
    },

    /// Print the stored transcript of a conversation.
    History {
        /// Conversation ID.
        conversation_id: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ChatCommand {
    /// Allow the bot to talk in a conversation.
    Allow {
        /// Conversation ID.
        conversation_id: String,
    },

    /// List allowed conversations.
    #[command(alias = "ls")]
    List,
}
