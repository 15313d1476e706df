//! Parley entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then dispatches
//! to the command handler. `serve` runs the bot until Ctrl+C or SIGTERM.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use parley_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};

use cli::{ChatCommand, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.otel, verbosity_filter(cli.verbose))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "parley", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.data_dir.clone(), cli.database_url.clone()).await?;

    let result = match cli.command {
        Commands::Serve { memory, allow } => {
            if memory {
                cli::serve::serve_in_memory(&state, &allow).await
            } else {
                cli::serve::serve(&state).await
            }
        }

        Commands::Chat { action } => match action {
            ChatCommand::Allow { conversation_id } => {
                cli::chat::allow_chat(&state, &conversation_id, cli.json).await
            }
            ChatCommand::List => cli::chat::list_chats(&state, cli.json).await,
        },

        Commands::History { conversation_id } => {
            cli::history::show_history(&state, &conversation_id, cli.json).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
