//! Application state shared by the CLI commands.
//!
//! Resolves the data directory, loads `config.toml`, and opens the SQLite
//! store on demand so commands that do not touch the database never create it.

use std::path::PathBuf;

use parley_infra::config::{load_bot_config, resolve_data_dir, resolve_database_url};
use parley_infra::sqlite::pool::DatabasePool;
use parley_infra::sqlite::store::SqliteConversationStore;
use parley_types::config::BotConfig;

pub struct AppState {
    pub data_dir: PathBuf,
    pub config: BotConfig,
    database_url: String,
}

impl AppState {
    /// Resolve paths and load configuration. CLI flags override the file.
    pub async fn init(data_dir: Option<PathBuf>, database_url: Option<String>) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir(data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut config = load_bot_config(&data_dir).await;
        if database_url.is_some() {
            config.database_url = database_url;
        }
        let database_url = resolve_database_url(&config, &data_dir);

        Ok(Self {
            data_dir,
            config,
            database_url,
        })
    }

    /// Open the SQLite conversation store, running migrations.
    pub async fn sqlite_store(&self) -> anyhow::Result<SqliteConversationStore> {
        let pool = DatabasePool::new(&self.database_url).await?;
        Ok(SqliteConversationStore::new(pool))
    }
}
