/// SQLite database bootstrap
///
/// Opens the connection pool shared by the SQLite adapters and creates the
/// schema for flow versions, conversations and paused flows. Safe to run on
/// every start (all statements use IF NOT EXISTS).

use crate::config::DatabaseConfig;
use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct StoreDatabase {
    pool: SqlitePool,
}

impl StoreDatabase {
    /// Open (creating if missing) the database file described by the config
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create data directory '{}': {}", config.data_dir, e)
        })?;
        let db_path = Path::new(&config.data_dir).join(&config.file_name);

        tracing::info!("🗄️ Opening flow database: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single pooled connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and make sure the schema exists
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let database = Self { pool };
        database.init_schema().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS chatbots (
                bot_id TEXT PRIMARY KEY,
                active_version TEXT,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS flow_versions (
                bot_id TEXT NOT NULL,
                version_id TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (bot_id, version_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                status TEXT,
                updated_at INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                type TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                meta JSON
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS paused_flows (
                id TEXT PRIMARY KEY,
                bot_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                flow_version_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                context JSON NOT NULL,
                resume_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
            "CREATE INDEX IF NOT EXISTS idx_paused_flows_resume_at ON paused_flows(resume_at)",
            "CREATE INDEX IF NOT EXISTS idx_paused_flows_conversation ON paused_flows(bot_id, conversation_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::debug!("✅ Flow database schema ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    #[tokio::test]
    async fn in_memory_database_has_schema() {
        let database = StoreDatabase::in_memory().await.unwrap();
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .fetch_all(database.pool())
            .await
            .unwrap();
        let tables: Vec<String> = rows.iter().map(|row| row.get("name")).collect();
        for table in ["chatbots", "conversations", "flow_versions", "messages", "paused_flows"] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }
}
