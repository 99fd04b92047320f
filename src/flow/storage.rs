/// SQLite persistence for flow versions
///
/// Every bot owns a list of immutable flow versions and points at one active
/// version. Graph definitions are stored as JSON text.

use crate::flow::types::FlowGraph;
use crate::store::StoreDatabase;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct FlowStorage {
    pool: SqlitePool,
}

/// A bot's active flow as loaded from storage
#[derive(Debug, Clone)]
pub struct StoredFlow {
    pub bot_id: String,
    pub version_id: String,
    pub graph: FlowGraph,
}

/// Listing entry for a stored version
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowVersionMetadata {
    pub bot_id: String,
    pub version_id: String,
    pub created_at: String,
    pub active: bool,
}

impl FlowStorage {
    pub fn new(database: &StoreDatabase) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    /// Store a version, replacing the definition if the id already exists
    pub async fn save_version(&self, bot_id: &str, version_id: &str, graph: &FlowGraph) -> Result<()> {
        let definition_json = serde_json::to_string(graph)?;

        sqlx::query(
            r#"
            INSERT INTO flow_versions (bot_id, version_id, definition)
            VALUES (?, ?, ?)
            ON CONFLICT(bot_id, version_id) DO UPDATE SET
                definition = excluded.definition
            "#,
        )
        .bind(bot_id)
        .bind(version_id)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_version(&self, bot_id: &str, version_id: &str) -> Result<Option<FlowGraph>> {
        let row = sqlx::query("SELECT definition FROM flow_versions WHERE bot_id = ? AND version_id = ?")
            .bind(bot_id)
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    /// Point the bot at a version; the version must exist
    pub async fn set_active_version(&self, bot_id: &str, version_id: &str) -> Result<()> {
        if self.get_version(bot_id, version_id).await?.is_none() {
            return Err(anyhow::anyhow!(
                "Flow version not found: {}/{}",
                bot_id,
                version_id
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO chatbots (bot_id, active_version, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(bot_id) DO UPDATE SET
                active_version = excluded.active_version,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(bot_id)
        .bind(version_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Clear the bot's active version; returns whether one was set
    pub async fn clear_active_version(&self, bot_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE chatbots SET active_version = NULL, updated_at = CURRENT_TIMESTAMP WHERE bot_id = ? AND active_version IS NOT NULL",
        )
        .bind(bot_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_active_version(&self, bot_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT active_version FROM chatbots WHERE bot_id = ?")
            .bind(bot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("active_version")))
    }

    /// Load the active flow of every bot that has one
    pub async fn load_active_flows(&self) -> Result<Vec<StoredFlow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.bot_id, c.active_version, v.definition
            FROM chatbots c
            JOIN flow_versions v ON v.bot_id = c.bot_id AND v.version_id = c.active_version
            ORDER BY c.bot_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.get("definition");
            flows.push(StoredFlow {
                bot_id: row.get("bot_id"),
                version_id: row.get("active_version"),
                graph: serde_json::from_str(&definition_json)?,
            });
        }
        Ok(flows)
    }

    pub async fn list_versions(&self, bot_id: &str) -> Result<Vec<FlowVersionMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT v.bot_id, v.version_id, CAST(v.created_at AS TEXT) AS created_at,
                   (c.active_version = v.version_id) AS active
            FROM flow_versions v
            LEFT JOIN chatbots c ON c.bot_id = v.bot_id
            WHERE v.bot_id = ?
            ORDER BY v.created_at DESC, v.version_id DESC
            "#,
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| FlowVersionMetadata {
                bot_id: row.get("bot_id"),
                version_id: row.get("version_id"),
                created_at: row.get("created_at"),
                active: row.get::<Option<bool>, _>("active").unwrap_or(false),
            })
            .collect())
    }

    /// Delete a version that is not active
    pub async fn delete_version(&self, bot_id: &str, version_id: &str) -> Result<bool> {
        if self.get_active_version(bot_id).await?.as_deref() == Some(version_id) {
            return Err(anyhow::anyhow!(
                "Cannot delete active flow version {}/{}",
                bot_id,
                version_id
            ));
        }

        let result = sqlx::query("DELETE FROM flow_versions WHERE bot_id = ? AND version_id = ?")
            .bind(bot_id)
            .bind(version_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{Edge, Node, NodeType};

    fn graph(text: &str) -> FlowGraph {
        FlowGraph {
            nodes: vec![
                Node::new("t", NodeType::NewMessageTrigger),
                Node::new("s", NodeType::SendMessage).with("text", text),
            ],
            edges: vec![Edge::new("t", "s")],
        }
    }

    #[tokio::test]
    async fn versions_and_activation() {
        let database = StoreDatabase::in_memory().await.unwrap();
        let storage = FlowStorage::new(&database);

        storage.save_version("bot", "v1", &graph("one")).await.unwrap();
        storage.save_version("bot", "v2", &graph("two")).await.unwrap();
        assert!(storage.set_active_version("bot", "v9").await.is_err());

        storage.set_active_version("bot", "v2").await.unwrap();
        assert_eq!(storage.get_active_version("bot").await.unwrap().as_deref(), Some("v2"));

        let active = storage.load_active_flows().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version_id, "v2");
        assert_eq!(active[0].graph, graph("two"));

        let versions = storage.list_versions("bot").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|v| v.active).count(), 1);

        assert!(storage.delete_version("bot", "v2").await.is_err());
        assert!(storage.delete_version("bot", "v1").await.unwrap());

        assert!(storage.clear_active_version("bot").await.unwrap());
        assert!(storage.load_active_flows().await.unwrap().is_empty());
    }
}
