/// SQLite store adapters
///
/// Timestamps are stored as unix milliseconds so due-record queries compare
/// integers; context and message metadata are stored as JSON text.

use crate::store::{
    database::StoreDatabase, Conversation, ConversationMessage, ConversationStatus,
    ConversationStore, MessageDirection, SuspensionRecord, SuspensionStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, sqlite::SqliteRow, Row};
use uuid::Uuid;

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("Invalid stored timestamp: {}", ms))
}

#[derive(Debug, Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(database: &StoreDatabase) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    async fn ensure_conversation(&self, conversation_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO conversations (id) VALUES (?) ON CONFLICT(id) DO NOTHING")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()> {
        self.ensure_conversation(conversation_id).await?;
        let meta = message.meta.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO messages (conversation_id, direction, type, text, timestamp, meta)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(message.direction.as_str())
        .bind(&message.message_type)
        .bind(&message.text)
        .bind(message.timestamp.timestamp_millis())
        .bind(meta)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, updated_at) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, status, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(status.as_str())
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let Some(row) = sqlx::query("SELECT id, status, updated_at FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let status: Option<String> = row.get("status");
        let updated_at: Option<i64> = row.get("updated_at");

        let rows = sqlx::query(
            r#"
            SELECT direction, type, text, timestamp, meta FROM messages
            WHERE conversation_id = ? ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let direction: String = row.get("direction");
            let meta: Option<String> = row.get("meta");
            messages.push(ConversationMessage {
                direction: match direction.as_str() {
                    "incoming" => MessageDirection::Incoming,
                    _ => MessageDirection::Outgoing,
                },
                message_type: row.get("type"),
                text: row.get("text"),
                timestamp: from_millis(row.get("timestamp"))?,
                meta: meta
                    .as_deref()
                    .map(serde_json::from_str::<serde_json::Value>)
                    .transpose()?,
            });
        }

        Ok(Some(Conversation {
            id: row.get("id"),
            status: status.as_deref().and_then(ConversationStatus::parse),
            updated_at: updated_at.map(from_millis).transpose()?,
            messages,
        }))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSuspensionStore {
    pool: SqlitePool,
}

impl SqliteSuspensionStore {
    pub fn new(database: &StoreDatabase) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    fn record_from_row(row: &SqliteRow) -> Result<SuspensionRecord> {
        let id: String = row.try_get("id")?;
        let context: String = row.try_get("context")?;
        Ok(SuspensionRecord {
            id: Uuid::parse_str(&id)?,
            bot_id: row.try_get("bot_id")?,
            conversation_id: row.try_get("conversation_id")?,
            flow_version_id: row.try_get("flow_version_id")?,
            node_id: row.try_get("node_id")?,
            context: serde_json::from_str(&context)?,
            resume_at: from_millis(row.try_get("resume_at")?)?,
            created_at: from_millis(row.try_get("created_at")?)?,
        })
    }

    /// Decode rows one by one; undecodable rows are logged and returned by raw id
    fn decode_rows(rows: &[SqliteRow]) -> (Vec<SuspensionRecord>, Vec<String>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut broken = Vec::new();
        for row in rows {
            match Self::record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    tracing::warn!("⚠️ Skipping undecodable paused flow '{}': {}", id, e);
                    broken.push(id);
                }
            }
        }
        (records, broken)
    }
}

#[async_trait]
impl SuspensionStore for SqliteSuspensionStore {
    async fn save(&self, record: &SuspensionRecord) -> Result<()> {
        let context_json = serde_json::to_string(&record.context)?;

        sqlx::query(
            r#"
            INSERT INTO paused_flows
                (id, bot_id, conversation_id, flow_version_id, node_id, context, resume_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                node_id = excluded.node_id,
                context = excluded.context,
                resume_at = excluded.resume_at
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.bot_id)
        .bind(&record.conversation_id)
        .bind(&record.flow_version_id)
        .bind(&record.node_id)
        .bind(&context_json)
        .bind(record.resume_at.timestamp_millis())
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SuspensionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM paused_flows
            WHERE resume_at <= ?
            ORDER BY resume_at ASC, created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let (records, broken) = Self::decode_rows(&rows);
        // Broken rows would otherwise hold their batch slot on every sweep
        for id in broken {
            sqlx::query("DELETE FROM paused_flows WHERE id = ?")
                .bind(&id)
                .execute(&self.pool)
                .await?;
        }
        Ok(records)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM paused_flows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_conversation(&self, bot_id: &str, conversation_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM paused_flows WHERE bot_id = ? AND conversation_id = ?")
            .bind(bot_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn pending_for(&self, bot_id: &str, conversation_id: &str) -> Result<Vec<SuspensionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM paused_flows
            WHERE bot_id = ? AND conversation_id = ?
            ORDER BY resume_at ASC, created_at ASC
            "#,
        )
        .bind(bot_id)
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::decode_rows(&rows).0)
    }
}
