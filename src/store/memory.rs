/// In-memory store adapters
///
/// Backed by `tokio::sync::RwLock` maps. Useful for tests and for embedding
/// the engine where durability is handled elsewhere.

use crate::store::{
    Conversation, ConversationMessage, ConversationStatus, ConversationStore, SuspensionRecord,
    SuspensionStore,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id))
            .messages
            .push(message);
        Ok(())
    }

    async fn touch(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id))
            .updated_at = Some(at);
        Ok(())
    }

    async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation::new(conversation_id));
        conversation.status = Some(status);
        conversation.updated_at = Some(at);
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemorySuspensionStore {
    records: RwLock<HashMap<Uuid, SuspensionRecord>>,
}

impl MemorySuspensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn earliest_first(records: &mut [SuspensionRecord]) {
    records.sort_by(|a, b| {
        a.resume_at
            .cmp(&b.resume_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl SuspensionStore for MemorySuspensionStore {
    async fn save(&self, record: &SuspensionRecord) -> Result<()> {
        self.records.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn load_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SuspensionRecord>> {
        let mut due: Vec<SuspensionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.is_due(now))
            .cloned()
            .collect();
        earliest_first(&mut due);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn cancel_conversation(&self, bot_id: &str, conversation_id: &str) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.bot_id == bot_id && r.conversation_id == conversation_id));
        Ok(before - records.len())
    }

    async fn pending_for(&self, bot_id: &str, conversation_id: &str) -> Result<Vec<SuspensionRecord>> {
        let mut pending: Vec<SuspensionRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.bot_id == bot_id && r.conversation_id == conversation_id)
            .cloned()
            .collect();
        earliest_first(&mut pending);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::ExecutionContext;
    use chrono::Duration;

    fn record(conversation: &str, resume_at: DateTime<Utc>) -> SuspensionRecord {
        SuspensionRecord {
            id: Uuid::new_v4(),
            bot_id: "bot".into(),
            conversation_id: conversation.into(),
            flow_version_id: "v1".into(),
            node_id: "wait".into(),
            context: ExecutionContext::for_conversation(conversation),
            resume_at,
            created_at: resume_at - Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn load_due_is_ordered_and_bounded() {
        let now = Utc::now();
        let store = MemorySuspensionStore::new();
        store.save(&record("a", now - Duration::seconds(10))).await.unwrap();
        store.save(&record("b", now - Duration::seconds(30))).await.unwrap();
        store.save(&record("c", now + Duration::seconds(30))).await.unwrap();

        let due = store.load_due(now, 10).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|r| r.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert_eq!(store.load_due(now, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_and_cancel() {
        let now = Utc::now();
        let store = MemorySuspensionStore::new();
        let first = record("a", now);
        store.save(&first).await.unwrap();
        store.save(&record("a", now)).await.unwrap();
        store.save(&record("b", now)).await.unwrap();

        assert!(store.delete(first.id).await.unwrap());
        assert!(!store.delete(first.id).await.unwrap());
        assert_eq!(store.cancel_conversation("bot", "a").await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn conversation_log_and_status() {
        let now = Utc::now();
        let store = MemoryConversationStore::new();
        store
            .append_message("55", ConversationMessage::incoming("hi", now))
            .await
            .unwrap();
        store
            .set_status("55", ConversationStatus::HumanTakeover, now)
            .await
            .unwrap();

        let conversation = store.get_conversation("55").await.unwrap().unwrap();
        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.status, Some(ConversationStatus::HumanTakeover));
        assert_eq!(conversation.updated_at, Some(now));
        assert!(store.get_conversation("other").await.unwrap().is_none());
    }
}
