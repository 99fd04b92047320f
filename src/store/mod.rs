/// Persistence contracts for conversations and paused executions
///
/// The engine only talks to these traits. Two adapters ship with the crate:
/// an in-memory one for tests and embedded use, and a SQLite one built on sqlx.

pub mod database;
pub mod memory;
pub mod sqlite;

use crate::runtime::{
    clock::Clock,
    context::ExecutionContext,
    suspend::{SuspendRequest, SuspendSink},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub use database::StoreDatabase;
pub use memory::{MemoryConversationStore, MemorySuspensionStore};
pub use sqlite::{SqliteConversationStore, SqliteSuspensionStore};

/// Lifecycle status of a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Bot is in charge
    Active,
    /// A human agent took over; the bot stays quiet until reactivated
    HumanTakeover,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::HumanTakeover => "human_takeover",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ConversationStatus::Active),
            "human_takeover" => Some(ConversationStatus::HumanTakeover),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Incoming => "incoming",
            MessageDirection::Outgoing => "outgoing",
        }
    }
}

/// One message in a conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub direction: MessageDirection,
    /// Message kind, `text` unless the flow says otherwise
    #[serde(rename = "type")]
    pub message_type: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ConversationMessage {
    pub fn incoming(text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: MessageDirection::Incoming,
            message_type: "text".to_string(),
            text: text.to_string(),
            timestamp,
            meta: None,
        }
    }

    pub fn outgoing(message_type: &str, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            direction: MessageDirection::Outgoing,
            message_type: message_type.to_string(),
            text: text.to_string(),
            timestamp,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Snapshot of a stored conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub status: Option<ConversationStatus>,
    pub updated_at: Option<DateTime<Utc>>,
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: None,
            updated_at: None,
            messages: Vec::new(),
        }
    }
}

/// Conversation side effects available to node handlers
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append a message to the conversation log, creating the conversation if needed
    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()>;

    /// Update the last-activity marker
    async fn touch(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Change the conversation status and update the last-activity marker
    async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
        at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;
}

/// A paused traversal waiting for its resume time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionRecord {
    pub id: Uuid,
    pub bot_id: String,
    pub conversation_id: String,
    /// Flow version that was running when the traversal paused
    pub flow_version_id: String,
    /// Delay node the traversal paused at
    pub node_id: String,
    pub context: ExecutionContext,
    pub resume_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SuspensionRecord {
    pub fn from_request(
        bot_id: &str,
        conversation_id: &str,
        flow_version_id: &str,
        request: SuspendRequest,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id: bot_id.to_string(),
            conversation_id: conversation_id.to_string(),
            flow_version_id: flow_version_id.to_string(),
            node_id: request.node_id,
            context: request.context,
            resume_at: request.resume_at,
            created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.resume_at <= now
    }
}

/// Durable queue of paused traversals
#[async_trait]
pub trait SuspensionStore: Send + Sync {
    async fn save(&self, record: &SuspensionRecord) -> Result<()>;

    /// Records with `resume_at <= now`, earliest first, at most `limit`
    async fn load_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<SuspensionRecord>>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Drop every pending record of a conversation; returns how many were removed
    async fn cancel_conversation(&self, bot_id: &str, conversation_id: &str) -> Result<usize>;

    /// Pending records of a conversation, earliest first
    async fn pending_for(&self, bot_id: &str, conversation_id: &str) -> Result<Vec<SuspensionRecord>>;
}

/// Suspend sink that persists requests as suspension records
pub struct SuspensionWriter {
    store: Arc<dyn SuspensionStore>,
    clock: Arc<dyn Clock>,
    bot_id: String,
    conversation_id: String,
    flow_version_id: String,
}

impl SuspensionWriter {
    pub fn new(
        store: Arc<dyn SuspensionStore>,
        clock: Arc<dyn Clock>,
        bot_id: &str,
        conversation_id: &str,
        flow_version_id: &str,
    ) -> Self {
        Self {
            store,
            clock,
            bot_id: bot_id.to_string(),
            conversation_id: conversation_id.to_string(),
            flow_version_id: flow_version_id.to_string(),
        }
    }
}

#[async_trait]
impl SuspendSink for SuspensionWriter {
    async fn on_suspend(&self, request: SuspendRequest) -> Result<()> {
        let record = SuspensionRecord::from_request(
            &self.bot_id,
            &self.conversation_id,
            &self.flow_version_id,
            request,
            self.clock.now(),
        );
        tracing::debug!(
            "💾 Persisting suspension {} for {}/{} at node '{}' until {}",
            record.id,
            record.bot_id,
            record.conversation_id,
            record.node_id,
            record.resume_at.to_rfc3339()
        );
        self.store.save(&record).await
    }
}
