/// Event dispatcher
///
/// Entry point for everything that starts or continues a flow: inbound chat
/// messages, scheduled ticks and the periodic sweep of due suspensions. It
/// resolves the bot's active flow, seeds the context, serializes work per
/// conversation and persists suspensions through a `SuspensionWriter`.

use crate::{
    flow::{
        index::GraphIndex,
        registry::FlowRegistry,
        types::{FlowGraph, Node, NodeType},
    },
    runtime::{
        clock::Clock,
        context::{ExecutionContext, CHANNEL_ID_FIELD, CONTACT, META},
        engine::{FlowEngine, FlowEvent, FlowRun},
    },
    store::{
        ConversationMessage, ConversationStatus, ConversationStore, SuspensionRecord,
        SuspensionStore, SuspensionWriter,
    },
};
use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::OwnedMutexGuard;

/// Records resumed per sweep unless configured otherwise
pub const DEFAULT_SWEEP_BATCH: usize = 50;

/// Outcome counters of one resumption sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Traversals resumed and their records deleted
    pub resumed: usize,
    /// Resumptions or deletions that failed; their records stay for the next sweep
    pub failed: usize,
    /// Records dropped because the bot has no active flow
    pub discarded: usize,
    /// Another sweep was still running, nothing was done
    pub skipped: bool,
}

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Advisory per-conversation locks
///
/// Entries are created on demand and removed when the last holder or waiter
/// lets go, so idle conversations cost nothing.
#[derive(Debug, Default, Clone)]
pub struct ConversationLocks {
    locks: LockMap,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, bot_id: &str, conversation_id: &str) -> ConversationGuard {
        let key = format!("{}:{}", bot_id, conversation_id);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        ConversationGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of conversations currently locked or waited on
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while a traversal runs for a conversation
pub struct ConversationGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&self.key).map(Arc::strong_count) == Some(1) {
            locks.remove(&self.key);
        }
    }
}

pub struct FlowDispatcher {
    engine: Arc<FlowEngine>,
    registry: Arc<FlowRegistry>,
    conversations: Arc<dyn ConversationStore>,
    suspensions: Arc<dyn SuspensionStore>,
    clock: Arc<dyn Clock>,
    locks: ConversationLocks,
    sweep_gate: tokio::sync::Mutex<()>,
    batch_size: usize,
}

impl FlowDispatcher {
    pub fn new(
        engine: Arc<FlowEngine>,
        registry: Arc<FlowRegistry>,
        conversations: Arc<dyn ConversationStore>,
        suspensions: Arc<dyn SuspensionStore>,
    ) -> Self {
        let clock = Arc::clone(engine.executor().clock());
        Self {
            engine,
            registry,
            conversations,
            suspensions,
            clock,
            locks: ConversationLocks::new(),
            sweep_gate: tokio::sync::Mutex::new(()),
            batch_size: DEFAULT_SWEEP_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &ConversationLocks {
        &self.locks
    }

    /// Handle an inbound chat message
    ///
    /// The message is always logged. The flow runs only when the bot has an
    /// active flow, a human has not taken the conversation over, and a
    /// `trigger:newMessage` start node accepts the text (or the flow has none).
    pub async fn handle_incoming_message(
        &self,
        bot_id: &str,
        conversation_id: &str,
        text: &str,
        meta: Option<Value>,
    ) -> Result<Option<FlowRun>> {
        let now = self.clock.now();
        let taken_over = self.is_taken_over(conversation_id).await?;

        let mut context = ExecutionContext::for_conversation(conversation_id);
        let mut message = ConversationMessage::incoming(text, now);
        if let Some(meta) = meta {
            if let Value::Object(fields) = &meta {
                seed(&mut context, META, fields);
            }
            message = message.with_meta(meta);
        }
        self.conversations.append_message(conversation_id, message).await?;

        if taken_over {
            self.conversations.touch(conversation_id, now).await?;
            tracing::info!("🙋 Conversation {} is with a human, flow not started", conversation_id);
            return Ok(None);
        }
        self.conversations
            .set_status(conversation_id, ConversationStatus::Active, now)
            .await?;

        let Some(flow) = self.registry.get_active(bot_id) else {
            tracing::info!("📭 Bot '{}' has no active flow", bot_id);
            return Ok(None);
        };

        if !accepts_message(&flow.graph, text) {
            tracing::debug!("🔕 No trigger of bot '{}' matched the message", bot_id);
            return Ok(None);
        }

        self.run(bot_id, conversation_id, &flow.version_id, &flow.graph, &FlowEvent::new_message(text), context)
            .await
            .map(Some)
    }

    /// Run the bot's active flow for a scheduled trigger
    ///
    /// `contact` fields are copied into the context's `contact` namespace; the
    /// channel id stays the conversation id.
    pub async fn handle_scheduled_tick(
        &self,
        bot_id: &str,
        conversation_id: &str,
        contact: Map<String, Value>,
    ) -> Result<Option<FlowRun>> {
        if self.is_taken_over(conversation_id).await? {
            tracing::info!("🙋 Conversation {} is with a human, scheduled run skipped", conversation_id);
            return Ok(None);
        }
        let Some(flow) = self.registry.get_active(bot_id) else {
            tracing::info!("📭 Bot '{}' has no active flow", bot_id);
            return Ok(None);
        };

        let mut context = ExecutionContext::new();
        seed(&mut context, CONTACT, &contact);
        context.set_path(
            &format!("{}.{}", CONTACT, CHANNEL_ID_FIELD),
            Value::String(conversation_id.to_string()),
        );

        self.run(bot_id, conversation_id, &flow.version_id, &flow.graph, &FlowEvent::Scheduled, context)
            .await
            .map(Some)
    }

    /// Hand a conversation back to the bot after a human takeover
    pub async fn release_to_bot(&self, conversation_id: &str) -> Result<()> {
        self.conversations
            .set_status(conversation_id, ConversationStatus::Active, self.clock.now())
            .await
    }

    /// Drop pending resumptions of a conversation
    pub async fn cancel_pending(&self, bot_id: &str, conversation_id: &str) -> Result<usize> {
        let _guard = self.locks.acquire(bot_id, conversation_id).await;
        let cancelled = self.suspensions.cancel_conversation(bot_id, conversation_id).await?;
        tracing::info!("🛑 Cancelled {} pending resumptions of {}/{}", cancelled, bot_id, conversation_id);
        Ok(cancelled)
    }

    /// Resume every due suspension, up to the batch size
    ///
    /// A record is deleted only after its traversal completed or suspended
    /// again (the new suspension is saved first). Failed resumptions keep
    /// their record and are retried on the next sweep.
    pub async fn sweep_due(&self) -> Result<SweepReport> {
        let Ok(_gate) = self.sweep_gate.try_lock() else {
            tracing::debug!("⏳ Previous sweep still running, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let now = self.clock.now();
        let due = self.suspensions.load_due(now, self.batch_size).await?;
        let mut report = SweepReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        tracing::info!("⏰ Sweeping {} due suspension(s)", due.len());

        for queued in due {
            let _guard = self.locks.acquire(&queued.bot_id, &queued.conversation_id).await;

            // The record may have been cancelled or resumed while we waited for the lock
            let record = match self.reclaim(&queued).await {
                Ok(Some(record)) if record.is_due(now) => record,
                Ok(_) => {
                    tracing::debug!("⏭️ Suspension {} is no longer pending", queued.id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("❌ Re-reading suspension {} failed: {}", queued.id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let Some(flow) = self.registry.get_active(&record.bot_id) else {
                tracing::warn!(
                    "🗑️ Bot '{}' has no active flow, discarding suspension {}",
                    record.bot_id,
                    record.id
                );
                if self.remove(&record).await {
                    report.discarded += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            };

            if flow.version_id != record.flow_version_id {
                tracing::warn!(
                    "⚠️ Suspension {} was created on version '{}', resuming on active version '{}'",
                    record.id,
                    record.flow_version_id,
                    flow.version_id
                );
            }

            let sink = SuspensionWriter::new(
                Arc::clone(&self.suspensions),
                Arc::clone(&self.clock),
                &record.bot_id,
                &record.conversation_id,
                &flow.version_id,
            );

            match self
                .engine
                .resume(&flow.graph, &record.node_id, record.context.clone(), &sink)
                .await
            {
                Ok(_) => {
                    if self.remove(&record).await {
                        report.resumed += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Resuming suspension {} of {}/{} failed: {}",
                        record.id,
                        record.bot_id,
                        record.conversation_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "✅ Sweep done: {} resumed, {} failed, {} discarded",
            report.resumed,
            report.failed,
            report.discarded
        );
        Ok(report)
    }

    /// Current state of a queued record, `None` once it left the queue
    async fn reclaim(&self, queued: &SuspensionRecord) -> Result<Option<SuspensionRecord>> {
        let pending = self
            .suspensions
            .pending_for(&queued.bot_id, &queued.conversation_id)
            .await?;
        Ok(pending.into_iter().find(|r| r.id == queued.id))
    }

    /// Delete a handled record; failures are logged and leave it queued
    async fn remove(&self, record: &SuspensionRecord) -> bool {
        match self.suspensions.delete(record.id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("❌ Deleting suspension {} failed: {}", record.id, e);
                false
            }
        }
    }

    async fn run(
        &self,
        bot_id: &str,
        conversation_id: &str,
        version_id: &str,
        graph: &FlowGraph,
        event: &FlowEvent,
        context: ExecutionContext,
    ) -> Result<FlowRun> {
        let _guard = self.locks.acquire(bot_id, conversation_id).await;
        let sink = SuspensionWriter::new(
            Arc::clone(&self.suspensions),
            Arc::clone(&self.clock),
            bot_id,
            conversation_id,
            version_id,
        );

        self.engine
            .execute(graph, event, context, &sink)
            .await
            .map_err(|e| {
                tracing::error!("❌ Flow of bot '{}' failed for {}: {}", bot_id, conversation_id, e);
                anyhow::Error::new(e)
            })
    }

    async fn is_taken_over(&self, conversation_id: &str) -> Result<bool> {
        Ok(self
            .conversations
            .get_conversation(conversation_id)
            .await?
            .and_then(|c| c.status)
            == Some(ConversationStatus::HumanTakeover))
    }
}

fn seed(context: &mut ExecutionContext, namespace: &str, fields: &Map<String, Value>) {
    for (key, value) in fields {
        context.set_path(&format!("{}.{}", namespace, key), value.clone());
    }
}

/// Whether an inbound message should start the flow
///
/// True when any `trigger:newMessage` start node matches, or when the flow has
/// no such trigger at all.
pub fn accepts_message(graph: &FlowGraph, text: &str) -> bool {
    let index = GraphIndex::build(graph);
    let triggers: Vec<&Node> = index
        .start_nodes()
        .into_iter()
        .filter(|node| node.node_type == NodeType::NewMessageTrigger)
        .collect();

    triggers.is_empty() || triggers.iter().any(|trigger| trigger_matches(trigger, text))
}

/// Match a message against one `trigger:newMessage` node
///
/// `matchMode` is `any` (default), `keywords` (comma separated, case
/// insensitive substring) or `regex`. An invalid pattern never matches.
pub fn trigger_matches(trigger: &Node, text: &str) -> bool {
    match trigger.str_field("matchMode").map(str::trim) {
        Some("keywords") => {
            let haystack = text.to_lowercase();
            keywords(trigger.field("keywords"))
                .iter()
                .any(|keyword| haystack.contains(keyword))
        }
        Some("regex") => {
            let Some(pattern) = trigger.str_field("regex").filter(|p| !p.trim().is_empty()) else {
                return false;
            };
            match Regex::new(pattern) {
                Ok(regex) => regex.is_match(text),
                Err(e) => {
                    tracing::warn!("⚠️ Trigger '{}' has an invalid regex: {}", trigger.id, e);
                    false
                }
            }
        }
        _ => true,
    }
}

fn keywords(field: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match field {
        Some(Value::String(list)) => list.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|keyword| keyword.trim().to_lowercase())
        .filter(|keyword| !keyword.is_empty())
        .collect()
}
