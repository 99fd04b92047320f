//! Shared builders and a fully wired in-memory harness for integration tests.
use chrono::{DateTime, TimeZone, Utc};
use convoflow::{
    flow::{FlowRegistry, FlowStorage},
    runtime::{FixedClock, FlowDispatcher, FlowEngine, NodeExecutor},
    store::{MemoryConversationStore, MemorySuspensionStore, StoreDatabase},
    Edge, ErrorPolicy, FlowGraph, Node, NodeType,
};
use std::sync::Arc;

/// Fixed start time with whole-millisecond precision
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap()
}

/// Chain the nodes in order with unlabeled edges
#[allow(dead_code)]
pub fn linear(nodes: Vec<Node>) -> FlowGraph {
    let edges = nodes
        .windows(2)
        .map(|pair| Edge::new(pair[0].id.clone(), pair[1].id.clone()))
        .collect();
    FlowGraph { nodes, edges }
}

#[allow(dead_code)]
pub fn send(id: &str, text: &str) -> Node {
    Node::new(id, NodeType::SendMessage).with("text", text)
}

#[allow(dead_code)]
pub fn set_var(id: &str, name: &str, value: &str) -> Node {
    Node::new(id, NodeType::SetVariable).with("name", name).with("value", value)
}

#[allow(dead_code)]
pub fn delay_minutes(id: &str, amount: u64) -> Node {
    Node::new(id, NodeType::Delay).with("ms", amount).with("unit", "minutes")
}

#[allow(dead_code)]
pub fn message_trigger(id: &str) -> Node {
    Node::new(id, NodeType::NewMessageTrigger)
}

/// In-memory wiring of every component around a fixed clock
#[allow(dead_code)]
pub struct Harness {
    pub clock: Arc<FixedClock>,
    pub conversations: Arc<MemoryConversationStore>,
    pub suspensions: Arc<MemorySuspensionStore>,
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<FlowEngine>,
    pub dispatcher: FlowDispatcher,
}

#[allow(dead_code)]
impl Harness {
    pub async fn new(policy: ErrorPolicy) -> Self {
        let clock = Arc::new(FixedClock::new(t0()));
        let conversations = Arc::new(MemoryConversationStore::new());
        let suspensions = Arc::new(MemorySuspensionStore::new());

        let database = StoreDatabase::in_memory().await.expect("in-memory database");
        let registry = Arc::new(FlowRegistry::new(FlowStorage::new(&database), policy));

        let executor = NodeExecutor::new(conversations.clone(), clock.clone()).with_policy(policy);
        let engine = Arc::new(FlowEngine::new(Arc::new(executor)));
        let dispatcher = FlowDispatcher::new(
            engine.clone(),
            registry.clone(),
            conversations.clone(),
            suspensions.clone(),
        );

        Self {
            clock,
            conversations,
            suspensions,
            registry,
            engine,
            dispatcher,
        }
    }

    pub async fn publish(&self, bot_id: &str, version_id: &str, graph: FlowGraph) {
        self.registry
            .publish(bot_id, version_id, graph)
            .await
            .expect("publish flow");
    }

    /// Texts of the outgoing messages of a conversation, in order
    pub async fn sent(&self, conversation_id: &str) -> Vec<String> {
        use convoflow::store::{ConversationStore, MessageDirection};

        self.conversations
            .get_conversation(conversation_id)
            .await
            .unwrap()
            .map(|c| {
                c.messages
                    .into_iter()
                    .filter(|m| m.direction == MessageDirection::Outgoing)
                    .map(|m| m.text)
                    .collect()
            })
            .unwrap_or_default()
    }
}
