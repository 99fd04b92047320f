/// Node execution handlers
///
/// One handler per node type. Handlers read their config, resolve templates
/// against the execution context, perform side effects through the injected
/// conversation store or HTTP client, and return an outcome that tells the
/// runner which edge to follow or that the traversal is suspended.

use crate::{
    error::FlowError,
    flow::{
        schema::missing_required_field,
        types::{Node, NodeType, HANDLE_FALSE, HANDLE_OUT, HANDLE_TRUE},
    },
    runtime::{
        clock::Clock,
        condition::{evaluate_all, parse_conditions, BranchMode},
        context::{get_path, ExecutionContext, CONTACT, VARS},
        suspend::{SuspendKind, SuspendRequest, SuspendSink},
        template::{apply_vars_value, is_blank, js_string, parse_mappings, parse_pairs, to_number},
        ErrorPolicy,
    },
    store::{ConversationMessage, ConversationStatus, ConversationStore},
};
use chrono::{DateTime, Duration, Utc};
use reqwest::{header::CONTENT_TYPE, Method};
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

/// Request timeout used when a node does not set `timeoutMs`
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 15_000;

/// What the runner should do after a node ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Follow the edge attached to this handle
    Continue(String),
    /// The suspend sink accepted the request; stop this traversal
    Suspend { resume_at: DateTime<Utc> },
}

impl NodeOutcome {
    pub fn out() -> Self {
        NodeOutcome::Continue(HANDLE_OUT.to_string())
    }

    pub fn handle(&self) -> Option<&str> {
        match self {
            NodeOutcome::Continue(handle) => Some(handle),
            NodeOutcome::Suspend { .. } => None,
        }
    }
}

/// Dispatches nodes to their handlers
///
/// Holds the side-effect capabilities handlers need: the conversation store,
/// the clock and a shared HTTP client.
pub struct NodeExecutor {
    conversations: Arc<dyn ConversationStore>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    policy: ErrorPolicy,
    default_timeout_ms: u64,
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

impl NodeExecutor {
    pub fn new(conversations: Arc<dyn ConversationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            conversations,
            clock,
            http: reqwest::Client::new(),
            policy: ErrorPolicy::default(),
            default_timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run a single node against the context
    ///
    /// Unknown node types and nodes missing a required field pass through on
    /// `out` in permissive mode and fail in strict mode.
    pub async fn execute_node(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<NodeOutcome, FlowError> {
        tracing::debug!("🚀 Executing node: {} (type: {})", node.id, node.node_type);
        let start_time = std::time::Instant::now();

        if let NodeType::Unknown(type_name) = &node.node_type {
            if self.policy.is_strict() {
                return Err(FlowError::UnknownNodeType {
                    node_id: node.id.clone(),
                    type_name: type_name.clone(),
                });
            }
            tracing::warn!("⚠️ Unknown node type '{}' at '{}', passing through", type_name, node.id);
            return Ok(NodeOutcome::out());
        }

        if let Some(field) = missing_required_field(node) {
            if self.policy.is_strict() {
                return Err(FlowError::InvalidConfig {
                    node_id: node.id.clone(),
                    node_type: node.node_type.to_string(),
                    field: field.to_string(),
                });
            }
            tracing::warn!(
                "⚠️ Node '{}' ({}) is missing '{}', passing through",
                node.id,
                node.node_type,
                field
            );
            return Ok(NodeOutcome::out());
        }

        let result = match &node.node_type {
            // Trigger matching happens before the traversal starts
            NodeType::NewMessageTrigger | NodeType::ScheduledTrigger => Ok(NodeOutcome::out()),
            NodeType::SendMessage => self.execute_send_message(node, context).await,
            NodeType::ApiRequest => self.execute_api_request(node, context).await,
            NodeType::SetVariable => Ok(self.execute_set_variable(node, context)),
            NodeType::Branch => self.execute_branch(node, context),
            NodeType::Delay => self.execute_delay(node, context, sink).await,
            NodeType::HumanTakeover => self.execute_human_takeover(node, context).await,
            NodeType::Unknown(_) => Ok(NodeOutcome::out()),
        };

        let duration = start_time.elapsed();
        match &result {
            Ok(outcome) => tracing::debug!("✅ Node '{}' finished in {:?}: {:?}", node.id, duration, outcome),
            Err(e) => tracing::error!("❌ Node '{}' failed in {:?}: {}", node.id, duration, e),
        }
        result
    }

    async fn execute_send_message(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> Result<NodeOutcome, FlowError> {
        let Some(channel_id) = context.channel_id() else {
            tracing::debug!("📭 No channel id in context, skipping send at '{}'", node.id);
            return Ok(NodeOutcome::out());
        };

        let text = apply_vars_value(node.field("text"), context);
        let message_type = node
            .str_field("type")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("text");
        let now = self.clock.now();

        tracing::debug!("💬 Sending {} message to {}: {}", message_type, channel_id, text);
        self.conversations
            .append_message(&channel_id, ConversationMessage::outgoing(message_type, &text, now))
            .await
            .map_err(|e| FlowError::store(&node.id, e))?;
        self.conversations
            .touch(&channel_id, now)
            .await
            .map_err(|e| FlowError::store(&node.id, e))?;

        Ok(NodeOutcome::out())
    }

    async fn execute_api_request(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
    ) -> Result<NodeOutcome, FlowError> {
        let method_name = node
            .str_field("method")
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| FlowError::InvalidMethod {
            node_id: node.id.clone(),
            method: method_name.clone(),
        })?;

        let raw_url = apply_vars_value(node.field("url"), context);
        let mut url = Url::parse(raw_url.trim()).map_err(|source| FlowError::InvalidUrl {
            node_id: node.id.clone(),
            url: raw_url.clone(),
            source,
        })?;
        set_query_params(&mut url, parse_pairs(node.field("query"), context));

        let headers = parse_pairs(node.field("headers"), context);
        let timeout_ms = Some(to_number(node.field("timeoutMs")))
            .filter(|ms| ms.is_finite() && *ms >= 1.0)
            .map(|ms| ms as u64)
            .unwrap_or(self.default_timeout_ms);

        tracing::debug!("🌍 HTTP Request: {} {} (timeout {}ms)", method, url, timeout_ms);
        tracing::debug!("📋 Headers: {:?}", headers);

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .timeout(std::time::Duration::from_millis(timeout_ms));
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let sends_body = [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(&method);
        if sends_body && !is_blank(node.field("body")) {
            let body = apply_vars_value(node.field("body"), context);
            if !headers.iter().any(|(name, _)| name == "content-type") {
                request = request.header(CONTENT_TYPE, "application/json");
            }
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FlowError::http(&node.id, timeout_ms, e))?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!("⚠️ {} {} answered with status {}", method, url, status);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|content_type| content_type.contains("application/json"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| FlowError::http(&node.id, timeout_ms, e))?;
        let data = if is_json {
            serde_json::from_str(&text).map_err(|source| FlowError::InvalidResponse {
                node_id: node.id.clone(),
                source,
            })?
        } else {
            Value::String(text)
        };

        tracing::debug!("📥 Response {} from {}", status.as_u16(), url);

        let view = json!({ "data": data, "response": data, "status": status.as_u16() });
        for mapping in parse_mappings(node.field("mapResponse")) {
            let value = get_path(&view, &mapping.from).cloned().unwrap_or(Value::Null);
            tracing::debug!("🗺️ {} -> {} = {}", mapping.from, mapping.to, value);
            context.set_path(&mapping.to, value);
        }

        Ok(NodeOutcome::out())
    }

    fn execute_set_variable(&self, node: &Node, context: &mut ExecutionContext) -> NodeOutcome {
        let name = node.field("name").map(js_string).unwrap_or_default();
        let scope = match node.str_field("scope") {
            Some(CONTACT) => CONTACT,
            _ => VARS,
        };
        let value = apply_vars_value(node.field("value"), context);

        tracing::debug!("📝 {}.{} = {:?}", scope, name.trim(), value);
        context.set_path(&format!("{}.{}", scope, name.trim()), Value::String(value));
        NodeOutcome::out()
    }

    fn execute_branch(&self, node: &Node, context: &ExecutionContext) -> Result<NodeOutcome, FlowError> {
        let conditions = parse_conditions(node.field("conditions"));

        if let Some(unknown) = conditions.iter().find(|c| c.operator().is_none()) {
            if self.policy.is_strict() {
                return Err(FlowError::UnknownOperator {
                    node_id: node.id.clone(),
                    op: unknown.op.clone(),
                });
            }
            tracing::warn!("⚠️ Unknown operator '{}' at '{}' evaluates to false", unknown.op, node.id);
        }

        let mode = BranchMode::parse(node.str_field("mode"));
        let matched = evaluate_all(&conditions, mode, context);
        tracing::debug!("🔀 Branch '{}' ({:?}, {} conditions) -> {}", node.id, mode, conditions.len(), matched);

        let handle = if matched { HANDLE_TRUE } else { HANDLE_FALSE };
        Ok(NodeOutcome::Continue(handle.to_string()))
    }

    async fn execute_delay(
        &self,
        node: &Node,
        context: &ExecutionContext,
        sink: &dyn SuspendSink,
    ) -> Result<NodeOutcome, FlowError> {
        let amount = to_number(node.field("ms"));
        let unit = node.str_field("unit").unwrap_or("seconds");
        let delay_ms = amount * unit_millis(unit) as f64;
        let delay_ms = if delay_ms.is_finite() && delay_ms > 0.0 {
            delay_ms.min(i64::MAX as f64) as i64
        } else {
            0
        };

        let now = self.clock.now();
        let resume_at = now
            .checked_add_signed(Duration::milliseconds(delay_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        tracing::info!("⏸️ Delay '{}' suspends for {}ms until {}", node.id, delay_ms, resume_at.to_rfc3339());
        sink.on_suspend(SuspendRequest {
            kind: SuspendKind::Delay,
            node_id: node.id.clone(),
            resume_at,
            context: context.clone(),
        })
        .await
        .map_err(|e| FlowError::suspend(&node.id, e))?;

        Ok(NodeOutcome::Suspend { resume_at })
    }

    async fn execute_human_takeover(
        &self,
        node: &Node,
        context: &ExecutionContext,
    ) -> Result<NodeOutcome, FlowError> {
        let Some(channel_id) = context.channel_id() else {
            tracing::debug!("📭 No channel id in context, skipping takeover at '{}'", node.id);
            return Ok(NodeOutcome::out());
        };

        tracing::info!("🙋 Handing conversation {} over to a human", channel_id);
        self.conversations
            .set_status(&channel_id, ConversationStatus::HumanTakeover, self.clock.now())
            .await
            .map_err(|e| FlowError::store(&node.id, e))?;

        Ok(NodeOutcome::out())
    }
}

/// Milliseconds per delay unit; anything unrecognized counts as seconds
fn unit_millis(unit: &str) -> i64 {
    match unit.trim() {
        "minutes" => 60_000,
        "hours" => 3_600_000,
        "days" => 86_400_000,
        _ => 1_000,
    }
}

/// Set query parameters on a URL, replacing existing values for the same key
fn set_query_params(url: &mut Url, params: Vec<(String, String)>) {
    if params.is_empty() {
        return;
    }
    let mut merged: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for (key, value) in params {
        merged.retain(|(existing, _)| existing != &key);
        merged.push((key, value));
    }
    url.query_pairs_mut().clear().extend_pairs(merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{clock::FixedClock, suspend::CollectingSink};
    use crate::store::MemoryConversationStore;

    fn executor(policy: ErrorPolicy) -> (NodeExecutor, Arc<MemoryConversationStore>, DateTime<Utc>) {
        let now = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let store = Arc::new(MemoryConversationStore::new());
        let executor = NodeExecutor::new(store.clone(), Arc::new(FixedClock::new(now))).with_policy(policy);
        (executor, store, now)
    }

    #[tokio::test]
    async fn set_variable_writes_scope() {
        let (executor, _, _) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::for_conversation("55");
        context.set_path("vars.first", json!("Ana"));

        let node = Node::new("v", NodeType::SetVariable)
            .with("scope", "contact")
            .with("name", "greeting")
            .with("value", "Hi {{vars.first}}");
        executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert_eq!(context.get_path("contact.greeting"), Some(&json!("Hi Ana")));

        let node = Node::new("v2", NodeType::SetVariable).with("name", "count").with("value", 3);
        executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert_eq!(context.get_path("vars.count"), Some(&json!("3")));
    }

    #[tokio::test]
    async fn send_message_appends_outgoing() {
        let (executor, store, now) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::for_conversation("55");
        context.set_path("contact.name", json!("Ana"));

        let node = Node::new("s", NodeType::SendMessage).with("text", "Hello {{contact.name}}");
        let outcome = executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert_eq!(outcome, NodeOutcome::out());

        let conversation = store.get_conversation("55").await.unwrap().unwrap();
        assert_eq!(conversation.messages, vec![ConversationMessage::outgoing("text", "Hello Ana", now)]);
        assert_eq!(conversation.updated_at, Some(now));
    }

    #[tokio::test]
    async fn send_without_channel_is_noop() {
        let (executor, store, _) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::new();
        let node = Node::new("s", NodeType::SendMessage).with("text", "hi");
        executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert!(store.get_conversation("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delay_suspends_through_sink() {
        let (executor, _, now) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::for_conversation("55");

        let node = Node::new("d", NodeType::Delay).with("ms", 5).with("unit", "minutes");
        let outcome = executor.execute_node(&node, &mut context, &sink).await.unwrap();
        let expected = now + Duration::milliseconds(300_000);
        assert_eq!(outcome, NodeOutcome::Suspend { resume_at: expected });

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].resume_at, expected);
        assert_eq!(requests[0].node_id, "d");
        assert_eq!(requests[0].context, context);
    }

    #[tokio::test]
    async fn delay_defaults_to_seconds_and_clamps_negative() {
        let (executor, _, now) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::new();

        let node = Node::new("d", NodeType::Delay).with("ms", "2");
        let outcome = executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert_eq!(outcome, NodeOutcome::Suspend { resume_at: now + Duration::seconds(2) });

        let node = Node::new("d", NodeType::Delay).with("ms", -4);
        let outcome = executor.execute_node(&node, &mut context, &sink).await.unwrap();
        assert_eq!(outcome, NodeOutcome::Suspend { resume_at: now });
    }

    #[tokio::test]
    async fn human_takeover_sets_status() {
        let (executor, store, _) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::for_conversation("55");
        let node = Node::new("h", NodeType::HumanTakeover);
        executor.execute_node(&node, &mut context, &sink).await.unwrap();

        let conversation = store.get_conversation("55").await.unwrap().unwrap();
        assert_eq!(conversation.status, Some(ConversationStatus::HumanTakeover));
        assert!(conversation.messages.is_empty());
    }

    #[tokio::test]
    async fn permissive_policy_passes_invalid_nodes_through() {
        let (executor, _, _) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::new();

        let unknown = Node::new("x", NodeType::from("action:teleport"));
        assert_eq!(executor.execute_node(&unknown, &mut context, &sink).await.unwrap(), NodeOutcome::out());

        // Missing `ms` must not suspend
        let delay = Node::new("d", NodeType::Delay);
        assert_eq!(executor.execute_node(&delay, &mut context, &sink).await.unwrap(), NodeOutcome::out());
        assert!(sink.requests().is_empty());
    }

    #[tokio::test]
    async fn strict_policy_rejects_invalid_nodes() {
        let (executor, _, _) = executor(ErrorPolicy::Strict);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::new();

        let unknown = Node::new("x", NodeType::from("action:teleport"));
        assert!(matches!(
            executor.execute_node(&unknown, &mut context, &sink).await,
            Err(FlowError::UnknownNodeType { .. })
        ));

        let send = Node::new("s", NodeType::SendMessage);
        assert!(matches!(
            executor.execute_node(&send, &mut context, &sink).await,
            Err(FlowError::InvalidConfig { field, .. }) if field == "text"
        ));

        let branch = Node::new("b", NodeType::Branch).with("conditions", "vars.a LT 3");
        assert!(matches!(
            executor.execute_node(&branch, &mut context, &sink).await,
            Err(FlowError::UnknownOperator { op, .. }) if op == "LT"
        ));
    }

    #[tokio::test]
    async fn failing_sink_fails_the_delay() {
        struct BrokenSink;

        #[async_trait::async_trait]
        impl SuspendSink for BrokenSink {
            async fn on_suspend(&self, _request: SuspendRequest) -> anyhow::Result<()> {
                Err(anyhow::anyhow!("store offline"))
            }
        }

        let (executor, _, _) = executor(ErrorPolicy::Permissive);
        let mut context = ExecutionContext::new();
        let node = Node::new("d", NodeType::Delay).with("ms", 1);
        let err = executor.execute_node(&node, &mut context, &BrokenSink).await.unwrap_err();
        assert!(matches!(err, FlowError::Suspend { ref node_id, .. } if node_id == "d"));
    }

    #[tokio::test]
    async fn malformed_url_is_an_error() {
        let (executor, _, _) = executor(ErrorPolicy::Permissive);
        let sink = CollectingSink::new();
        let mut context = ExecutionContext::new();
        let node = Node::new("a", NodeType::ApiRequest).with("url", "not a url {{vars.x}}");
        let err = executor.execute_node(&node, &mut context, &sink).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidUrl { .. }));
    }

    #[test]
    fn query_params_replace_existing_keys() {
        let mut url = Url::parse("https://api.test/items?page=1&keep=yes").unwrap();
        set_query_params(
            &mut url,
            vec![("page".into(), "2".into()), ("q".into(), "a b".into())],
        );
        assert_eq!(url.as_str(), "https://api.test/items?keep=yes&page=2&q=a+b");
    }

    #[test]
    fn units_map_to_millis() {
        assert_eq!(unit_millis("minutes"), 60_000);
        assert_eq!(unit_millis("hours"), 3_600_000);
        assert_eq!(unit_millis("days"), 86_400_000);
        assert_eq!(unit_millis("fortnights"), 1_000);
    }
}
