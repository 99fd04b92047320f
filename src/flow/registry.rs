/// Hot-reload registry of active flows using ArcSwap
///
/// Holds each bot's active flow version in memory. Activation swaps the whole
/// map pointer, so traversals already running keep the graph they started
/// with while new ones see the update immediately.

use crate::flow::{
    schema::{validate_graph, GraphIssue},
    storage::{FlowStorage, StoredFlow},
    types::FlowGraph,
};
use crate::runtime::ErrorPolicy;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A bot's active flow, ready to run
#[derive(Debug, Clone)]
pub struct ActiveFlow {
    pub bot_id: String,
    pub version_id: String,
    /// Shared, immutable graph snapshot
    pub graph: Arc<FlowGraph>,
    /// Validation issues found at activation (always empty in strict mode)
    pub issues: Vec<GraphIssue>,
}

#[derive(Debug)]
pub struct FlowRegistry {
    /// Key: bot_id
    flows: ArcSwap<HashMap<String, ActiveFlow>>,
    storage: FlowStorage,
    policy: ErrorPolicy,
}

impl FlowRegistry {
    pub fn new(storage: FlowStorage, policy: ErrorPolicy) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
            policy,
        }
    }

    pub fn storage(&self) -> &FlowStorage {
        &self.storage
    }

    /// Load every bot's active version from storage
    ///
    /// In strict mode a flow with validation issues is skipped and logged
    /// instead of aborting startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_active_flows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());

        for flow in stored {
            let bot_id = flow.bot_id.clone();
            match self.compile(flow) {
                Ok(active) => {
                    compiled.insert(bot_id, active);
                }
                Err(e) => tracing::error!("❌ Skipping active flow of bot '{}': {}", bot_id, e),
            }
        }

        self.flows.store(Arc::new(compiled));
        tracing::info!("📊 Initialized flow registry with {} active flows", self.flows.load().len());
        Ok(())
    }

    /// Store a new version and make it the bot's active flow
    pub async fn publish(&self, bot_id: &str, version_id: &str, graph: FlowGraph) -> Result<ActiveFlow> {
        // Compile first so a strict rejection leaves storage untouched
        let active = self.compile(StoredFlow {
            bot_id: bot_id.to_string(),
            version_id: version_id.to_string(),
            graph,
        })?;

        self.storage.save_version(bot_id, version_id, &active.graph).await?;
        self.storage.set_active_version(bot_id, version_id).await?;
        self.install(active.clone());
        Ok(active)
    }

    /// Switch a bot to an already stored version
    pub async fn activate(&self, bot_id: &str, version_id: &str) -> Result<ActiveFlow> {
        let graph = self
            .storage
            .get_version(bot_id, version_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Flow version not found: {}/{}", bot_id, version_id))?;

        let active = self.compile(StoredFlow {
            bot_id: bot_id.to_string(),
            version_id: version_id.to_string(),
            graph,
        })?;

        self.storage.set_active_version(bot_id, version_id).await?;
        self.install(active.clone());
        Ok(active)
    }

    /// Stop running flows for a bot
    pub async fn deactivate(&self, bot_id: &str) -> Result<()> {
        self.storage.clear_active_version(bot_id).await?;

        let previous = self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(bot_id);
            next
        });
        if previous.contains_key(bot_id) {
            tracing::info!("🗑️ Deactivated flow of bot: {}", bot_id);
        }
        Ok(())
    }

    /// Lock-free lookup of a bot's active flow
    pub fn get_active(&self, bot_id: &str) -> Option<ActiveFlow> {
        self.flows.load().get(bot_id).cloned()
    }

    pub fn list_bot_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Insert or replace one bot's flow; concurrent installs never drop each other
    fn install(&self, active: ActiveFlow) {
        self.flows.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(active.bot_id.clone(), active.clone());
            next
        });
        tracing::info!(
            "🔥 Hot-reloaded flow of bot '{}' to version '{}'",
            active.bot_id,
            active.version_id
        );
    }

    fn compile(&self, flow: StoredFlow) -> Result<ActiveFlow> {
        let issues = validate_graph(&flow.graph);

        if !issues.is_empty() {
            if self.policy.is_strict() {
                let listed: Vec<String> = issues.iter().map(ToString::to_string).collect();
                return Err(anyhow::anyhow!(
                    "Flow {}/{} failed validation: {}",
                    flow.bot_id,
                    flow.version_id,
                    listed.join("; ")
                ));
            }
            for issue in &issues {
                tracing::warn!("⚠️ Flow {}/{}: {}", flow.bot_id, flow.version_id, issue);
            }
        }

        Ok(ActiveFlow {
            bot_id: flow.bot_id,
            version_id: flow.version_id,
            graph: Arc::new(flow.graph),
            issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{Edge, Node, NodeType};
    use crate::store::StoreDatabase;

    fn valid_graph() -> FlowGraph {
        FlowGraph {
            nodes: vec![
                Node::new("t", NodeType::NewMessageTrigger),
                Node::new("s", NodeType::SendMessage).with("text", "hi"),
            ],
            edges: vec![Edge::new("t", "s")],
        }
    }

    fn broken_graph() -> FlowGraph {
        FlowGraph {
            nodes: vec![Node::new("t", NodeType::NewMessageTrigger)],
            edges: vec![Edge::new("t", "ghost")],
        }
    }

    async fn registry(policy: ErrorPolicy) -> FlowRegistry {
        let database = StoreDatabase::in_memory().await.unwrap();
        FlowRegistry::new(FlowStorage::new(&database), policy)
    }

    #[tokio::test]
    async fn publish_and_activate_swap_versions() {
        let registry = registry(ErrorPolicy::Permissive).await;
        registry.publish("bot", "v1", valid_graph()).await.unwrap();
        registry.publish("bot", "v2", broken_graph()).await.unwrap();

        let active = registry.get_active("bot").unwrap();
        assert_eq!(active.version_id, "v2");
        assert_eq!(active.issues.len(), 1);

        registry.activate("bot", "v1").await.unwrap();
        assert_eq!(registry.get_active("bot").unwrap().version_id, "v1");

        registry.deactivate("bot").await.unwrap();
        assert!(registry.get_active("bot").is_none());
    }

    #[tokio::test]
    async fn strict_registry_rejects_invalid_graphs() {
        let registry = registry(ErrorPolicy::Strict).await;
        assert!(registry.publish("bot", "v1", broken_graph()).await.is_err());
        assert!(registry.get_active("bot").is_none());
        assert!(registry.storage().get_version("bot", "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parallel_installs_keep_every_bot() {
        let registry = registry(ErrorPolicy::Permissive).await;

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let registry = &registry;
                scope.spawn(move || {
                    for n in 0..25 {
                        registry.install(ActiveFlow {
                            bot_id: format!("bot-{}-{}", worker, n),
                            version_id: "v1".into(),
                            graph: Arc::new(valid_graph()),
                            issues: Vec::new(),
                        });
                    }
                });
            }
        });

        assert_eq!(registry.list_bot_ids().len(), 200);
    }

    #[tokio::test]
    async fn init_loads_active_versions() {
        let database = StoreDatabase::in_memory().await.unwrap();
        let storage = FlowStorage::new(&database);
        storage.save_version("a", "v1", &valid_graph()).await.unwrap();
        storage.set_active_version("a", "v1").await.unwrap();
        storage.save_version("b", "v1", &valid_graph()).await.unwrap();

        let registry = FlowRegistry::new(storage, ErrorPolicy::Permissive);
        registry.init_from_storage().await.unwrap();
        assert_eq!(registry.list_bot_ids(), vec!["a".to_string()]);
    }
}
