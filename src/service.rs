/// Service setup and initialization
///
/// Wires together all components: database, flow registry, node executor,
/// engine, dispatcher and the resumption scheduler.

use crate::{
    config::Config,
    flow::{registry::FlowRegistry, storage::FlowStorage},
    runtime::{
        clock::{Clock, SystemClock},
        dispatcher::FlowDispatcher,
        engine::FlowEngine,
        executor::NodeExecutor,
        scheduler::ResumptionScheduler,
    },
    store::{ConversationStore, SqliteConversationStore, SqliteSuspensionStore, StoreDatabase, SuspensionStore},
};
use anyhow::Result;
use std::sync::Arc;

/// Fully wired flow service
pub struct FlowService {
    pub database: StoreDatabase,
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<FlowEngine>,
    pub dispatcher: Arc<FlowDispatcher>,
    pub scheduler: Arc<ResumptionScheduler>,
}

/// Build every component from the configuration and load active flows
///
/// The scheduler is created but not started.
pub async fn create_service(config: &Config) -> Result<FlowService> {
    tracing::info!("📁 Opening database in: {}", config.database.data_dir);
    let database = StoreDatabase::open(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    wire(database, config).await
}

/// Same as `create_service` over an already opened database
pub async fn wire(database: StoreDatabase, config: &Config) -> Result<FlowService> {
    let policy = config.policy();
    tracing::info!("📋 Error policy: {:?}", policy);

    tracing::info!("📊 Initializing flow registry");
    let registry = Arc::new(FlowRegistry::new(FlowStorage::new(&database), policy));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load active flows from storage: {}", e))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let conversations: Arc<dyn ConversationStore> = Arc::new(SqliteConversationStore::new(&database));
    let suspensions: Arc<dyn SuspensionStore> = Arc::new(SqliteSuspensionStore::new(&database));

    tracing::info!("⚙️ Initializing node executor");
    let http = reqwest::Client::builder()
        .user_agent(concat!("convoflow/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let executor = NodeExecutor::new(Arc::clone(&conversations), clock)
        .with_http_client(http)
        .with_policy(policy)
        .with_default_timeout_ms(config.engine.http_timeout_ms);

    tracing::info!("🚀 Initializing flow engine");
    let engine = Arc::new(FlowEngine::new(Arc::new(executor)).with_max_steps(config.engine.max_steps));

    let dispatcher = Arc::new(
        FlowDispatcher::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            conversations,
            suspensions,
        )
        .with_batch_size(config.sweep.batch_size),
    );

    tracing::info!("⏰ Initializing resumption scheduler");
    let scheduler = Arc::new(
        ResumptionScheduler::new(Arc::clone(&dispatcher), &config.sweep.schedule)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize resumption scheduler: {}", e))?,
    );

    tracing::info!("✅ Flow service initialized ({} active bots)", registry.list_bot_ids().len());
    Ok(FlowService {
        database,
        registry,
        engine,
        dispatcher,
        scheduler,
    })
}

/// Run the service until Ctrl-C
pub async fn start_service(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flow service...");

    let service = create_service(&config).await?;
    service.scheduler.start().await?;

    tracing::info!("Flow service running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    service.scheduler.stop().await?;
    tracing::info!("👋 Flow service stopped");
    Ok(())
}
