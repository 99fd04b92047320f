/// Background resumption scheduler
///
/// Runs the dispatcher's sweep on a cron schedule using tokio-cron-scheduler,
/// so delayed traversals continue once their resume time has passed.

use crate::runtime::dispatcher::{FlowDispatcher, SweepReport};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Every 15 seconds (cron with seconds field)
pub const DEFAULT_SWEEP_SCHEDULE: &str = "*/15 * * * * *";

pub struct ResumptionScheduler {
    scheduler: Arc<RwLock<JobScheduler>>,
    job_uuid: RwLock<Option<Uuid>>,
    dispatcher: Arc<FlowDispatcher>,
    schedule: String,
}

impl ResumptionScheduler {
    pub async fn new(dispatcher: Arc<FlowDispatcher>, schedule: &str) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid: RwLock::new(None),
            dispatcher,
            schedule: schedule.to_string(),
        })
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// Register the sweep job and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting resumption scheduler ({})", self.schedule);

        let mut job_uuid = self.job_uuid.write().await;
        if job_uuid.is_some() {
            tracing::warn!("⚠️ Resumption scheduler already started");
            return Ok(());
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let dispatcher = Arc::clone(&dispatcher);

            Box::pin(async move {
                tracing::debug!("🔔 Resumption sweep tick");
                if let Err(e) = dispatcher.sweep_due().await {
                    tracing::error!("❌ Resumption sweep failed: {}", e);
                }
            })
        })
        .map_err(|e| anyhow::anyhow!("Invalid sweep schedule '{}': {}", self.schedule, e))?;

        {
            let scheduler = self.scheduler.read().await;
            *job_uuid = Some(scheduler.add(job).await?);
            scheduler.start().await?;
        }

        tracing::info!("✅ Resumption scheduler started");
        Ok(())
    }

    /// Stop ticking; a sweep in progress finishes on its own
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping resumption scheduler");

        if let Some(uuid) = self.job_uuid.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&uuid).await {
                tracing::warn!("⚠️ Failed to remove sweep job {}: {}", uuid, e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Resumption scheduler stopped");
        Ok(())
    }

    /// Run one sweep immediately, outside the schedule
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.dispatcher.sweep_due().await
    }
}
