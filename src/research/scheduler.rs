use super::ResearchSystem;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Cron expression (with seconds): 02:00 on the 1st of every month.
const MONTHLY_SCHEDULE: &str = "0 0 2 1 * *";

/// Human-readable description reported by the status endpoint.
pub const NEXT_SCHEDULED: &str = "1st of next month at 2 AM";

/// Fires the research pipeline on a monthly schedule. Manual triggers run
/// the same pipeline through `trigger_now`.
pub struct ResearchScheduler {
    scheduler: JobScheduler,
    research: Arc<ResearchSystem>,
}

impl ResearchScheduler {
    pub async fn new(research: Arc<ResearchSystem>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;

        Ok(Self {
            scheduler,
            research,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let research = self.research.clone();
        let job = Job::new_async(MONTHLY_SCHEDULE, move |_id, _lock| {
            let research = research.clone();
            Box::pin(async move {
                info!("monthly research triggered");
                match research.run_research().await {
                    Ok(()) => info!("monthly research completed"),
                    Err(e) => error!("monthly research failed: {e:#}"),
                }
            })
        })
        .context("Failed to build research job")?;

        self.scheduler
            .add(job)
            .await
            .context("Failed to add research job")?;
        self.scheduler
            .start()
            .await
            .context("Failed to start scheduler")?;

        info!("research scheduler started (runs 1st of each month at 2 AM)");
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut scheduler = self.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            error!("failed to stop research scheduler: {e}");
        } else {
            info!("research scheduler stopped");
        }
    }

    /// Run the research pipeline immediately, synchronously.
    pub async fn trigger_now(&self) -> Result<()> {
        info!("manual research trigger");
        self.research.run_research().await
    }
}
