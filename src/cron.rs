//! Cron Driver (§2, §4.6 `POST /jobs/reaper`): a periodic trigger that
//! drives the reaper sweep on a schedule, plus the `CRON_SECRET`-gated
//! manual trigger exposed over HTTP. Grounded on
//! `kernel/scheduled_tasks.rs::start_scheduler`'s `tokio-cron-scheduler`
//! usage, generalized from the teacher's scrape/reset jobs to this
//! crate's single periodic task: the reaper sweep.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::reaper::Reaper;

/// Start the scheduled reaper sweep. Runs every 30 seconds by default,
/// matching §4.4's stated default cadence; the HTTP-triggered manual
/// sweep (`/jobs/reaper`) is independent of this scheduler and available
/// for operators who want an on-demand pass between ticks.
pub async fn start_scheduler(reaper: Arc<Reaper>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .context("failed to create cron scheduler")?;

    let sweep_reaper = reaper.clone();
    let sweep_job = Job::new_async("*/30 * * * * *", move |_uuid, _lock| {
        let reaper = sweep_reaper.clone();
        Box::pin(async move {
            match reaper.sweep().await {
                Ok(summary) if summary.found > 0 => tracing::info!(
                    found = summary.found,
                    retried = summary.retried,
                    dead_lettered = summary.dead_lettered,
                    "scheduled reaper sweep complete"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "scheduled reaper sweep failed"),
            }
        })
    })
    .context("failed to build reaper cron job")?;

    scheduler.add(sweep_job).await.context("failed to register reaper cron job")?;
    scheduler.start().await.context("failed to start cron scheduler")?;

    tracing::info!("cron scheduler started (reaper sweep every 30s)");
    Ok(scheduler)
}
