//! The Reaper (§4.4): periodically sweeps `PROCESSING` rows whose lease
//! expired or whose heartbeat has gone stale, returning them to the pool
//! or promoting them to `DEAD`.
//!
//! Generalized from the lease-expiry branch already present in
//! `kernel/jobs/job.rs::claim_jobs`'s CTE, pulled out into its own
//! standalone sweep and periodic loop in the shape of
//! `kernel/jobs/worker.rs`'s poll loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::queue::backoff_with_jitter;
use crate::service::Service;
use crate::types::{JobError, JobStatus, ReaperSummary, STALE_HEARTBEAT_SECS};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_BATCH_SIZE: i64 = 100;

#[derive(Clone)]
pub struct Reaper {
    pool: PgPool,
    sweep_interval: Duration,
    batch_size: i64,
}

impl Reaper {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// One sweep pass (§4.4). Candidate rows are found outside any single
    /// long-held transaction, then each is re-checked and reaped inside
    /// its own transaction — the reaper never locks the whole table, and
    /// a heartbeat that races ahead of the reap simply makes the
    /// re-check a no-op.
    pub async fn sweep(&self) -> Result<ReaperSummary, sqlx::Error> {
        let now = Utc::now();
        let stale_before = now - chrono::Duration::seconds(STALE_HEARTBEAT_SECS);

        let candidates: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM job_queue
             WHERE status = 'PROCESSING'
               AND (lease_until < $1 OR heartbeat_at < $2)
             LIMIT $3",
        )
        .bind(now)
        .bind(stale_before)
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut retried = 0usize;
        let mut dead_lettered = 0usize;
        let mut reaped = Vec::new();

        for job_id in candidates {
            if let Some(outcome) = self.reap_one(job_id, stale_before).await? {
                reaped.push(job_id);
                match outcome {
                    JobStatus::Dead => dead_lettered += 1,
                    JobStatus::FailedRetryable => retried += 1,
                    _ => {}
                }
                tracing::info!(job_id = %job_id, outcome = ?outcome, "reaped job");
            }
        }

        Ok(ReaperSummary {
            found: reaped.len(),
            retried,
            dead_lettered,
            jobs: reaped,
        })
    }

    /// Re-checks the lease/heartbeat condition inside the transaction
    /// before reaping, resolving the heartbeat-vs-reaper race (§9): if a
    /// heartbeat arrived just before this transaction started, the
    /// condition no longer holds and this is a no-op (`Ok(None)`).
    async fn reap_one(
        &self,
        job_id: Uuid,
        stale_before: chrono::DateTime<Utc>,
    ) -> Result<Option<JobStatus>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(JobStatus, Option<chrono::DateTime<Utc>>, Option<chrono::DateTime<Utc>>, i32, i32)> =
            sqlx::query_as(
                "SELECT status, lease_until, heartbeat_at, attempts, max_attempts
                 FROM job_queue WHERE id = $1 FOR UPDATE",
            )
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((status, lease_until, heartbeat_at, attempts, max_attempts)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let now = Utc::now();
        let still_expired = status == JobStatus::Processing
            && (lease_until.map(|l| l < now).unwrap_or(false)
                || heartbeat_at.map(|h| h < stale_before).unwrap_or(false));

        if !still_expired {
            tx.rollback().await?;
            return Ok(None);
        }

        let next_status = if attempts >= max_attempts {
            JobStatus::Dead
        } else {
            JobStatus::FailedRetryable
        };

        let last_error = JobError {
            code: "LEASE_EXPIRED".to_string(),
            message: "worker lease expired or heartbeat went stale".to_string(),
            retryable: next_status == JobStatus::FailedRetryable,
        };
        let last_error_json =
            serde_json::to_value(&last_error).map_err(|e| sqlx::Error::Decode(e.into()))?;

        let claimable_at = if next_status == JobStatus::FailedRetryable {
            Some(now + chrono::Duration::from_std(backoff_with_jitter(attempts)).unwrap_or_default())
        } else {
            None
        };

        sqlx::query(
            "UPDATE job_queue
             SET status = $2, worker_id = NULL, lease_until = NULL, claimed_at = NULL,
                 heartbeat_at = NULL, last_error = $3, claimable_at = $4,
                 version = version + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(next_status)
        .bind(last_error_json)
        .bind(claimable_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(next_status))
    }
}

#[async_trait]
impl Service for Reaper {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(interval_secs = self.sweep_interval.as_secs(), "reaper starting");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.sweep_interval) => {}
            }

            match self.sweep().await {
                Ok(summary) if summary.found > 0 => {
                    tracing::info!(
                        found = summary.found,
                        retried = summary.retried,
                        dead_lettered = summary.dead_lettered,
                        "reaper pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "reaper sweep failed"),
            }
        }

        tracing::info!("reaper stopped");
        Ok(())
    }
}
