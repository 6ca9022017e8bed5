//! The Queue Engine (§4.3): enqueue, claim, heartbeat, complete, suspend,
//! resume, and set-priority. Owns the status state machine and the
//! optimistic `version` counter.
//!
//! Generalized from `kernel/jobs/queue.rs`'s `PostgresJobQueue` and the
//! `FOR UPDATE SKIP LOCKED` CTE in `kernel/jobs/job.rs::claim_jobs`.

mod backoff;

pub use backoff::{backoff_base, backoff_with_jitter};

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::nonce::try_insert_nonce;
use crate::signer::{payload_hash, Signer, VerifyFailure};
use crate::types::{
    is_recognized_job_type, ClaimEnvelope, JobError, JobRecord, JobStatus, ResultEnvelope,
    ResultStatus, Ticket, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY, LEASE_SECS, PRIORITY_MAX,
    PRIORITY_MIN,
};

/// Result of `claim_next`: the claimed record, and whether this was an
/// idempotent re-claim of the caller's own in-flight job (I3).
pub struct ClaimOutcome {
    pub record: JobRecord,
    pub idempotent: bool,
}

/// Result of `suspend`/`resume`: the current record, and whether this
/// call actually changed anything (I1).
pub struct MutationOutcome {
    pub record: JobRecord,
    pub changed: bool,
}

impl JobRecord {
    pub fn to_claim_envelope(&self) -> ClaimEnvelope {
        ClaimEnvelope {
            ticket: self.ticket.clone(),
            payload: self.payload.clone(),
            version: self.version,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Clone)]
pub struct QueueEngine {
    pool: PgPool,
    signer: std::sync::Arc<Signer>,
}

impl From<VerifyFailure> for AppError {
    fn from(failure: VerifyFailure) -> Self {
        match failure {
            VerifyFailure::BadSig | VerifyFailure::BadPayloadHash => AppError::BadSignature,
            VerifyFailure::Expired => AppError::TicketExpired,
        }
    }
}

impl QueueEngine {
    pub fn new(pool: PgPool, signer: std::sync::Arc<Signer>) -> Self {
        Self { pool, signer }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// §4.3 `enqueue`. `ticket` must already carry its `signature`;
    /// `canonical_payload` is the exact string the producer hashed.
    pub async fn enqueue(
        &self,
        ticket: Ticket,
        canonical_payload: String,
        priority: Option<i16>,
        max_attempts: Option<i32>,
    ) -> Result<JobRecord, AppError> {
        if !is_recognized_job_type(&ticket.job_type) {
            return Err(AppError::UnknownJobType(ticket.job_type.clone()));
        }

        let priority = priority.unwrap_or(DEFAULT_PRIORITY);
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
            return Err(AppError::PriorityOutOfRange);
        }

        self.signer
            .verify_ticket(&ticket, Utc::now(), Some(&canonical_payload))?;

        if payload_hash(&canonical_payload) != ticket.payload_hash {
            return Err(AppError::BadSignature);
        }

        let mut tx = self.pool.begin().await?;

        if !try_insert_nonce(&mut tx, &ticket.nonce).await? {
            tx.rollback().await?;
            return Err(AppError::NonceReused);
        }

        let max_attempts = max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let ticket_json = serde_json::to_value(&ticket).map_err(|e| AppError::Internal(e.into()))?;

        let inserted = sqlx::query(
            "INSERT INTO job_queue
                (id, ticket, payload, status, priority, attempts, max_attempts, version,
                 created_at, updated_at)
             VALUES ($1, $2, $3, 'PENDING', $4, 0, $5, 1, now(), now())
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(ticket.job_id)
        .bind(&ticket_json)
        .bind(&canonical_payload)
        .bind(priority)
        .bind(max_attempts)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::DuplicateJobId(ticket.job_id));
        }

        let record = fetch_for_update(&mut tx, ticket.job_id)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("inserted row vanished")))?;

        tx.commit().await?;
        Ok(record)
    }

    /// §4.3 `claimNext`. Idempotent re-claim for `worker_id` is checked
    /// first; otherwise a single CAS transaction picks the highest
    /// priority claimable row, breaking ties by `createdAt` then `jobId`.
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<ClaimOutcome>, AppError> {
        if let Some(existing) = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM job_queue WHERE worker_id = $1 AND status = 'PROCESSING'
             ORDER BY claimed_at DESC LIMIT 1",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(Some(ClaimOutcome {
                record: existing,
                idempotent: true,
            }));
        }

        let lease_interval = format!("{LEASE_SECS} seconds");
        let claimed = sqlx::query_as::<_, JobRecord>(
            "WITH candidate AS (
                SELECT id FROM job_queue
                WHERE status IN ('PENDING', 'FAILED_RETRYABLE')
                  AND (claimable_at IS NULL OR claimable_at <= now())
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
             )
             UPDATE job_queue j
             SET status = 'PROCESSING',
                 worker_id = $1,
                 lease_until = now() + $2::interval,
                 claimed_at = now(),
                 heartbeat_at = now(),
                 attempts = j.attempts + 1,
                 version = j.version + 1,
                 updated_at = now()
             FROM candidate
             WHERE j.id = candidate.id
             RETURNING j.*",
        )
        .bind(worker_id)
        .bind(lease_interval)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.map(|record| ClaimOutcome {
            record,
            idempotent: false,
        }))
    }

    /// §4.3 `heartbeat`.
    pub async fn heartbeat(&self, job_id: Uuid, worker_id: &str) -> Result<JobRecord, AppError> {
        let mut tx = self.pool.begin().await?;
        let record = fetch_for_update(&mut tx, job_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if record.status != JobStatus::Processing {
            tx.rollback().await?;
            return Err(AppError::NotProcessing);
        }
        if record.worker_id.as_deref() != Some(worker_id) {
            tx.rollback().await?;
            return Err(AppError::NotOwner);
        }

        let lease_interval = format!("{LEASE_SECS} seconds");
        let updated = sqlx::query_as::<_, JobRecord>(
            "UPDATE job_queue
             SET lease_until = now() + $2::interval, heartbeat_at = now(),
                 version = version + 1, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .bind(lease_interval)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// §4.3 `complete`. Idempotent on re-post of a terminal job (I2).
    pub async fn complete(&self, envelope: ResultEnvelope) -> Result<JobRecord, AppError> {
        let stored = sqlx::query_as::<_, JobRecord>("SELECT * FROM job_queue WHERE id = $1")
            .bind(envelope.job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound)?;

        self.signer.verify_result(&envelope, &stored.ticket)?;

        let mut tx = self.pool.begin().await?;
        let record = fetch_for_update(&mut tx, envelope.job_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if record.status.is_terminal() {
            tx.commit().await?;
            return Ok(record);
        }

        if record.status != JobStatus::Processing {
            tx.rollback().await?;
            return Err(AppError::NotProcessing);
        }
        if record.worker_id.as_deref() != Some(envelope.worker_id.as_str()) {
            tx.rollback().await?;
            return Err(AppError::NotOwner);
        }

        let (next_status, last_error, claimable_at) = match envelope.status {
            ResultStatus::Success => (JobStatus::Completed, None, None),
            ResultStatus::Failure => {
                let error = envelope.error.clone().unwrap_or(JobError {
                    code: "UNKNOWN".to_string(),
                    message: "worker reported failure without detail".to_string(),
                    retryable: true,
                });

                if !error.retryable {
                    // Open Question (a): non-retryable failures go directly
                    // to FAILED_TERMINAL rather than through FAILED_RETRYABLE.
                    (JobStatus::FailedTerminal, Some(error), None)
                } else if record.attempts >= record.max_attempts {
                    (JobStatus::Dead, Some(error), None)
                } else {
                    let claimable_at = Utc::now()
                        + chrono::Duration::from_std(backoff_with_jitter(record.attempts))
                            .unwrap_or_default();
                    (JobStatus::FailedRetryable, Some(error), Some(claimable_at))
                }
            }
        };

        let last_error_json = last_error
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::Internal(e.into()))?;

        let updated = sqlx::query_as::<_, JobRecord>(
            "UPDATE job_queue
             SET status = $2, worker_id = NULL, lease_until = NULL, claimed_at = NULL,
                 heartbeat_at = NULL, last_error = $3, claimable_at = $4,
                 version = version + 1, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(envelope.job_id)
        .bind(next_status)
        .bind(last_error_json)
        .bind(claimable_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// §4.3 `suspend`. Legal only from `PENDING`/`FAILED_RETRYABLE`;
    /// idempotent when already `SUSPENDED` (I1).
    pub async fn suspend(
        &self,
        job_id: Uuid,
        actor_id: Uuid,
        reason: Option<String>,
        last_updated_at: Option<chrono::DateTime<Utc>>,
        device_id: Option<String>,
    ) -> Result<MutationOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let record = fetch_for_update(&mut tx, job_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if let Some(last) = last_updated_at {
            if last < record.updated_at {
                tx.rollback().await?;
                return Err(AppError::Stale(Box::new(record)));
            }
        }

        if record.status == JobStatus::Suspended {
            tx.commit().await?;
            return Ok(MutationOutcome {
                record,
                changed: false,
            });
        }

        if !matches!(record.status, JobStatus::Pending | JobStatus::FailedRetryable) {
            tx.rollback().await?;
            return Err(AppError::IllegalTransition);
        }

        let updated = sqlx::query_as::<_, JobRecord>(
            "UPDATE job_queue
             SET status = 'SUSPENDED', suspended_at = now(), suspended_by = $2,
                 suspend_reason = $3, last_updated_by_device = $4,
                 version = version + 1, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .bind(actor_id)
        .bind(reason)
        .bind(device_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MutationOutcome {
            record: updated,
            changed: true,
        })
    }

    /// §4.3 `resume`. Legal only from `SUSPENDED`; idempotent when already
    /// `PENDING`.
    pub async fn resume(
        &self,
        job_id: Uuid,
        _actor_id: Uuid,
        last_updated_at: Option<chrono::DateTime<Utc>>,
        device_id: Option<String>,
    ) -> Result<MutationOutcome, AppError> {
        let mut tx = self.pool.begin().await?;
        let record = fetch_for_update(&mut tx, job_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if let Some(last) = last_updated_at {
            if last < record.updated_at {
                tx.rollback().await?;
                return Err(AppError::Stale(Box::new(record)));
            }
        }

        if record.status == JobStatus::Pending {
            tx.commit().await?;
            return Ok(MutationOutcome {
                record,
                changed: false,
            });
        }

        if record.status != JobStatus::Suspended {
            tx.rollback().await?;
            return Err(AppError::IllegalTransition);
        }

        let updated = sqlx::query_as::<_, JobRecord>(
            "UPDATE job_queue
             SET status = 'PENDING', suspended_at = NULL, suspended_by = NULL,
                 suspend_reason = NULL, last_updated_by_device = $2,
                 version = version + 1, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .bind(device_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(MutationOutcome {
            record: updated,
            changed: true,
        })
    }

    /// §4.3 `setPriority`. Legal from any non-terminal state.
    pub async fn set_priority(&self, job_id: Uuid, value: i16) -> Result<JobRecord, AppError> {
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&value) {
            return Err(AppError::PriorityOutOfRange);
        }

        let mut tx = self.pool.begin().await?;
        let record = fetch_for_update(&mut tx, job_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if record.status.is_terminal() {
            tx.rollback().await?;
            return Err(AppError::IllegalTransition);
        }

        let updated = sqlx::query_as::<_, JobRecord>(
            "UPDATE job_queue SET priority = $2, version = version + 1, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(job_id)
        .bind(value)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }
}

async fn fetch_for_update(
    tx: &mut Transaction<'_, Postgres>,
    job_id: Uuid,
) -> Result<Option<JobRecord>, sqlx::Error> {
    sqlx::query_as::<_, JobRecord>("SELECT * FROM job_queue WHERE id = $1 FOR UPDATE")
        .bind(job_id)
        .fetch_optional(&mut **tx)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_envelope_carries_attempt_accounting() {
        let ticket = Ticket {
            job_id: Uuid::new_v4(),
            job_type: "scheduler.tick".to_string(),
            actor_id: Uuid::new_v4(),
            scope: vec![],
            policy_decision_id: "p-1".to_string(),
            requested_at: Utc::now(),
            expires_at: Utc::now(),
            payload_hash: "deadbeef".to_string(),
            nonce: "n-1".to_string(),
            trace_id: "t-1".to_string(),
            signature: "sig".to_string(),
        };
        let record = JobRecord {
            id: ticket.job_id,
            ticket: ticket.clone(),
            payload: "{}".to_string(),
            status: JobStatus::Processing,
            priority: DEFAULT_PRIORITY,
            attempts: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            version: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            worker_id: Some("w1".to_string()),
            lease_until: Some(Utc::now()),
            claimed_at: Some(Utc::now()),
            heartbeat_at: Some(Utc::now()),
            last_error: None,
            suspended_at: None,
            suspended_by: None,
            suspend_reason: None,
            last_updated_by_device: None,
            claimable_at: None,
        };

        let envelope = record.to_claim_envelope();
        assert_eq!(envelope.attempts, 1);
        assert_eq!(envelope.version, 2);
        assert_eq!(envelope.ticket.job_id, ticket.job_id);
    }
}
