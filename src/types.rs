//! Shared record shapes, the status enum, and the default constants that
//! govern lease duration, retry accounting, and priority bounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Default ceiling for an administrative priority value.
pub const PRIORITY_MAX: i16 = 100;
/// Default floor for an administrative priority value.
pub const PRIORITY_MIN: i16 = 0;
/// Priority assigned when a producer does not specify one.
pub const DEFAULT_PRIORITY: i16 = 50;
/// Number of dispatch attempts a job gets before it is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
/// How long a claim grants exclusive processing rights, in seconds.
pub const LEASE_SECS: i64 = 60;
/// How long a signed ticket remains valid for submission, in seconds.
pub const TICKET_TTL_SECS: i64 = 900;
/// Base of the exponential backoff applied between retries, in seconds.
pub const BACKOFF_BASE_SECS: f64 = 5.0;
/// Ceiling applied to the exponential backoff, in seconds.
pub const BACKOFF_CAP_SECS: f64 = 300.0;
/// A `PROCESSING` row is reap-eligible once its heartbeat is older than this,
/// independent of lease expiry.
pub const STALE_HEARTBEAT_SECS: i64 = 60;

/// `jobType` values recognized by this deployment. The set is closed:
/// adding one requires a code change on both the producer and the worker,
/// per the wire contract.
pub const RECOGNIZED_JOB_TYPES: &[&str] = &[
    "scheduler.tick",
    "notification.dispatch",
    "report.generate",
    "webhook.deliver",
];

pub fn is_recognized_job_type(job_type: &str) -> bool {
    RECOGNIZED_JOB_TYPES.contains(&job_type)
}

/// The lifecycle state of a job record. Stored as a Postgres enum so the
/// database itself rejects any value outside this closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    FailedRetryable,
    FailedTerminal,
    Suspended,
    Dead,
}

impl JobStatus {
    /// Once in one of these states, a record never transitions again (I4/P5).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::FailedTerminal | JobStatus::Dead
        )
    }

    /// Claimable per the glossary: `PENDING` or `FAILED_RETRYABLE`.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::FailedRetryable)
    }
}

/// Outcome reported by a worker in a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Structured error detail attached to a failed result or a reaped record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "jsonb")]
pub struct JobError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retryable: bool,
}

/// The immutable, signed intent to run one job (§3).
///
/// Canonicalized and hashed excluding `signature` when signing or verifying;
/// see `crate::signer`.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub job_id: Uuid,
    #[builder(setter(into))]
    pub job_type: String,
    pub actor_id: Uuid,
    #[serde(default)]
    #[builder(default)]
    pub scope: Vec<String>,
    #[builder(setter(into))]
    pub policy_decision_id: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[builder(setter(into))]
    pub payload_hash: String,
    #[builder(setter(into))]
    pub nonce: String,
    #[builder(setter(into))]
    pub trace_id: String,
    /// Filled in by `Signer::sign_ticket` after construction; empty until then.
    #[builder(default)]
    pub signature: String,
}

/// The pair returned to a worker on claim: the immutable ticket plus the
/// canonical payload it references, with the bookkeeping a worker needs to
/// report progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEnvelope {
    pub ticket: Ticket,
    pub payload: String,
    pub version: i64,
    pub attempts: i32,
    pub max_attempts: i32,
}

/// Signed acknowledgement posted back by a worker (§3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub job_id: Uuid,
    pub worker_id: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JobError>,
    pub completed_at: DateTime<Utc>,
    pub signature: String,
}

/// One row of the `job_queue` table: the mutable record tracked per `jobId`.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    #[sqlx(json)]
    pub ticket: Ticket,
    pub payload: String,
    pub status: JobStatus,
    pub priority: i16,
    pub attempts: i32,
    pub max_attempts: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub lease_until: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub last_error: Option<JobError>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspended_by: Option<Uuid>,
    pub suspend_reason: Option<String>,
    pub last_updated_by_device: Option<String>,
    pub claimable_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Whether the lease-bearing fields agree with `status`.
    pub fn lease_invariant_holds(&self) -> bool {
        if self.status == JobStatus::Processing {
            self.worker_id.is_some() && self.lease_until.is_some()
        } else if matches!(
            self.status,
            JobStatus::Pending | JobStatus::Suspended | JobStatus::FailedRetryable
        ) {
            self.worker_id.is_none() && self.lease_until.is_none()
        } else {
            true
        }
    }
}

/// Summary returned by a reaper pass (§4.4).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaperSummary {
    pub found: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub jobs: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimable_states() {
        assert!(JobStatus::Pending.is_claimable());
        assert!(JobStatus::FailedRetryable.is_claimable());
        assert!(!JobStatus::Processing.is_claimable());
        assert!(!JobStatus::Suspended.is_claimable());
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::FailedTerminal.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Suspended.is_terminal());
        assert!(!JobStatus::FailedRetryable.is_terminal());
    }

    #[test]
    fn recognizes_closed_job_type_set() {
        assert!(is_recognized_job_type("scheduler.tick"));
        assert!(!is_recognized_job_type("unknown.type"));
    }
}
