//! Structured lifecycle-event emission keyed by job and trace identifiers
//! (§2 Logger). The subscriber setup mirrors `packages/server/src/server/main.rs`;
//! the event shape is a trimmed version of `kernel/jobs/events.rs::JobEvent`,
//! kept to the facts this crate's own handlers actually observe rather than
//! the teacher's full job-runner vocabulary.

use uuid::Uuid;

/// Initialize the global tracing subscriber. Call once, at process start.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,job_queue_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// A fact about a job's lifecycle, logged at a level appropriate to its
/// severity. Audit-envelope emission and metrics increments are handled
/// by external collaborators (§1 Out of scope); this only produces a
/// structured tracing event for operators reading server logs.
#[derive(Debug, Clone)]
pub enum LifecycleEvent<'a> {
    Enqueued { job_id: Uuid, job_type: &'a str, trace_id: &'a str },
    Claimed { job_id: Uuid, worker_id: &'a str, attempt: i32, idempotent: bool },
    HeartbeatExtended { job_id: Uuid, worker_id: &'a str },
    Completed { job_id: Uuid, worker_id: &'a str },
    FailedRetryable { job_id: Uuid, worker_id: &'a str, attempt: i32 },
    FailedTerminal { job_id: Uuid, worker_id: &'a str },
    DeadLettered { job_id: Uuid, total_attempts: i32 },
    Suspended { job_id: Uuid, actor_id: Uuid },
    Resumed { job_id: Uuid, actor_id: Uuid },
    Reaped { job_id: Uuid, outcome: &'a str },
}

impl LifecycleEvent<'_> {
    pub fn emit(&self) {
        match self {
            LifecycleEvent::Enqueued { job_id, job_type, trace_id } => {
                tracing::info!(job_id = %job_id, job_type, trace_id, "job enqueued");
            }
            LifecycleEvent::Claimed { job_id, worker_id, attempt, idempotent } => {
                tracing::info!(job_id = %job_id, worker_id, attempt, idempotent, "job claimed");
            }
            LifecycleEvent::HeartbeatExtended { job_id, worker_id } => {
                tracing::debug!(job_id = %job_id, worker_id, "lease extended");
            }
            LifecycleEvent::Completed { job_id, worker_id } => {
                tracing::info!(job_id = %job_id, worker_id, "job completed");
            }
            LifecycleEvent::FailedRetryable { job_id, worker_id, attempt } => {
                tracing::warn!(job_id = %job_id, worker_id, attempt, "job failed, will retry");
            }
            LifecycleEvent::FailedTerminal { job_id, worker_id } => {
                tracing::warn!(job_id = %job_id, worker_id, "job failed terminally");
            }
            LifecycleEvent::DeadLettered { job_id, total_attempts } => {
                tracing::error!(job_id = %job_id, total_attempts, "job dead-lettered");
            }
            LifecycleEvent::Suspended { job_id, actor_id } => {
                tracing::info!(job_id = %job_id, actor_id = %actor_id, "job suspended");
            }
            LifecycleEvent::Resumed { job_id, actor_id } => {
                tracing::info!(job_id = %job_id, actor_id = %actor_id, "job resumed");
            }
            LifecycleEvent::Reaped { job_id, outcome } => {
                tracing::info!(job_id = %job_id, outcome, "job reaped");
            }
        }
    }
}
