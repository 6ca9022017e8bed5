//! A narrow, transactional persistence contract over the `job_queue`
//! document (§4.2). Generalized from the teacher's `Record` trait
//! (`kernel/jobs/record.rs`), which defines the same find/insert/update
//! shape over a single Postgres row.
//!
//! The spec describes `runTransaction(fn)` as a first-class operation; in
//! idiomatic Rust a trait method taking a generic async closure fights the
//! type system for no real benefit over simply exposing the pool and
//! letting each call site open its own `sqlx::Transaction` — which is
//! exactly what `kernel/jobs/job.rs`'s associated functions already do.
//! `StoreAdapter` therefore only captures the read/query side used by the
//! HTTP listing endpoints; the queue engine's CAS mutations
//! (`QueueEngine`, `Reaper`) hold the pool directly and manage their own
//! transactions.

mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::types::JobRecord;

/// A predicate accepted by `query`. The spec requires at least equality on
/// `status` and on `workerId`, plus the `dlq`/`stuck` shapes used by the
/// producer surface.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<crate::types::JobStatus>,
    pub worker_id: Option<String>,
    /// `PROCESSING` rows whose lease expired or heartbeat is stale as of
    /// this instant (used by `/ops/jobs/stuck`).
    pub stuck_as_of: Option<chrono::DateTime<chrono::Utc>>,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, sqlx::Error>;

    async fn delete(&self, job_id: Uuid) -> Result<bool, sqlx::Error>;

    /// Ordered by `updatedAt DESC`, per §4.5's listing endpoints.
    async fn query(&self, filter: JobFilter, limit: i64) -> Result<Vec<JobRecord>, sqlx::Error>;
}
