use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{JobFilter, StoreAdapter};
use crate::types::JobRecord;

/// Postgres-backed implementation of `StoreAdapter`, grounded on the
/// `SELECT`/`FromRow` conventions in `kernel/jobs/job.rs`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreAdapter for PostgresStore {
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>, sqlx::Error> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM job_queue WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM job_queue WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: JobFilter, limit: i64) -> Result<Vec<JobRecord>, sqlx::Error> {
        if let Some(as_of) = filter.stuck_as_of {
            return sqlx::query_as::<_, JobRecord>(
                "SELECT * FROM job_queue
                 WHERE status = 'PROCESSING'
                   AND (lease_until < $1 OR heartbeat_at < $1)
                 ORDER BY updated_at DESC
                 LIMIT $2",
            )
            .bind(as_of)
            .bind(limit)
            .fetch_all(&self.pool)
            .await;
        }

        match (filter.status, filter.worker_id) {
            (Some(status), Some(worker_id)) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM job_queue WHERE status = $1 AND worker_id = $2
                     ORDER BY updated_at DESC LIMIT $3",
                )
                .bind(status)
                .bind(worker_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (Some(status), None) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM job_queue WHERE status = $1
                     ORDER BY updated_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (None, Some(worker_id)) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM job_queue WHERE worker_id = $1
                     ORDER BY updated_at DESC LIMIT $2",
                )
                .bind(worker_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (None, None) => {
                sqlx::query_as::<_, JobRecord>(
                    "SELECT * FROM job_queue ORDER BY updated_at DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
    }
}
