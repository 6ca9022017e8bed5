//! The anti-replay nonce table (§3 "Nonce Entry", I6, P3). Append-only;
//! entries may be garbage-collected once older than `TICKET_TTL + margin`.

use sqlx::{Postgres, Transaction};

/// Insert a nonce inside the caller's transaction. Returns `Ok(false)`
/// without mutating anything if the nonce was already present — the
/// caller is expected to roll the transaction back and surface
/// `AppError::NonceReused` (409).
pub async fn try_insert_nonce(
    tx: &mut Transaction<'_, Postgres>,
    nonce: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO job_nonces (nonce, created_at) VALUES ($1, now())
         ON CONFLICT (nonce) DO NOTHING",
    )
    .bind(nonce)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete nonce entries older than `TICKET_TTL_SECS + margin_secs`. Not
/// wired to a scheduled task by default (the table is small relative to
/// `job_queue` and unbounded growth is a capacity-planning concern, an
/// explicit Non-goal), but available for an operator-triggered sweep.
pub async fn garbage_collect(pool: &sqlx::PgPool, margin_secs: i64) -> Result<u64, sqlx::Error> {
    let ttl = crate::types::TICKET_TTL_SECS + margin_secs;
    let result = sqlx::query("DELETE FROM job_nonces WHERE created_at < now() - ($1 * interval '1 second')")
        .bind(ttl as f64)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
