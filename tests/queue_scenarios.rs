//! End-to-end scenarios covering the happy path, priority ordering,
//! suspend/resume, nonce replay, lease expiry, and dead-lettering,
//! plus a handful of invariant/idempotence properties that are awkward
//! to assert against a fake store and worth proving against real Postgres.

mod common;

use common::TestHarness;
use chrono::Utc;
use job_queue_core::types::{JobError, JobStatus, ResultEnvelope, ResultStatus};
use test_context::test_context;

/// Happy path -- enqueue, claim, heartbeat, complete, idempotent re-post.
#[test_context(TestHarness)]
#[tokio::test]
async fn happy_path_enqueue_claim_complete(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"tick": 1}));
    let job_id = ticket.job_id;

    let record = ctx
        .queue
        .enqueue(ticket, payload, None, None)
        .await
        .expect("enqueue should succeed");
    assert_eq!(record.status, JobStatus::Pending);

    let claimed = ctx
        .queue
        .claim_next("W1")
        .await
        .expect("claim should succeed")
        .expect("a job should be claimable");
    assert_eq!(claimed.record.id, job_id);
    assert_eq!(claimed.record.attempts, 1);
    assert!(!claimed.idempotent);

    let after_heartbeat = ctx
        .queue
        .heartbeat(job_id, "W1")
        .await
        .expect("heartbeat should succeed");
    assert_eq!(after_heartbeat.version, claimed.record.version + 1);

    let envelope = ResultEnvelope {
        job_id,
        worker_id: "W1".to_string(),
        status: ResultStatus::Success,
        output: None,
        error: None,
        completed_at: Utc::now(),
        signature: String::new(),
    };
    let signed = ctx.signer.sign_result(envelope).expect("sign result");
    let completed = ctx.queue.complete(signed.clone()).await.expect("complete should succeed");
    assert_eq!(completed.status, JobStatus::Completed);
    let version_after_first_complete = completed.version;

    // Re-posting the same result is idempotent -- no further mutation.
    let replayed = ctx.queue.complete(signed).await.expect("idempotent re-post should succeed");
    assert_eq!(replayed.status, JobStatus::Completed);
    assert_eq!(replayed.version, version_after_first_complete);
}

/// Priority ordering -- a later-inserted higher-priority job claims first.
#[test_context(TestHarness)]
#[tokio::test]
async fn priority_ordering(ctx: &TestHarness) {
    let (ticket_a, payload_a) = ctx.build_ticket("scheduler.tick", serde_json::json!({"n": "a"}));
    let job_a = ticket_a.job_id;
    ctx.queue.enqueue(ticket_a, payload_a, None, None).await.unwrap();

    let (ticket_b, payload_b) = ctx.build_ticket("scheduler.tick", serde_json::json!({"n": "b"}));
    let job_b = ticket_b.job_id;
    ctx.queue.enqueue(ticket_b, payload_b, None, None).await.unwrap();

    ctx.queue.set_priority(job_a, 90).await.unwrap();
    ctx.queue.set_priority(job_b, 10).await.unwrap();

    let first = ctx.queue.claim_next("W1").await.unwrap().unwrap();
    assert_eq!(first.record.id, job_a);

    let envelope = ResultEnvelope {
        job_id: job_a,
        worker_id: "W1".to_string(),
        status: ResultStatus::Success,
        output: None,
        error: None,
        completed_at: Utc::now(),
        signature: String::new(),
    };
    let signed = ctx.signer.sign_result(envelope).unwrap();
    ctx.queue.complete(signed).await.unwrap();

    let second = ctx.queue.claim_next("W2").await.unwrap().unwrap();
    assert_eq!(second.record.id, job_b);
}

/// Suspend then resume -- a suspended job is never claimed, a
/// resumed one is claimable again.
#[test_context(TestHarness)]
#[tokio::test]
async fn suspend_then_resume(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"c": 1}));
    let job_id = ticket.job_id;
    let actor_id = ticket.actor_id;
    ctx.queue.enqueue(ticket, payload, None, None).await.unwrap();

    let outcome = ctx.queue.suspend(job_id, actor_id, None, None, None).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.record.status, JobStatus::Suspended);

    // Suspending an already-suspended job is idempotent.
    let second_suspend = ctx.queue.suspend(job_id, actor_id, None, None, None).await.unwrap();
    assert!(!second_suspend.changed);
    assert_eq!(second_suspend.record.version, outcome.record.version);

    assert!(ctx.queue.claim_next("W1").await.unwrap().is_none());

    let resumed = ctx.queue.resume(job_id, actor_id, None, None).await.unwrap();
    assert!(resumed.changed);
    assert_eq!(resumed.record.status, JobStatus::Pending);

    let claimed = ctx.queue.claim_next("W1").await.unwrap().unwrap();
    assert_eq!(claimed.record.id, job_id);
}

/// Nonce replay -- re-submitting the identical ticket is rejected
/// and no second record is created.
#[test_context(TestHarness)]
#[tokio::test]
async fn nonce_replay_is_rejected(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"n": 1}));

    ctx.queue.enqueue(ticket.clone(), payload.clone(), None, None).await.unwrap();

    let err = ctx
        .queue
        .enqueue(ticket, payload, None, None)
        .await
        .expect_err("replaying the same ticket must fail");
    assert!(matches!(err, job_queue_core::AppError::DuplicateJobId(_)));
}

/// Lease expiry retry -- a disappeared worker's job is reaped back
/// to FAILED_RETRYABLE with attempts incremented, and a new worker can
/// then claim it.
#[test_context(TestHarness)]
#[tokio::test]
async fn lease_expiry_retry(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"d": 1}));
    let job_id = ticket.job_id;
    ctx.queue.enqueue(ticket, payload, None, None).await.unwrap();

    ctx.queue.claim_next("W2").await.unwrap().unwrap();
    ctx.queue.heartbeat(job_id, "W2").await.unwrap();

    // Force the lease into the past so the reaper treats it as expired,
    // instead of sleeping out the lease duration in a test.
    sqlx::query("UPDATE job_queue SET lease_until = now() - interval '1 second' WHERE id = $1")
        .bind(job_id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let summary = ctx.reaper.sweep().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.dead_lettered, 0);

    let reaped = sqlx::query_as::<_, job_queue_core::types::JobRecord>(
        "SELECT * FROM job_queue WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(reaped.status, JobStatus::FailedRetryable);
    assert!(reaped.worker_id.is_none());
    assert_eq!(reaped.attempts, 1);

    // claimable_at is in the future (backoff applied): force it open so
    // a new worker can claim immediately rather than sleeping in the test.
    sqlx::query("UPDATE job_queue SET claimable_at = NULL WHERE id = $1")
        .bind(job_id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    let reclaimed = ctx.queue.claim_next("W3").await.unwrap().unwrap();
    assert_eq!(reclaimed.record.id, job_id);
    assert_eq!(reclaimed.record.attempts, 2);
}

/// Dead-letter -- with maxAttempts=2, two lease expirations dead-letters
/// the job and it stops being claimable.
#[test_context(TestHarness)]
#[tokio::test]
async fn dead_letter_after_attempts_exhausted(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"e": 1}));
    let job_id = ticket.job_id;
    ctx.queue.enqueue(ticket, payload, None, Some(2)).await.unwrap();

    // First lease expiry: attempts=1 -> FAILED_RETRYABLE.
    ctx.queue.claim_next("W1").await.unwrap().unwrap();
    sqlx::query("UPDATE job_queue SET lease_until = now() - interval '1 second', claimable_at = NULL WHERE id = $1")
        .bind(job_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    let first_sweep = ctx.reaper.sweep().await.unwrap();
    assert_eq!(first_sweep.retried, 1);

    sqlx::query("UPDATE job_queue SET claimable_at = NULL WHERE id = $1")
        .bind(job_id)
        .execute(&ctx.pool)
        .await
        .unwrap();

    // Second lease expiry: attempts=2 == maxAttempts -> DEAD.
    ctx.queue.claim_next("W2").await.unwrap().unwrap();
    sqlx::query("UPDATE job_queue SET lease_until = now() - interval '1 second' WHERE id = $1")
        .bind(job_id)
        .execute(&ctx.pool)
        .await
        .unwrap();
    let second_sweep = ctx.reaper.sweep().await.unwrap();
    assert_eq!(second_sweep.dead_lettered, 1);

    let dead = sqlx::query_as::<_, job_queue_core::types::JobRecord>(
        "SELECT * FROM job_queue WHERE id = $1",
    )
    .bind(job_id)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(dead.status, JobStatus::Dead);

    assert!(ctx.queue.claim_next("W3").await.unwrap().is_none());
}

/// Repeated `claimNext` calls by the worker already holding the
/// lease return the same record rather than re-claiming or erroring.
#[test_context(TestHarness)]
#[tokio::test]
async fn repeated_claim_by_same_worker_is_idempotent(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"f": 1}));
    ctx.queue.enqueue(ticket, payload, None, None).await.unwrap();

    let first = ctx.queue.claim_next("W1").await.unwrap().unwrap();
    assert!(!first.idempotent);

    let second = ctx.queue.claim_next("W1").await.unwrap().unwrap();
    assert!(second.idempotent);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(second.record.version, first.record.version);
}

/// A worker reporting a non-retryable failure goes straight to
/// FAILED_TERMINAL.
#[test_context(TestHarness)]
#[tokio::test]
async fn complete_with_non_retryable_failure_goes_straight_to_terminal(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"g": 1}));
    let job_id = ticket.job_id;
    ctx.queue.enqueue(ticket, payload, None, None).await.unwrap();
    ctx.queue.claim_next("W1").await.unwrap().unwrap();

    let envelope = ResultEnvelope {
        job_id,
        worker_id: "W1".to_string(),
        status: ResultStatus::Failure,
        output: None,
        error: Some(JobError {
            code: "BAD_INPUT".to_string(),
            message: "payload failed validation".to_string(),
            retryable: false,
        }),
        completed_at: Utc::now(),
        signature: String::new(),
    };
    let signed = ctx.signer.sign_result(envelope).unwrap();
    let record = ctx.queue.complete(signed).await.unwrap();
    assert_eq!(record.status, JobStatus::FailedTerminal);
}

/// A stale `lastUpdatedAt` on a merge-guarded admin mutation is rejected
/// with the current server state echoed back.
#[test_context(TestHarness)]
#[tokio::test]
async fn merge_guard_rejects_stale_admin_update(ctx: &TestHarness) {
    let (ticket, payload) = ctx.build_ticket("scheduler.tick", serde_json::json!({"h": 1}));
    let job_id = ticket.job_id;
    let actor_id = ticket.actor_id;
    ctx.queue.enqueue(ticket, payload, None, None).await.unwrap();

    let stale_view = Utc::now() - chrono::Duration::seconds(60);
    let err = ctx
        .queue
        .suspend(job_id, actor_id, None, Some(stale_view), None)
        .await
        .expect_err("a lastUpdatedAt older than the server's updatedAt must be rejected");
    match err {
        job_queue_core::AppError::Stale(record) => assert_eq!(record.id, job_id),
        other => panic!("expected Stale, got {other:?}"),
    }
}

/// A claim against an empty queue returns none without creating anything.
#[test_context(TestHarness)]
#[tokio::test]
async fn claim_next_returns_none_on_empty_queue(ctx: &TestHarness) {
    assert!(ctx.queue.claim_next("WX").await.unwrap().is_none());
}
