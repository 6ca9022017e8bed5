//! HTTP Worker Surface (§4.6): claim, heartbeat, result callback, and the
//! admin-gated manual reaper trigger. Separate from the producer surface
//! because its auth is worker-credentialed (`WorkerAuth`) and its
//! rate-shape differs — short, frequent polls rather than occasional
//! admin calls.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::auth::{CronAuth, WorkerAuth};
use crate::http::state::AppState;
use crate::logging::LifecycleEvent;
use crate::types::{ClaimEnvelope, ReaperSummary, ResultEnvelope};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub worker_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub job: Option<ClaimEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
}

/// `POST /jobs/claim`.
pub async fn claim(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, AppError> {
    match state.queue.claim_next(&req.worker_id).await? {
        Some(outcome) => {
            LifecycleEvent::Claimed {
                job_id: outcome.record.id,
                worker_id: &req.worker_id,
                attempt: outcome.record.attempts,
                idempotent: outcome.idempotent,
            }
            .emit();

            Ok(Json(ClaimResponse {
                job: Some(outcome.record.to_claim_envelope()),
                idempotent: outcome.idempotent.then_some(true),
            }))
        }
        None => Ok(Json(ClaimResponse { job: None, idempotent: None })),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub job_id: Uuid,
    pub worker_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub job_id: Uuid,
    pub lease_until: chrono::DateTime<chrono::Utc>,
}

/// `POST /jobs/heartbeat`.
pub async fn heartbeat(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let record = state.queue.heartbeat(req.job_id, &req.worker_id).await?;

    LifecycleEvent::HeartbeatExtended { job_id: req.job_id, worker_id: &req.worker_id }.emit();

    Ok(Json(HeartbeatResponse {
        job_id: record.id,
        lease_until: record.lease_until.unwrap_or(record.updated_at),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub job_id: Uuid,
    pub status: crate::types::JobStatus,
}

/// `POST /jobs/result`. 200 on success and on idempotent retry of a
/// terminal job; 400 on signature/hash mismatch (surfaced via
/// `AppError::BadSignature`'s `IntoResponse` impl).
pub async fn result(
    State(state): State<AppState>,
    _worker: WorkerAuth,
    Json(envelope): Json<ResultEnvelope>,
) -> Result<Json<ResultResponse>, AppError> {
    let job_id = envelope.job_id;
    let worker_id = envelope.worker_id.clone();
    let record = state.queue.complete(envelope).await?;

    match record.status {
        crate::types::JobStatus::Completed => {
            LifecycleEvent::Completed { job_id, worker_id: &worker_id }.emit();
        }
        crate::types::JobStatus::FailedRetryable => {
            LifecycleEvent::FailedRetryable { job_id, worker_id: &worker_id, attempt: record.attempts }.emit();
        }
        crate::types::JobStatus::FailedTerminal => {
            LifecycleEvent::FailedTerminal { job_id, worker_id: &worker_id }.emit();
        }
        crate::types::JobStatus::Dead => {
            LifecycleEvent::DeadLettered { job_id, total_attempts: record.attempts }.emit();
        }
        _ => {}
    }

    Ok(Json(ResultResponse { job_id: record.id, status: record.status }))
}

/// `POST /jobs/reaper`. Admin-gated manual trigger (`CRON_SECRET`
/// bearer), returning the same summary the scheduled sweep logs.
pub async fn trigger_reaper(
    State(state): State<AppState>,
    _cron: CronAuth,
) -> Result<(StatusCode, Json<ReaperSummary>), AppError> {
    let summary = state.reaper.sweep().await.map_err(AppError::Store)?;

    for job_id in &summary.jobs {
        LifecycleEvent::Reaped { job_id: *job_id, outcome: "swept" }.emit();
    }

    Ok((StatusCode::OK, Json(summary)))
}
