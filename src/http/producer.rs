//! HTTP Producer Surface (§4.5): authenticated submission, admin
//! mutations, listing and DLQ. Handler shape mirrors
//! `server/routes/health.rs` — plain async functions taking `State` and
//! returning `(StatusCode, Json<_>)` or `Result<_, AppError>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::auth::AuthUser;
use crate::http::state::AppState;
use crate::logging::LifecycleEvent;
use crate::signer::payload_hash;
use crate::store::{JobFilter, StoreAdapter};
use crate::types::{is_recognized_job_type, JobRecord, JobStatus, Ticket, TICKET_TTL_SECS};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub policy_decision_id: String,
    #[serde(default)]
    pub scope: Vec<String>,
    pub trace_id: Option<String>,
    pub max_attempts: Option<i32>,
    pub priority: Option<i16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub trace_id: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /jobs/enqueue`. Builds and signs a ticket server-side from the
/// caller's validated identity, then runs it through the same
/// `verify_ticket` path an externally-signed ticket would take — this
/// keeps one enqueue code path regardless of who produced the signature.
pub async fn enqueue(
    State(state): State<AppState>,
    AuthUser { actor_id }: AuthUser,
    Json(req): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    if !is_recognized_job_type(&req.job_type) {
        return Err(AppError::UnknownJobType(req.job_type));
    }
    if let Some(p) = req.priority {
        if !(crate::types::PRIORITY_MIN..=crate::types::PRIORITY_MAX).contains(&p) {
            return Err(AppError::PriorityOutOfRange);
        }
    }

    let canonical_payload = crate::signer::canonical_json(&req.payload);
    let now = Utc::now();
    let trace_id = req.trace_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let ticket = Ticket {
        job_id: Uuid::new_v4(),
        job_type: req.job_type,
        actor_id,
        scope: req.scope,
        policy_decision_id: req.policy_decision_id,
        requested_at: now,
        expires_at: now + chrono::Duration::seconds(TICKET_TTL_SECS),
        payload_hash: payload_hash(&canonical_payload),
        nonce: Uuid::new_v4().to_string(),
        trace_id: trace_id.clone(),
        signature: String::new(),
    };
    let ticket = state
        .signer
        .sign_ticket(ticket)
        .map_err(AppError::Internal)?;
    let expires_at = ticket.expires_at;

    let record = state
        .queue
        .enqueue(ticket, canonical_payload, req.priority, req.max_attempts)
        .await?;

    LifecycleEvent::Enqueued {
        job_id: record.id,
        job_type: &record.ticket.job_type,
        trace_id: &trace_id,
    }
    .emit();

    Ok((
        StatusCode::CREATED,
        Json(EnqueueResponse {
            job_id: record.id,
            status: record.status,
            trace_id,
            expires_at,
        }),
    ))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdminMutationRequest {
    pub reason: Option<String>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub value: Option<i16>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMutationResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub changed: bool,
}

/// `POST /jobs/{id}/suspend`.
pub async fn suspend(
    State(state): State<AppState>,
    AuthUser { actor_id }: AuthUser,
    Path(job_id): Path<Uuid>,
    Json(req): Json<AdminMutationRequest>,
) -> Result<Json<AdminMutationResponse>, AppError> {
    let outcome = state
        .queue
        .suspend(job_id, actor_id, req.reason, req.last_updated_at, req.device_id)
        .await?;

    if outcome.changed {
        LifecycleEvent::Suspended { job_id, actor_id }.emit();
    }

    Ok(Json(AdminMutationResponse {
        job_id,
        status: outcome.record.status,
        changed: outcome.changed,
    }))
}

/// `POST /jobs/{id}/resume`.
pub async fn resume(
    State(state): State<AppState>,
    AuthUser { actor_id }: AuthUser,
    Path(job_id): Path<Uuid>,
    Json(req): Json<AdminMutationRequest>,
) -> Result<Json<AdminMutationResponse>, AppError> {
    let outcome = state
        .queue
        .resume(job_id, actor_id, req.last_updated_at, req.device_id)
        .await?;

    if outcome.changed {
        LifecycleEvent::Resumed { job_id, actor_id }.emit();
    }

    Ok(Json(AdminMutationResponse {
        job_id,
        status: outcome.record.status,
        changed: outcome.changed,
    }))
}

/// `POST /jobs/{id}/priority`.
pub async fn set_priority(
    State(state): State<AppState>,
    AuthUser { .. }: AuthUser,
    Path(job_id): Path<Uuid>,
    Json(req): Json<AdminMutationRequest>,
) -> Result<Json<AdminMutationResponse>, AppError> {
    let value = req.value.ok_or_else(|| AppError::Validation("value is required".to_string()))?;
    let record = state.queue.set_priority(job_id, value).await?;

    Ok(Json(AdminMutationResponse {
        job_id,
        status: record.status,
        changed: true,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

const DEFAULT_LIST_LIMIT: i64 = 50;

/// `GET /ops/jobs/list?status=&limit=`. Most-recent by `updatedAt DESC`.
pub async fn list_jobs(
    State(state): State<AppState>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let records = state
        .store
        .query(
            JobFilter {
                status: query.status,
                ..Default::default()
            },
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub limit: Option<i64>,
}

/// `GET /jobs/dlq?limit=`. Only `status=DEAD`, ordered by `updatedAt DESC`.
pub async fn dead_letter_queue(
    State(state): State<AppState>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<DlqQuery>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let records = state
        .store
        .query(
            JobFilter {
                status: Some(JobStatus::Dead),
                ..Default::default()
            },
            query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
        )
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckQuery {
    pub threshold_sec: Option<i64>,
}

const DEFAULT_STUCK_THRESHOLD_SECS: i64 = crate::types::STALE_HEARTBEAT_SECS;

/// `GET /ops/jobs/stuck?thresholdSec=`. `PROCESSING` rows whose lease
/// expired or heartbeat is older than the threshold.
pub async fn stuck_jobs(
    State(state): State<AppState>,
    AuthUser { .. }: AuthUser,
    Query(query): Query<StuckQuery>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let threshold = query.threshold_sec.unwrap_or(DEFAULT_STUCK_THRESHOLD_SECS);
    let as_of = Utc::now() - chrono::Duration::seconds(threshold);

    let records = state
        .store
        .query(
            JobFilter {
                stuck_as_of: Some(as_of),
                ..Default::default()
            },
            DEFAULT_LIST_LIMIT,
        )
        .await?;
    Ok(Json(records))
}
