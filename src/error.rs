//! The error taxonomy from §7, mapped to HTTP status codes and `code`
//! strings. Mirrors `AuthError` in the teacher's `common/auth/errors.rs`:
//! one `thiserror` enum, `#[from]` where the source is unambiguous, and a
//! manual `IntoResponse` impl instead of a generic problem-details crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::types::JobRecord;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("unrecognized jobType: {0}")]
    UnknownJobType(String),

    #[error("priority must be between {} and {}", crate::types::PRIORITY_MIN, crate::types::PRIORITY_MAX)]
    PriorityOutOfRange,

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("nonce already used")]
    NonceReused,

    #[error("job {0} already exists")]
    DuplicateJobId(uuid::Uuid),

    #[error("stale update")]
    Stale(Box<JobRecord>),

    #[error("illegal state transition")]
    IllegalTransition,

    #[error("caller does not own this job's lease")]
    NotOwner,

    #[error("job is not in PROCESSING")]
    NotProcessing,

    #[error("job not found")]
    NotFound,

    #[error("signature or payload hash mismatch")]
    BadSignature,

    #[error("ticket expired")]
    TicketExpired,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none", flatten)]
    current: Option<serde_json::Value>,
}

impl AppError {
    fn code(&self) -> Option<&'static str> {
        match self {
            AppError::UnknownJobType(_) | AppError::PriorityOutOfRange => None,
            AppError::NonceReused => Some("NONCE_REUSED"),
            AppError::DuplicateJobId(_) => Some("DUPLICATE_JOB_ID"),
            AppError::Stale(_) => Some("STALE"),
            AppError::IllegalTransition => Some("ILLEGAL_TRANSITION"),
            AppError::NotOwner => Some("NOT_OWNER"),
            AppError::NotProcessing => Some("NOT_PROCESSING"),
            AppError::BadSignature => Some("BAD_SIGNATURE"),
            AppError::TicketExpired => Some("TICKET_EXPIRED"),
            _ => None,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::UnknownJobType(_)
            | AppError::PriorityOutOfRange
            | AppError::BadSignature
            | AppError::TicketExpired => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::NonceReused
            | AppError::DuplicateJobId(_)
            | AppError::Stale(_)
            | AppError::IllegalTransition
            | AppError::NotOwner
            | AppError::NotProcessing => StatusCode::CONFLICT,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            AppError::Validation(msg) => tracing::info!(error = %msg, "validation error"),
            AppError::BadSignature => tracing::warn!("rejected envelope: bad signature or payload hash"),
            AppError::Store(e) => tracing::error!(error = %e, "store error"),
            AppError::Internal(e) => tracing::error!(error = %e, "internal error"),
            _ => {}
        }

        let current = if let AppError::Stale(record) = &self {
            serde_json::to_value(record.as_ref()).ok()
        } else {
            None
        };

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            current,
        };

        (status, Json(body)).into_response()
    }
}
