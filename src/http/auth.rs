//! Producer/admin JWT auth and worker shared-secret auth (§4.5/§4.6), plus
//! `X-Trace-Id` propagation. Grounded on `domains/auth/jwt.rs`'s
//! `JwtService` and `server/middleware/jwt_auth.rs`'s Bearer extraction;
//! the worker scheme is the same Bearer shape checked against a static
//! shared secret instead of a signed token, since workers are trusted
//! processes holding `JOB_WORKER_HMAC_SECRET`, not members with JWTs
//! (SPEC_FULL.md §4.5/4.6).

use axum::{
    extract::{FromRequestParts, State},
    http::{header::HeaderValue, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub actor_id: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

/// JWTs authenticating the producer/admin surface. Not itself part of the
/// job-queue correctness model (§1 treats the authentication context as
/// an external collaborator); this is the ambient stack that yields an
/// `actorId` for the queue engine's admin mutations.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtService {
    pub fn new(secret: &str, issuer: String) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
        }
    }

    pub fn create_token(&self, actor_id: Uuid) -> anyhow::Result<String> {
        let now = chrono::Utc::now();
        let claims = Claims {
            sub: actor_id.to_string(),
            actor_id,
            exp: (now + chrono::Duration::hours(24)).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn verify_token(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }
}

/// Authenticated producer/admin identity, extracted from a verified JWT.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub actor_id: Uuid,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let claims = state
            .jwt
            .verify_token(token)
            .map_err(|_| AppError::Unauthorized)?;
        Ok(AuthUser { actor_id: claims.actor_id })
    }
}

/// Authenticated worker identity: the bearer token must match
/// `JOB_WORKER_HMAC_SECRET` when one is configured. Left open (any
/// caller accepted) when unset, matching how the teacher's own JWT
/// middleware treats a missing token as anonymous rather than a hard
/// failure — development convenience, not a production default.
pub struct WorkerAuth;

impl FromRequestParts<AppState> for WorkerAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match &state.worker_shared_secret {
            None => Ok(WorkerAuth),
            Some(secret) => {
                let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;
                if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
                    Ok(WorkerAuth)
                } else {
                    Err(AppError::Unauthorized)
                }
            }
        }
    }
}

/// `CRON_SECRET` bearer check, gating the manual reaper trigger and the
/// scheduled cron-heartbeat endpoint (§6).
pub struct CronAuth;

impl FromRequestParts<AppState> for CronAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Forbidden)?;
        if constant_time_eq(token.as_bytes(), state.cron_secret.as_bytes()) {
            Ok(CronAuth)
        } else {
            Err(AppError::Forbidden)
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").or(Some(header))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extension carrying the trace id for the duration of one request.
#[derive(Debug, Clone)]
pub struct TraceId(pub String);

/// Generates an `X-Trace-Id` if the caller did not supply one, echoes it
/// back on the response, and stores it in request extensions for
/// handlers to read. Also echoes `X-Idempotency-Key` verbatim when the
/// caller sent one (§4.6: used for offline-replay traceability only, not
/// for deduplication of the underlying effect -- that's the state
/// machine's job). Mirrors the shape of `extract_client_ip` in
/// `server/middleware/ip_extractor.rs`: a small `middleware::from_fn`
/// layer that enriches the request before the handler runs.
pub async fn propagate_trace_id(mut request: axum::extract::Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let idempotency_key = request
        .headers()
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("x-trace-id", value);
    }
    if let Some(key) = idempotency_key {
        if let Ok(value) = HeaderValue::from_str(&key) {
            response.headers_mut().insert("x-idempotency-key", value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trips_actor_id() {
        let jwt = JwtService::new("secret", "job-queue-core".to_string());
        let actor_id = Uuid::new_v4();
        let token = jwt.create_token(actor_id).unwrap();
        let claims = jwt.verify_token(&token).unwrap();
        assert_eq!(claims.actor_id, actor_id);
    }

    #[test]
    fn jwt_rejects_token_signed_with_a_different_secret() {
        let a = JwtService::new("secret-a", "job-queue-core".to_string());
        let b = JwtService::new("secret-b", "job-queue-core".to_string());
        let token = a.create_token(Uuid::new_v4()).unwrap();
        assert!(b.verify_token(&token).is_err());
    }

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
