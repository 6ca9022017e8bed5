//! Router assembly and middleware layering, generalized from
//! `server/app.rs::build_app`'s CORS/Trace/Governor layering — split
//! into a producer router and a worker router nested under one app,
//! since §4.6 calls for distinct auth and rate-shape between the two.

pub mod auth;
pub mod producer;
pub mod state;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::Method,
    middleware,
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use state::AppState;

/// Build the full Axum application router.
///
/// Rate limits: the producer/admin surface gets a generous per-IP budget
/// (occasional human-driven calls); the worker surface gets a tighter
/// per-IP budget sized for short, frequent polling loops, matching §4.6's
/// "its rate-shape differs" note.
pub fn build_router(state: AppState, allowed_origins: Vec<String>) -> Router {
    let producer_governor = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .finish()
            .expect("producer rate limiter configuration is valid"),
    );
    let worker_governor = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(50)
            .burst_size(100)
            .finish()
            .expect("worker rate limiter configuration is valid"),
    );

    let producer_routes = Router::new()
        .route("/jobs/enqueue", post(producer::enqueue))
        .route("/jobs/{id}/suspend", post(producer::suspend))
        .route("/jobs/{id}/resume", post(producer::resume))
        .route("/jobs/{id}/priority", post(producer::set_priority))
        .route("/jobs/dlq", get(producer::dead_letter_queue))
        .route("/ops/jobs/list", get(producer::list_jobs))
        .route("/ops/jobs/stuck", get(producer::stuck_jobs))
        .layer(GovernorLayer { config: producer_governor });

    let worker_routes = Router::new()
        .route("/jobs/claim", post(worker::claim))
        .route("/jobs/heartbeat", post(worker::heartbeat))
        .route("/jobs/result", post(worker::result))
        .route("/jobs/reaper", post(worker::trigger_reaper))
        .layer(GovernorLayer { config: worker_governor });

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST])
    } else {
        let origins = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect::<Vec<_>>();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
    };

    Router::new()
        .merge(producer_routes)
        .merge(worker_routes)
        .route("/health", get(health))
        .layer(middleware::from_fn(auth::propagate_trace_id))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(10)))
        .with_state(state)
}

/// Plain liveness check. The surrounding console's own `/health` does the
/// heavier database/connection-pool reporting (§1 external collaborator);
/// this crate only needs to prove the process is up and the pool accepts
/// a trivial query.
async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> axum::http::StatusCode {
    match sqlx::query("SELECT 1").execute(state.queue.pool()).await {
        Ok(_) => axum::http::StatusCode::OK,
        Err(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    }
}
