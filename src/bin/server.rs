//! Binary entrypoint, mirroring `server/main.rs`: init logging, load
//! config, connect + migrate, start background services, serve HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use job_queue_core::http::{auth::JwtService, build_router, AppState};
use job_queue_core::queue::QueueEngine;
use job_queue_core::reaper::Reaper;
use job_queue_core::service::{run_all, Service};
use job_queue_core::signer::Signer;
use job_queue_core::store::PostgresStore;
use job_queue_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    job_queue_core::logging::init();
    tracing::info!("starting job queue core");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("store error at startup: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")
    {
        eprintln!("store error at startup: {e:#}");
        std::process::exit(2);
    }
    tracing::info!("migrations complete");

    let signer = Arc::new(
        Signer::new(
            &config.attestation_private_key,
            &config.attestation_public_key,
            config.job_worker_hmac_secret.clone(),
        )
        .context("failed to initialize signer")?,
    );

    let queue = QueueEngine::new(pool.clone(), signer.clone());
    let store = PostgresStore::new(pool.clone());
    let reaper = Arc::new(Reaper::new(pool.clone()));
    let jwt = Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone()));

    let state = AppState {
        queue,
        store,
        reaper: reaper.clone(),
        signer,
        jwt,
        worker_shared_secret: config.job_worker_hmac_secret.clone().map(Into::into),
        cron_secret: config.cron_secret.clone().into(),
    };

    let shutdown = CancellationToken::new();
    let services: Vec<Box<dyn Service>> = vec![Box::new((*reaper).clone())];
    let service_shutdown = shutdown.clone();
    tokio::spawn(run_all(services, service_shutdown));

    let _cron_handle = job_queue_core::cron::start_scheduler(reaper)
        .await
        .context("failed to start cron scheduler")?;

    let app = build_router(state, Vec::new());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            serve_shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
