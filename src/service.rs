//! A tiny trait for long-running, cancellable background loops — the
//! shape the Reaper and the Cron Driver both need.
//!
//! Reconstructed from its call site in `kernel/jobs/worker.rs`
//! (`impl Service for JobWorker`, `fn run(self: Box<Self>, shutdown:
//! CancellationToken) -> Result<()>`); the module that defines the trait
//! itself, `kernel::service_host`, was not present in the retrieved pack,
//! so this is rebuilt to match the shape the call site requires rather
//! than copied verbatim.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Spawns each service on its own task and waits for all of them,
/// logging any early exit. Mirrors the teacher's top-level pattern of
/// starting the job worker and scheduled tasks alongside the HTTP server
/// in `main`, just generalized to an arbitrary list of services.
pub async fn run_all(services: Vec<Box<dyn Service>>, shutdown: CancellationToken) {
    let mut handles = Vec::with_capacity(services.len());
    for service in services {
        let name = service.name();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = service.run(shutdown).await {
                tracing::error!(service = name, error = %e, "service exited with error");
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}
