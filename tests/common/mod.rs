//! Shared Postgres testcontainer harness, following
//! `packages/server/tests/common/harness.rs`'s shared-container pattern:
//! one Postgres container and one migration run for the whole test
//! binary, a fresh connection per test.

use std::sync::Arc;

use anyhow::{Context, Result};
use ed25519_dalek::SigningKey;
use job_queue_core::queue::QueueEngine;
use job_queue_core::reaper::Reaper;
use job_queue_core::signer::Signer;
use job_queue_core::types::Ticket;
use rand::rngs::OsRng;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::{runners::AsyncRunner, ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<GenericImage>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = GenericImage::new("postgres", "16")
            .with_wait_for(testcontainers::core::WaitFor::message_on_stderr(
                "database system is ready to accept connections",
            ))
            .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
            .with_env_var("POSTGRES_PASSWORD", "postgres")
            .with_env_var("POSTGRES_USER", "postgres")
            .with_env_var("POSTGRES_DB", "postgres")
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to test database")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self { db_url, _postgres: postgres })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to init shared test infra") })
            .await
    }
}

/// A ready-to-use `QueueEngine` and `Reaper` sharing a deterministic
/// signer (§9: "tests must be able to inject a key pair
/// deterministically").
pub struct TestHarness {
    pub pool: PgPool,
    pub signer: Arc<Signer>,
    pub queue: QueueEngine,
    pub reaper: Reaper,
}

impl TestHarness {
    pub async fn new() -> Self {
        let infra = SharedTestInfra::get().await;
        let pool = PgPool::connect(&infra.db_url)
            .await
            .expect("failed to connect to test database");

        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let signer = Arc::new(
            Signer::new(&hex::encode(signing_key.to_bytes()), &hex::encode(verifying_key.to_bytes()), None)
                .expect("deterministic test signer"),
        );

        let queue = QueueEngine::new(pool.clone(), signer.clone());
        let reaper = Reaper::new(pool.clone());

        Self { pool, signer, queue, reaper }
    }

    /// Build and sign a ticket for `job_type`/`payload`, ready to
    /// `enqueue`. Returns the ticket and its canonical payload string.
    pub fn build_ticket(&self, job_type: &str, payload: serde_json::Value) -> (Ticket, String) {
        let canonical_payload = job_queue_core::signer::canonical_json(&payload);
        let now = chrono::Utc::now();
        let ticket = Ticket::builder()
            .job_id(Uuid::new_v4())
            .job_type(job_type)
            .actor_id(Uuid::new_v4())
            .scope(vec!["jobs:submit".to_string()])
            .policy_decision_id("p-1")
            .requested_at(now)
            .expires_at(now + chrono::Duration::seconds(job_queue_core::types::TICKET_TTL_SECS))
            .payload_hash(job_queue_core::signer::payload_hash(&canonical_payload))
            .nonce(Uuid::new_v4().to_string())
            .trace_id(Uuid::new_v4().to_string())
            .build();
        let ticket = self.signer.sign_ticket(ticket).expect("sign ticket");
        (ticket, canonical_payload)
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await
    }

    async fn teardown(self) {
        self.pool.close().await;
    }
}
