use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Legacy HMAC secret, accepted on verify only (see DESIGN.md Open
    /// Question f). `None` disables the legacy path entirely.
    pub job_worker_hmac_secret: Option<String>,
    /// Hex-encoded 32-byte Ed25519 seed. Required: the signer must fail
    /// fast at startup rather than fall back to an insecure default (§9).
    pub attestation_private_key: String,
    /// Hex-encoded 32-byte Ed25519 public key, checked against the
    /// private key's derived public key at startup.
    pub attestation_public_key: String,
    /// Bearer token gating the manual reaper trigger and the cron-driven
    /// heartbeat endpoint.
    pub cron_secret: String,
    /// HMAC secret signing producer/admin-surface JWTs (§4.5 auth context).
    /// This is ambient auth-stack plumbing, not part of the job-queue
    /// correctness model itself (§1).
    pub jwt_secret: String,
    /// JWT issuer checked on verify.
    pub jwt_issuer: String,
}

impl Config {
    /// Load configuration from environment variables, loading a `.env`
    /// file first if one is present (development convenience).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            job_worker_hmac_secret: env::var("JOB_WORKER_HMAC_SECRET").ok(),
            attestation_private_key: env::var("ATTESTATION_PRIVATE_KEY")
                .context("ATTESTATION_PRIVATE_KEY must be set")?,
            attestation_public_key: env::var("ATTESTATION_PUBLIC_KEY")
                .context("ATTESTATION_PUBLIC_KEY must be set")?,
            cron_secret: env::var("CRON_SECRET").context("CRON_SECRET must be set")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "job-queue-core".to_string()),
        })
    }
}
