//! Job Queue Core: a durable, signed, lease-based work dispatch subsystem.
//!
//! See `SPEC_FULL.md` and `DESIGN.md` for the grounding ledger. Module
//! layout mirrors `packages/server/src/kernel/jobs/` in the teacher repo,
//! flattened to this crate's root since the job subsystem is the whole
//! of this crate rather than one corner of a larger one.

pub mod config;
pub mod cron;
pub mod error;
pub mod http;
pub mod logging;
pub mod nonce;
pub mod queue;
pub mod reaper;
pub mod service;
pub mod signer;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::AppError;
pub use queue::QueueEngine;
pub use reaper::Reaper;
pub use signer::Signer;
