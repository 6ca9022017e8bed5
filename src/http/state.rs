//! Shared Axum state, mirroring `server/app.rs`'s `AxumAppState`: one
//! struct of `Arc`-wrapped handles threaded through every handler via
//! `State`.

use std::sync::Arc;

use crate::http::auth::JwtService;
use crate::queue::QueueEngine;
use crate::reaper::Reaper;
use crate::signer::Signer;
use crate::store::PostgresStore;

#[derive(Clone)]
pub struct AppState {
    pub queue: QueueEngine,
    pub store: PostgresStore,
    pub reaper: Arc<Reaper>,
    pub signer: Arc<Signer>,
    pub jwt: Arc<JwtService>,
    pub worker_shared_secret: Option<Arc<str>>,
    pub cron_secret: Arc<str>,
}
