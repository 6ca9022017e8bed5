//! `backoff(n) = min(BACKOFF_CAP, BACKOFF_BASE * 2^(n-1)) * (1 + jitter)`,
//! `jitter ∈ [0, 0.25)` (§4.3).

use std::time::Duration;

use crate::types::{BACKOFF_BASE_SECS, BACKOFF_CAP_SECS};

/// The backoff duration before jitter is applied, for a given attempt
/// count. Exposed separately so boundary tests can assert on it without
/// fighting randomness.
pub fn backoff_base(attempts: i32) -> Duration {
    let exponent = (attempts - 1).max(0) as i32;
    let secs = BACKOFF_BASE_SECS * 2f64.powi(exponent);
    Duration::from_secs_f64(secs.min(BACKOFF_CAP_SECS))
}

/// The backoff actually applied to `claimableAt`: base, inflated by a
/// random jitter factor in `[0, 0.25)`.
pub fn backoff_with_jitter(attempts: i32) -> Duration {
    let base = backoff_base(attempts);
    let jitter = rand::random::<f64>() * 0.25;
    Duration::from_secs_f64(base.as_secs_f64() * (1.0 + jitter))
}
