//! Background sweep deleting records past their TTL.
//!
//! Hygiene, not correctness: `try_claim` and `find_active` already respect
//! `expires_at`, so a late or failed sweep only means expired rows linger a
//! little longer. Failures are logged and retried next tick, never fatal to
//! the serving path.

use crate::error::StoreError;
use crate::store::IdempotencyStore;
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{self, Duration};

/// Floor on the sweep interval; a zero interval would spin.
const MIN_INTERVAL_SECS: u64 = 1;

/// Run the reaper until the task is dropped or aborted.
pub async fn run(store: Arc<dyn IdempotencyStore>, interval_secs: u64) {
    let mut interval = time::interval(Duration::from_secs(interval_secs.max(MIN_INTERVAL_SECS)));

    loop {
        interval.tick().await;

        match sweep_once(store.as_ref()).await {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(removed, "reaped expired idempotency records");
            }
            Err(e) => {
                tracing::warn!("idempotency reaper sweep failed: {e}");
            }
        }
    }
}

/// Spawn the reaper on the current runtime.
pub fn spawn(store: Arc<dyn IdempotencyStore>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(store, interval_secs))
}

/// One sweep; exposed separately so hosts and tests can trigger it directly.
pub async fn sweep_once(store: &dyn IdempotencyStore) -> Result<u64, StoreError> {
    store.delete_expired(Utc::now()).await
}
