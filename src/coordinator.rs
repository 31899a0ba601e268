//! The per-key state machine: Absent → InFlight → Completed, with Expired
//! reached only by time.
//!
//! The coordinator is stateless; the store's atomic claim is the sole
//! coordination point, so any number of server processes can share one
//! store. No caller ever blocks waiting for another's completion —
//! concurrent duplicates are rejected immediately and rely on client-side
//! retry with backoff.

use crate::config::IdempotencyConfig;
use crate::error::{IdempotencyError, Result};
use crate::fingerprint::fingerprint;
use crate::record::{CapturedResponse, ClaimOutcome, NewClaim};
use crate::store::IdempotencyStore;
use std::future::Future;
use std::sync::Arc;

/// The request material the protocol operates on. The actor is resolved by
/// an external authentication layer; this subsystem never authenticates.
#[derive(Debug, Clone, Copy)]
pub struct IdempotentRequest<'a> {
    pub actor_id: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub idempotency_key: Option<&'a str>,
    pub body: &'a [u8],
}

/// How a request was resolved.
#[derive(Debug)]
pub enum Execution<R> {
    /// No key supplied — the subsystem is opt-in per request, so the
    /// request ran normally with no record created.
    Untracked(R),
    /// Sole executor: downstream ran and its response was recorded.
    First(R),
    /// Served verbatim from the stored response; downstream did not run.
    Replayed(CapturedResponse),
}

pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
}

impl IdempotencyCoordinator {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Handle to the shared store, for wiring the reaper.
    pub fn store(&self) -> Arc<dyn IdempotencyStore> {
        Arc::clone(&self.store)
    }

    /// Run `downstream` under the idempotency protocol.
    ///
    /// `downstream` yields the caller's own response value alongside the
    /// [`CapturedResponse`] slice the protocol records; it is invoked at
    /// most once per claimed record. A captured 4xx is a legitimate
    /// completed outcome and gets cached like any success; a 5xx leaves the
    /// record in-flight so the key resets once it expires instead of
    /// caching a half-finished failure.
    pub async fn handle<F, Fut, R>(
        &self,
        request: IdempotentRequest<'_>,
        downstream: F,
    ) -> Result<Execution<R>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (R, CapturedResponse)>,
    {
        let Some(key) = normalize_key(request.idempotency_key) else {
            let (output, _) = downstream().await;
            return Ok(Execution::Untracked(output));
        };
        self.validate_key(&key)?;

        let hash = fingerprint(request.method, request.path, request.actor_id, request.body);
        let claim = NewClaim::new(
            request.actor_id,
            request.method,
            request.path,
            key.as_str(),
            hash.as_str(),
            self.config.ttl(),
        );

        match self.store.try_claim(claim).await? {
            ClaimOutcome::AlreadyExists(existing) => {
                if existing.request_hash != hash {
                    tracing::warn!(
                        actor = request.actor_id,
                        path = request.path,
                        "idempotency key reused with a different payload"
                    );
                    return Err(IdempotencyError::KeyConflict);
                }
                if let Some(stored) = existing.stored_response() {
                    tracing::debug!(
                        actor = request.actor_id,
                        path = request.path,
                        status = stored.status,
                        "replaying stored response"
                    );
                    return Ok(Execution::Replayed(stored));
                }
                // Same request, first execution still running. Fail fast;
                // the client's retry policy handles backoff.
                Err(IdempotencyError::InFlight)
            }
            ClaimOutcome::Claimed(record) => {
                let (output, captured) = downstream().await;

                if captured.is_internal_failure() {
                    // Not a completion: the record stays in-flight and the
                    // key frees itself when it expires.
                    tracing::warn!(
                        actor = request.actor_id,
                        path = request.path,
                        status = captured.status,
                        "downstream failed internally; claim left in-flight"
                    );
                    return Ok(Execution::First(output));
                }

                self.store.complete(&record.id, captured).await?;
                Ok(Execution::First(output))
            }
        }
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        let (min, max) = self.config.key_bounds();
        let length = key.chars().count();
        if length < min || length > max {
            return Err(IdempotencyError::InvalidKeyLength { min, max });
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdempotencyError::InvalidKeyChars);
        }
        Ok(())
    }
}

/// A blank or whitespace-only header is treated as absent.
fn normalize_key(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned)
}
