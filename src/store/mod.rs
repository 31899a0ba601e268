//! Durable keyed storage for idempotency records.
//!
//! The store is the only shared mutable resource in the subsystem; all
//! coordination is expressed as store operations with atomicity contracts,
//! which keeps the coordinator stateless and replicable across processes.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::record::{CapturedResponse, ClaimOutcome, IdempotencyRecord, NewClaim};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Keyed record storage behind the idempotency protocol.
///
/// `try_claim` is the linchpin of at-most-one execution: it must be a single
/// atomic insert-or-fetch (unique constraint plus conflict handling, or a
/// conditional put), never a read-then-write pair, because the store may be
/// shared by many independent server processes.
pub trait IdempotencyStore: Send + Sync {
    /// Atomically claim `(actor_id, idempotency_key)`. Exactly one caller
    /// among concurrent claimants receives [`ClaimOutcome::Claimed`]; the
    /// rest receive the existing record. An expired row does not block a
    /// fresh claim.
    fn try_claim(
        &self,
        claim: NewClaim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome, StoreError>> + Send + '_>>;

    /// Attach the captured response to an in-flight record. The coordinator
    /// guarantees at most one call per claimed record.
    fn complete<'a>(
        &'a self,
        record_id: &'a str,
        response: CapturedResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    /// Fetch the record for `(actor_id, key)` if it has not expired.
    fn find_active<'a>(
        &'a self,
        actor_id: &'a str,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotencyRecord>, StoreError>> + Send + 'a>>;

    /// Delete records past their TTL; returns the number removed. Hygiene
    /// only — correctness never depends on timely deletion.
    fn delete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;
}
