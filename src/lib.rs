//! # replaygate
//!
//! HTTP idempotency-key subsystem: lets a client safely retry a
//! non-idempotent mutating request (create loan, create offer, ...) without
//! duplicate side effects. The first execution's response is recorded under
//! the client-supplied `Idempotency-Key` and replayed verbatim on retry;
//! concurrent duplicates are rejected fast rather than blocked; reusing a
//! key with a different payload is a conflict, never a retry.
//!
//! The subsystem is opt-in per request: no key header means the request
//! runs normally and nothing is recorded. Actor resolution and the
//! downstream business logic are external collaborators — this crate only
//! coordinates claims, captures, and replays through a narrow store
//! interface.

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod middleware;
pub mod reaper;
pub mod record;
pub mod store;

pub use config::IdempotencyConfig;
pub use coordinator::{Execution, IdempotencyCoordinator, IdempotentRequest};
pub use error::{IdempotencyError, StoreError};
pub use middleware::{ActorId, IDEMPOTENCY_KEY, IDEMPOTENCY_REPLAYED, idempotency_middleware};
pub use record::{CapturedResponse, ClaimOutcome, IdempotencyRecord, NewClaim};
pub use store::{IdempotencyStore, MemoryStore, SqliteStore};
