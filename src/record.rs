use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

// ─── Persisted record ────────────────────────────────────────────────────────

/// One row per `(actor_id, idempotency_key)` claim.
///
/// Created in-flight when a fresh key is first accepted, mutated exactly once
/// (by the execution that created it) to attach the captured response, and
/// deleted only by the reaper once `expires_at` has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub id: String,
    pub actor_id: String,
    pub method: String,
    pub path: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub response_status: Option<u16>,
    pub response_body: Option<Vec<u8>>,
    pub response_content_type: Option<String>,
    pub response_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// Build the in-flight record a freshly accepted claim produces.
    pub fn claimed_from(claim: &NewClaim) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            actor_id: claim.actor_id.clone(),
            method: claim.method.clone(),
            path: claim.path.clone(),
            idempotency_key: claim.idempotency_key.clone(),
            request_hash: claim.request_hash.clone(),
            response_status: None,
            response_body: None,
            response_content_type: None,
            response_location: None,
            created_at: claim.created_at,
            expires_at: claim.expires_at,
            completed_at: None,
        }
    }

    /// A record is completed once its response has been attached.
    /// Invariant: `completed_at` is set iff `response_status` is set.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// A record only shields its key while it has not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Reassemble the stored response for replay.
    ///
    /// Returns `None` for in-flight records (no response captured yet).
    pub fn stored_response(&self) -> Option<CapturedResponse> {
        let status = self.response_status?;
        Some(CapturedResponse {
            status,
            body: self.response_body.clone().unwrap_or_default(),
            content_type: self.response_content_type.clone(),
            location: self.response_location.clone(),
        })
    }
}

// ─── Claim input ─────────────────────────────────────────────────────────────

/// Input to [`IdempotencyStore::try_claim`](crate::store::IdempotencyStore).
///
/// `expires_at` is fixed here, at creation; replay reads never extend it.
#[derive(Debug, Clone)]
pub struct NewClaim {
    pub actor_id: String,
    pub method: String,
    pub path: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewClaim {
    pub fn new(
        actor_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        idempotency_key: impl Into<String>,
        request_hash: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            actor_id: actor_id.into(),
            method: method.into(),
            path: path.into(),
            idempotency_key: idempotency_key.into(),
            request_hash: request_hash.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }
}

// ─── Claim outcome ───────────────────────────────────────────────────────────

/// Result of the atomic insert-or-fetch claim.
///
/// Exactly one caller among concurrent claimants for the same
/// `(actor_id, idempotency_key)` receives `Claimed`; every other caller
/// receives the existing record.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(IdempotencyRecord),
    AlreadyExists(IdempotencyRecord),
}

// ─── Captured downstream response ────────────────────────────────────────────

/// The slice of a downstream response the protocol records and replays:
/// status, raw body bytes, content type, and the `Location` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub location: Option<String>,
}

impl CapturedResponse {
    /// Internal failures are not completions; the record stays in-flight so
    /// the key can be retried once it expires.
    pub fn is_internal_failure(&self) -> bool {
        self.status >= 500
    }
}
