//! Request fingerprinting for key-reuse detection.
//!
//! The digest covers the canonical concatenation of method, path, actor, and
//! raw body bytes, NUL-separated so field boundaries cannot be forged by
//! concatenation. The body is hashed byte-for-byte, not semantically
//! normalized: two JSON payloads that differ only in whitespace count as
//! different requests. That is a deliberate simplification — it keeps the
//! fingerprint pure and cheap, and accidental key reuse across different
//! payloads is still caught.

use sha2::{Digest, Sha256};

/// Compute the stable fingerprint of an inbound request.
///
/// Pure function; deterministic for identical inputs.
pub fn fingerprint(method: &str, path: &str, actor_id: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update([0u8]);
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(actor_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(body);
    hex::encode(hasher.finalize())
}
