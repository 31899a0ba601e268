use super::IdempotencyStore;
use crate::error::StoreError;
use crate::record::{CapturedResponse, ClaimOutcome, IdempotencyRecord, NewClaim};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// In-process record store.
///
/// Claims are atomic within the process because every operation runs under a
/// single lock acquisition. Suitable for single-instance hosts and tests;
/// multi-process deployments need [`SqliteStore`](super::SqliteStore) or
/// another shared engine.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(String, String), IdempotencyRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), IdempotencyRecord>>, StoreError>
    {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("record map lock poisoned".into()))
    }
}

impl IdempotencyStore for MemoryStore {
    fn try_claim(
        &self,
        claim: NewClaim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.lock()?;
            let slot = (claim.actor_id.clone(), claim.idempotency_key.clone());
            match records.get(&slot) {
                // An unexpired row shields the key, whatever its state.
                Some(existing) if existing.is_active(claim.created_at) => {
                    Ok(ClaimOutcome::AlreadyExists(existing.clone()))
                }
                // Absent or expired: this caller becomes the sole executor.
                _ => {
                    let record = IdempotencyRecord::claimed_from(&claim);
                    records.insert(slot, record.clone());
                    Ok(ClaimOutcome::Claimed(record))
                }
            }
        })
    }

    fn complete<'a>(
        &'a self,
        record_id: &'a str,
        response: CapturedResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let mut records = self.lock()?;
            let record = records
                .values_mut()
                .find(|record| record.id == record_id && !record.is_completed())
                .ok_or_else(|| StoreError::RecordNotFound(record_id.to_string()))?;

            record.response_status = Some(response.status);
            record.response_body = Some(response.body);
            record.response_content_type = response.content_type;
            record.response_location = response.location;
            record.completed_at = Some(Utc::now());
            Ok(())
        })
    }

    fn find_active<'a>(
        &'a self,
        actor_id: &'a str,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotencyRecord>, StoreError>> + Send + 'a>>
    {
        Box::pin(async move {
            let records = self.lock()?;
            Ok(records
                .get(&(actor_id.to_string(), key.to_string()))
                .filter(|record| record.is_active(now))
                .cloned())
        })
    }

    fn delete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut records = self.lock()?;
            let before = records.len();
            records.retain(|_, record| record.is_active(now));
            Ok((before - records.len()) as u64)
        })
    }
}
