use super::IdempotencyStore;
use crate::error::StoreError;
use crate::record::{CapturedResponse, ClaimOutcome, IdempotencyRecord, NewClaim};
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

/// SQLite-backed record store.
///
/// The claim primitive is a single conditional upsert guarded by a unique
/// index on `(actor_id, idempotency_key)`: a fresh key inserts, an expired
/// row is atomically taken over, and an active row rejects the write. That
/// closes the race window without any application-level locking, so the
/// store can be shared by many server processes.
pub struct SqliteStore {
    pool: SqlitePool,
}

type RecordRow = (
    String,         // id
    String,         // actor_id
    String,         // method
    String,         // path
    String,         // idempotency_key
    String,         // request_hash
    Option<i64>,    // response_status
    Option<Vec<u8>>, // response_body
    Option<String>, // response_content_type
    Option<String>, // response_location
    String,         // created_at
    String,         // expires_at
    Option<String>, // completed_at
);

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create store directory")?;
        }

        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("open SQLite database")?;

        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an in-memory database (useful for tests and ephemeral hosts).
    pub async fn in_memory() -> anyhow::Result<Self> {
        // A single connection: every pooled connection to `:memory:` would
        // otherwise see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory SQLite")?;
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn insert_or_reject(&self, record: &IdempotencyRecord) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO idempotency_records
                 (id, actor_id, method, path, idempotency_key, request_hash,
                  created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(actor_id, idempotency_key) DO UPDATE SET
                 id = excluded.id,
                 method = excluded.method,
                 path = excluded.path,
                 request_hash = excluded.request_hash,
                 response_status = NULL,
                 response_body = NULL,
                 response_content_type = NULL,
                 response_location = NULL,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at,
                 completed_at = NULL
             WHERE idempotency_records.expires_at <= excluded.created_at",
        )
        .bind(&record.id)
        .bind(&record.actor_id)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.idempotency_key)
        .bind(&record.request_hash)
        .bind(ts(record.created_at))
        .bind(ts(record.expires_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_by_key(
        &self,
        actor_id: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, actor_id, method, path, idempotency_key, request_hash,
                    response_status, response_body, response_content_type,
                    response_location, created_at, expires_at, completed_at
             FROM idempotency_records
             WHERE actor_id = ?1 AND idempotency_key = ?2",
        )
        .bind(actor_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }
}

impl IdempotencyStore for SqliteStore {
    fn try_claim(
        &self,
        claim: NewClaim,
    ) -> Pin<Box<dyn Future<Output = Result<ClaimOutcome, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let record = IdempotencyRecord::claimed_from(&claim);

            // Two attempts: the fetch after a rejected write can come back
            // empty if the reaper deletes the blocking row in between.
            for _ in 0..2 {
                if self.insert_or_reject(&record).await? {
                    return Ok(ClaimOutcome::Claimed(record));
                }
                if let Some(existing) = self
                    .fetch_by_key(&claim.actor_id, &claim.idempotency_key)
                    .await?
                {
                    return Ok(ClaimOutcome::AlreadyExists(existing));
                }
            }

            Err(StoreError::Unavailable(
                "claim kept losing the row it conflicted with".into(),
            ))
        })
    }

    fn complete<'a>(
        &'a self,
        record_id: &'a str,
        response: CapturedResponse,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE idempotency_records
                 SET response_status = ?2,
                     response_body = ?3,
                     response_content_type = ?4,
                     response_location = ?5,
                     completed_at = ?6
                 WHERE id = ?1 AND completed_at IS NULL",
            )
            .bind(record_id)
            .bind(i64::from(response.status))
            .bind(&response.body)
            .bind(&response.content_type)
            .bind(&response.location)
            .bind(ts(Utc::now()))
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::RecordNotFound(record_id.to_string()));
            }
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
            let row: Option<RecordRow> = sqlx::query_as(
                "SELECT id, actor_id, method, path, idempotency_key, request_hash,
                        response_status, response_body, response_content_type,
                        response_location, created_at, expires_at, completed_at
                 FROM idempotency_records
                 WHERE actor_id = ?1 AND idempotency_key = ?2 AND expires_at > ?3",
            )
            .bind(actor_id)
            .bind(key)
            .bind(ts(now))
            .fetch_optional(&self.pool)
            .await?;

            row.map(record_from_row).transpose()
        })
    }

    fn delete_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?1")
                .bind(ts(now))
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
    }
}

// ── Schema ───────────────────────────────────────────────────

async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS idempotency_records (
            id                    TEXT PRIMARY KEY,
            actor_id              TEXT NOT NULL,
            method                TEXT NOT NULL,
            path                  TEXT NOT NULL,
            idempotency_key       TEXT NOT NULL,
            request_hash          TEXT NOT NULL,
            response_status       INTEGER,
            response_body         BLOB,
            response_content_type TEXT,
            response_location     TEXT,
            created_at            TEXT NOT NULL,
            expires_at            TEXT NOT NULL,
            completed_at          TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_idempotency_actor_key
            ON idempotency_records(actor_id, idempotency_key);
        CREATE INDEX IF NOT EXISTS idx_idempotency_expires
            ON idempotency_records(expires_at);",
    )
    .execute(pool)
    .await
    .context("init idempotency schema")?;
    Ok(())
}

// ── Row codec ────────────────────────────────────────────────

/// Fixed-width UTC RFC 3339 so timestamps compare correctly as text.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Unavailable(format!("corrupt timestamp {raw:?}: {e}")))
}

fn record_from_row(row: RecordRow) -> Result<IdempotencyRecord, StoreError> {
    let (
        id,
        actor_id,
        method,
        path,
        idempotency_key,
        request_hash,
        response_status,
        response_body,
        response_content_type,
        response_location,
        created_at,
        expires_at,
        completed_at,
    ) = row;

    let response_status = response_status
        .map(|status| {
            u16::try_from(status)
                .map_err(|_| StoreError::Unavailable(format!("corrupt status {status}")))
        })
        .transpose()?;

    Ok(IdempotencyRecord {
        id,
        actor_id,
        method,
        path,
        idempotency_key,
        request_hash,
        response_status,
        response_body,
        response_content_type,
        response_location,
        created_at: parse_ts(&created_at)?,
        expires_at: parse_ts(&expires_at)?,
        completed_at: completed_at.as_deref().map(parse_ts).transpose()?,
    })
}
