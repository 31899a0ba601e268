use thiserror::Error;

// ─── Protocol error taxonomy ─────────────────────────────────────────────────

/// Structured errors for the idempotency protocol.
///
/// Callers (the middleware, or hosts driving the coordinator directly) match
/// on these to pick an HTTP status; infrastructure setup paths continue to
/// use `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Key is outside the configured `[min, max]` length bounds. 400-class.
    #[error("Idempotency-Key length must be between {min} and {max} characters")]
    InvalidKeyLength { min: usize, max: usize },

    /// Key contains whitespace or control characters. 400-class.
    #[error("Idempotency-Key contains invalid characters")]
    InvalidKeyChars,

    /// Same key reused with a different request fingerprint. 409-class.
    #[error("Idempotency-Key is already used with a different payload")]
    KeyConflict,

    /// Same key and fingerprint, first execution still running. 409-class;
    /// the caller should retry after a short delay.
    #[error("a request with this Idempotency-Key is already in progress")]
    InFlight,

    /// Record store failed. Infrastructure error, surfaced as 5xx; the
    /// downstream handler is not invoked when the claim write fails.
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

// ─── Store errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

// ─── Convenience re-exports ──────────────────────────────────────────────────

/// Shorthand result type for protocol operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_key_length_displays_bounds() {
        let err = IdempotencyError::InvalidKeyLength { min: 8, max: 128 };
        assert!(err.to_string().contains("between 8 and 128"));
    }

    #[test]
    fn key_conflict_mentions_payload() {
        let err = IdempotencyError::KeyConflict;
        assert!(err.to_string().contains("different payload"));
    }

    #[test]
    fn store_error_wraps_into_protocol_error() {
        let err: IdempotencyError = StoreError::Unavailable("pool closed".into()).into();
        assert!(err.to_string().contains("pool closed"));
    }

    #[test]
    fn in_flight_signals_in_progress() {
        let err = IdempotencyError::InFlight;
        assert!(err.to_string().contains("already in progress"));
    }
}
