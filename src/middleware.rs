//! Axum adapter around the coordinator.
//!
//! Wire it as a layer on the routes that accept mutating requests:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/loans", post(create_loan))
//!     .layer(axum::middleware::from_fn_with_state(
//!         coordinator.clone(),
//!         replaygate::middleware::idempotency_middleware,
//!     ));
//! ```
//!
//! The host's authentication layer is expected to insert an [`ActorId`]
//! extension; unauthenticated requests fall back to `"anonymous"`.

use crate::coordinator::{Execution, IdempotencyCoordinator, IdempotentRequest};
use crate::error::IdempotencyError;
use crate::record::CapturedResponse;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

/// Request header carrying the client-supplied key.
pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
/// Response header: `true` when the response was served from the record
/// store, absent on first executions.
pub const IDEMPOTENCY_REPLAYED: &str = "Idempotency-Replayed";

/// Authenticated caller identity, resolved upstream and attached as a
/// request extension.
#[derive(Debug, Clone)]
pub struct ActorId(pub String);

/// The middleware itself; see the module docs for wiring.
pub async fn idempotency_middleware(
    State(coordinator): State<Arc<IdempotencyCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    let config = coordinator.config();
    if !config.enabled || !is_mutating(request.method()) {
        return next.run(request).await;
    }

    // GETs never reach this point; a missing or blank key opts the request
    // out entirely.
    let key = request
        .headers()
        .get(IDEMPOTENCY_KEY)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ToOwned::to_owned);
    let Some(key) = key else {
        return next.run(request).await;
    };

    let actor = request
        .extensions()
        .get::<ActorId>()
        .map_or_else(|| "anonymous".to_string(), |actor| actor.0.clone());
    let method = request.method().as_str().to_string();
    let path = normalize_path(request.uri().path());

    // The body is consumed for fingerprinting, then handed back downstream.
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(serde_json::json!({"error": "request body too large"})),
            )
                .into_response();
        }
    };
    let request = Request::from_parts(parts, Body::from(bytes.clone()));
    let body_limit = config.max_body_bytes;

    let outcome = coordinator
        .handle(
            IdempotentRequest {
                actor_id: &actor,
                method: &method,
                path: &path,
                idempotency_key: Some(&key),
                body: &bytes,
            },
            move || async move {
                let response = next.run(request).await;
                buffer_response(response, body_limit).await
            },
        )
        .await;

    match outcome {
        Ok(Execution::Untracked(response) | Execution::First(response)) => response,
        Ok(Execution::Replayed(stored)) => replayed_response(&stored),
        Err(err) => error_response(&err),
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Trailing slashes collapse so `/api/loans/` and `/api/loans` claim the
/// same key.
fn normalize_path(path: &str) -> String {
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        "/".to_string()
    }
}

/// Drain the downstream response body so it can be both recorded and
/// returned verbatim to the original caller. The same byte cap that bounds
/// request bodies bounds the capture; a response too large to record is
/// treated as an internal failure and the claim stays in-flight.
async fn buffer_response(response: Response, limit: usize) -> (Response, CapturedResponse) {
    let (parts, body) = response.into_parts();
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => {
            let captured = CapturedResponse {
                status: parts.status.as_u16(),
                body: bytes.to_vec(),
                content_type: header_string(&parts.headers, header::CONTENT_TYPE),
                location: header_string(&parts.headers, header::LOCATION),
            };
            (Response::from_parts(parts, Body::from(bytes)), captured)
        }
        Err(err) => {
            tracing::error!("downstream response body exceeded the capture cap or failed to buffer: {err}");
            let failure = CapturedResponse {
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                body: Vec::new(),
                content_type: None,
                location: None,
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR.into_response(),
                failure,
            )
        }
    }
}

fn header_string(headers: &axum::http::HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Rebuild the stored response byte-for-byte and mark it as a replay.
fn replayed_response(stored: &CapturedResponse) -> Response {
    let mut response = Response::new(Body::from(stored.body.clone()));
    *response.status_mut() =
        StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let headers = response.headers_mut();
    if let Some(value) = stored
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(value) = stored
        .location
        .as_deref()
        .and_then(|loc| HeaderValue::from_str(loc).ok())
    {
        headers.insert(header::LOCATION, value);
    }
    headers.insert(IDEMPOTENCY_REPLAYED, HeaderValue::from_static("true"));
    response
}

/// Map protocol errors to HTTP without leaking internal detail.
fn error_response(err: &IdempotencyError) -> Response {
    let (status, message) = match err {
        IdempotencyError::InvalidKeyLength { .. } | IdempotencyError::InvalidKeyChars => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        IdempotencyError::KeyConflict | IdempotencyError::InFlight => {
            (StatusCode::CONFLICT, err.to_string())
        }
        IdempotencyError::Store(store_err) => {
            tracing::error!("idempotency store failure: {store_err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "idempotency store unavailable".to_string(),
            )
        }
    };
    (status, Json(serde_json::json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn only_mutating_methods_are_tracked() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::HEAD));
        assert!(!is_mutating(&Method::OPTIONS));
    }

    #[test]
    fn trailing_slashes_collapse() {
        assert_eq!(normalize_path("/api/loans/"), "/api/loans");
        assert_eq!(normalize_path("/api/loans"), "/api/loans");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn replayed_response_carries_stored_fields_and_marker() {
        let stored = CapturedResponse {
            status: 201,
            body: b"{\"id\":\"L1\"}".to_vec(),
            content_type: Some("application/json".into()),
            location: Some("/api/loans/L1".into()),
        };
        let response = replayed_response(&stored);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers().get(IDEMPOTENCY_REPLAYED).unwrap(),
            "true"
        );
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/api/loans/L1"
        );
    }

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        assert_eq!(
            error_response(&IdempotencyError::InvalidKeyLength { min: 8, max: 128 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&IdempotencyError::KeyConflict).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(&IdempotencyError::InFlight).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            error_response(&IdempotencyError::Store(StoreError::Unavailable(
                "pool closed".into()
            )))
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn response_capture_is_bounded_like_request_bodies() {
        let small = Response::new(Body::from(vec![b'x'; 512]));
        let (response, captured) = buffer_response(small, 1024).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(captured.body.len(), 512);
        assert!(!captured.is_internal_failure());

        let oversized = Response::new(Body::from(vec![b'x'; 2048]));
        let (response, captured) = buffer_response(oversized, 1024).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(captured.body.is_empty());
        // >= 500 means the coordinator never completes the record.
        assert!(captured.is_internal_failure());
    }

    #[tokio::test]
    async fn store_errors_do_not_leak_internal_detail() {
        let response = error_response(&IdempotencyError::Store(StoreError::Unavailable(
            "sqlite file /var/lib/secret.db is locked".into(),
        )));
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("idempotency store unavailable"));
        assert!(!body.contains("secret.db"));
    }
}
