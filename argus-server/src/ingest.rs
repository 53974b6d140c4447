//! Ingestion endpoint: `POST /api/logs/ingest`.
//!
//! Verifies the shared secret in constant time, decodes the batch,
//! commits synchronously to the in-memory store, and answers with the
//! accepted count before backup replication is even scheduled.

use crate::api::AppState;
use crate::backup::replicate_chunked;
use argus_core::{IngestReceipt, LogBatch};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use tracing::{info, warn};

pub async fn ingest_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<LogBatch>, JsonRejection>,
) -> impl IntoResponse {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(presented.as_bytes(), state.api_key.as_bytes()) {
        warn!("Ingest rejected: bad API key");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid API key"})),
        )
            .into_response();
    }

    let Json(batch) = match payload {
        Ok(batch) => batch,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Ingest rejected: undecodable batch");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": rejection.body_text()})),
            )
                .into_response();
        }
    };

    let received = state.store.commit_batch(&batch);
    info!(device = %batch.device_id, received, "Batch ingested");

    // Best-effort replication happens after the response; the ingest
    // latency never includes backup-store I/O.
    let backup = state.backup.clone();
    tokio::spawn(async move {
        replicate_chunked(backup.as_ref(), batch).await;
    });

    (StatusCode::OK, Json(IngestReceipt { received })).into_response()
}

/// Compare secrets without short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(!constant_time_eq(b"", b"x"));
        assert!(constant_time_eq(b"", b""));
    }
}
