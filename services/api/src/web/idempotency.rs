//! services/api/src/web/idempotency.rs
//!
//! Replay protection for `POST /sessions/start` and `POST /sessions/{id}/end`.
//!
//! Clients may send an `Idempotency-Key` header. The first request with a
//! given key runs and its successful response is cached for 24 hours, scoped
//! to the calling user and the route. Retries get the cached response back;
//! concurrent duplicates wait on the first one instead of running twice.
//! Failures are not cached, so a retry after an error runs again.

use axum::http::{HeaderMap, StatusCode};
use boothnow_core::EngineError;
use moka::future::Cache;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

const MAX_KEY_LEN: usize = 255;

/// A response worth replaying.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub body: Value,
}

#[derive(Clone)]
pub struct IdempotencyCache {
    responses: Cache<String, StoredResponse>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            responses: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Runs `op` once per `(user, route, key)`; with no key it always runs.
    pub async fn run<F>(
        &self,
        key: Option<&str>,
        user_id: Uuid,
        route: &str,
        op: F,
    ) -> Result<StoredResponse, EngineError>
    where
        F: Future<Output = Result<StoredResponse, EngineError>>,
    {
        let Some(key) = key else {
            return op.await;
        };
        let scoped = format!("{}:{}:{}", user_id, route, key);
        self.responses
            .try_get_with(scoped, op)
            .await
            .map_err(|e| (*e).clone())
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60), 100_000)
    }
}

/// Reads and validates the `Idempotency-Key` header.
pub fn key_from_headers(headers: &HeaderMap) -> Result<Option<String>, EngineError> {
    let Some(raw) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = raw
        .to_str()
        .map_err(|_| EngineError::Validation("Idempotency-Key must be ASCII".to_string()))?
        .trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(EngineError::Validation(format!(
            "Idempotency-Key must be 1 to {} characters",
            MAX_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}
