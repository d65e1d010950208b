//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::ApiError,
    web::{state::AppState, ws_handler::WS_PATH},
};

/// Middleware that validates the caller's access token and extracts the user_id.
///
/// The token comes from `Authorization: Bearer ...`, or from a `token` query
/// parameter on the WebSocket upgrade, where browsers cannot set headers.
/// If valid, inserts the user_id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req).or_else(|| query_token(&req)) else {
        return ApiError::Unauthorized("Missing access token".to_string()).into_response();
    };

    let user_id = match state.tokens.verify(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!("Rejected request to {}: {}", req.uri().path(), e);
            return e.into_response();
        }
    };

    req.extensions_mut().insert(user_id);
    next.run(req).await
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Only the WebSocket upgrade may carry its token in the query string.
fn query_token(req: &Request) -> Option<String> {
    if req.uri().path() != WS_PATH {
        return None;
    }
    req.uri().query()?.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    })
}
