pub mod auth;
pub mod hub;
pub mod idempotency;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod timer_task;
pub mod ws_handler;

// Re-export the main handlers to make them easily accessible
// to the binary that builds the web server router.
pub use middleware::require_auth;
pub use rest::{
    cancel_reservation_handler, cancel_session_handler, create_reservation_handler,
    end_session_handler, get_booth_handler, health_handler, list_booths_handler,
    list_sessions_handler, session_timer_handler, start_session_handler,
};
pub use ws_handler::ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

/// Builds every API route. Everything except `/health` requires a valid token.
pub fn router(app_state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/health", get(health_handler));

    let protected_routes = Router::new()
        .route("/booths", get(list_booths_handler))
        .route("/booths/{id}", get(get_booth_handler))
        .route("/reservations", post(create_reservation_handler))
        .route("/reservations/{id}/cancel", post(cancel_reservation_handler))
        .route("/sessions", get(list_sessions_handler))
        .route("/sessions/start", post(start_session_handler))
        .route("/sessions/{id}/end", post(end_session_handler))
        .route("/sessions/{id}/cancel", post(cancel_session_handler))
        .route("/sessions/{id}/timer", get(session_timer_handler))
        .route(ws_handler::WS_PATH, get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
