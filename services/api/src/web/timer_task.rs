//! services/api/src/web/timer_task.rs
//!
//! Handles one client timer tick: re-reads the session through the engine,
//! recomputes elapsed time and cost from the server clock, and publishes the
//! result on the requesting user's channel only.

use crate::web::{hub::user_channel, protocol::ServerMessage, state::AppState};
use boothnow_core::{SessionStatus, TimerSnapshot};
use tracing::{debug, warn};
use uuid::Uuid;

impl From<&TimerSnapshot> for ServerMessage {
    fn from(snapshot: &TimerSnapshot) -> Self {
        ServerMessage::TimerUpdate {
            session_id: snapshot.session_id,
            elapsed_minutes: snapshot.elapsed_minutes,
            current_cost: snapshot.current_cost,
            status: snapshot.status.to_string(),
        }
    }
}

/// Publishes a `timer_update` for an active session.
///
/// Lookup failures and terminal sessions are logged and skipped; the client's
/// own timer keeps running until the next successful tick.
/// Returns whether an update was published.
pub async fn publish_timer(app_state: &AppState, session_id: Uuid, user_id: Uuid) -> bool {
    match app_state.engine.timer(session_id, user_id).await {
        Ok(snapshot) if snapshot.status == SessionStatus::Active => {
            let delivered = app_state
                .hub
                .send_to(&user_channel(user_id), ServerMessage::from(&snapshot))
                .await;
            debug!(
                "Timer update for session {}: {} min, {} receivers",
                session_id, snapshot.elapsed_minutes, delivered
            );
            true
        }
        Ok(snapshot) => {
            debug!(
                "Timer update skipped, session {} is {}",
                session_id, snapshot.status
            );
            false
        }
        Err(e) => {
            warn!("Timer update skipped for session {}: {}", session_id, e);
            false
        }
    }
}
