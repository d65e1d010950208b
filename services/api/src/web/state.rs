//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection socket state.

use crate::web::{auth::TokenVerifier, hub::BroadcastHub, idempotency::IdempotencyCache};
use boothnow_core::{DatabaseService, SessionEngine};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    /// Read side of the booth registry.
    pub db: Arc<dyn DatabaseService>,
    pub hub: Arc<BroadcastHub>,
    pub tokens: TokenVerifier,
    pub idempotency: IdempotencyCache,
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single WebSocket connection: which rooms it joined and the
/// forwarding task for each.
pub struct ConnectionState {
    pub user_id: Uuid,
    rooms: HashSet<String>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ConnectionState {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            rooms: HashSet::new(),
            forwarders: Vec::new(),
        }
    }

    /// Records a room; returns `false` if the connection was already in it.
    pub fn join(&mut self, room: &str) -> bool {
        self.rooms.insert(room.to_string())
    }

    pub fn is_in(&self, room: &str) -> bool {
        self.rooms.contains(room)
    }

    pub fn track(&mut self, forwarder: JoinHandle<()>) {
        self.forwarders.push(forwarder);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Stops every forwarder. Their receivers drop with them.
    pub fn shutdown(&mut self) {
        for handle in self.forwarders.drain(..) {
            handle.abort();
        }
        self.rooms.clear();
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joining_a_room_twice_reports_the_duplicate() {
        let mut conn = ConnectionState::new(Uuid::new_v4());
        assert!(conn.join("global"));
        assert!(!conn.join("global"));
        assert!(conn.is_in("global"));
        assert_eq!(conn.room_count(), 1);

        conn.shutdown();
        assert_eq!(conn.room_count(), 0);
    }
}
