//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the mobile/web clients and
//! the API server for live session timers and booth availability.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribes to the user's own channel (timer ticks, session endings).
    JoinUserRoom { user_id: Uuid },

    /// Subscribes to availability flips for one booth, e.g. while it is shown on a map.
    JoinBoothRoom { booth_id: Uuid },

    /// Asks the server to recompute the session clock. Sent about once a second.
    SessionTimerUpdate { session_id: Uuid, user_id: Uuid },

    /// Ends the session from the socket instead of the REST endpoint.
    SessionEnd { session_id: Uuid, user_id: Uuid },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms a room subscription.
    Joined { room: String },

    TimerUpdate {
        session_id: Uuid,
        #[serde(rename = "elapsedMinutes")]
        elapsed_minutes: i64,
        #[serde(rename = "currentCost")]
        current_cost: f64,
        status: String,
    },

    BoothAvailable {
        #[serde(rename = "boothId")]
        booth_id: Uuid,
        availability: bool,
    },

    BoothUnavailable {
        #[serde(rename = "boothId")]
        booth_id: Uuid,
        availability: bool,
    },

    SessionEnded {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
        message: String,
    },

    /// Reports a non-fatal problem with the last client message.
    Error { message: String },
}

impl ServerMessage {
    pub fn availability(booth_id: Uuid, available: bool) -> Self {
        if available {
            Self::BoothAvailable {
                booth_id,
                availability: true,
            }
        } else {
            Self::BoothUnavailable {
                booth_id,
                availability: false,
            }
        }
    }
}
