//! crates/boothnow_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A soundproof booth installed inside a partner store.
#[derive(Debug, Clone, PartialEq)]
pub struct Booth {
    pub id: Uuid,
    pub partner_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub is_available: bool,
    /// The pending reservation currently holding this booth, if any.
    pub held_by_reservation: Option<Uuid>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A hold placed on a booth by a user before a session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booth_id: Uuid,
    pub requested_minutes: i32,
    pub status: ReservationStatus,
    /// Processor reference for the pre-authorised charge, captured at session end.
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A status string read from storage that matches no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

/// One stretch of booth usage, from start to completion or cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booth_id: Uuid,
    pub reservation_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Billed minutes, fractional. Only set once the session is terminal.
    pub total_minutes: Option<f64>,
    pub total_cost: Option<f64>,
    pub status: SessionStatus,
}

/// The terminal values written when a session leaves the `Active` state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClosure {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub end_time: DateTime<Utc>,
    pub total_minutes: f64,
    pub total_cost: f64,
}

/// Usage figures a client believes it accrued. Never used for billing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportedUsage {
    pub total_minutes: Option<f64>,
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Captured { capture_id: String },
    NotRequired,
    Failed { reason: String },
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured { .. } => "captured",
            Self::NotRequired => "not_required",
            Self::Failed { .. } => "failed",
        }
    }
}

/// What a user is handed back when a session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub session: Session,
    pub billed_minutes: f64,
    pub amount: f64,
    pub currency: String,
    pub payment: PaymentOutcome,
    pub reported: Option<ReportedUsage>,
}

/// A point-in-time view of a session's running clock and cost.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// Whole minutes, floored, for display.
    pub elapsed_minutes: i64,
    pub elapsed_seconds: i64,
    pub current_cost: f64,
}
