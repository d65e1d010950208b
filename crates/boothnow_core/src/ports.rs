//! crates/boothnow_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, keeping the
//! session engine independent of the database, the payment processor and the
//! socket layer.

use crate::domain::{Booth, Reservation, Session, SessionClosure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A conditional update matched no row because someone else got there first.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The row exists but is not in the state the operation requires.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Persistent storage for booths, reservations and sessions.
///
/// Every method that flips a booth's availability must do so with a
/// compare-and-set on the prior value, and must commit the flip together with
/// the reservation/session write it belongs to.
#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Booth Registry ---
    async fn get_booth(&self, booth_id: Uuid) -> PortResult<Booth>;

    async fn list_booths(&self) -> PortResult<Vec<Booth>>;

    // --- Reservations ---

    /// Claims the booth (`available → held by reservation`) and inserts the
    /// reservation. `Conflict` if the booth is not available.
    async fn create_reservation(&self, reservation: Reservation) -> PortResult<Reservation>;

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation>;

    /// Moves a pending reservation to cancelled and releases its hold.
    /// `InvalidState` if it is no longer pending.
    async fn cancel_pending_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation>;

    async fn list_pending_reservations_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Reservation>>;

    // --- Sessions ---

    /// Claims the booth (available, or held by `session.reservation_id`),
    /// confirms the pending reservation and inserts the active session.
    /// `Conflict` if the claim fails, `InvalidState` if the reservation is not pending.
    async fn begin_session(&self, session: Session) -> PortResult<Session>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    async fn list_active_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>>;

    async fn list_active_sessions_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Session>>;

    /// Writes the terminal values for a session that is still active, settles
    /// its reservation and releases the booth. `InvalidState` if the session
    /// already left `Active`.
    async fn close_session(&self, closure: SessionClosure) -> PortResult<Session>;
}

/// A confirmed capture at the payment processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCapture {
    pub capture_id: String,
}

/// The external processor holding users' pre-authorised charges.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Captures `amount_minor` (cents) against a pre-authorised intent.
    async fn capture(
        &self,
        payment_intent_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> PortResult<PaymentCapture>;

    /// Releases a pre-authorisation without charging.
    async fn void(&self, payment_intent_id: &str) -> PortResult<()>;
}

/// State changes the engine announces to real-time subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    BoothAvailabilityChanged {
        booth_id: Uuid,
        available: bool,
    },
    SessionEnded {
        session_id: Uuid,
        user_id: Uuid,
        booth_id: Uuid,
        total_cost: f64,
    },
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Fire-and-forget delivery; a publisher with no listeners drops the event.
    async fn publish(&self, event: SessionEvent);
}

/// Source of "now" for the engine, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
