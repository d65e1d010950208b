//! crates/boothnow_core/src/engine.rs
//!
//! The session state machine. Owns reservation holds, the `Active` →
//! `Completed`/`Cancelled` transitions, the authoritative cost formula and
//! the overdue-session sweep.
//!
//! The engine never locks anything itself. Every availability flip is a
//! conditional update inside the `DatabaseService`, so two concurrent starts
//! on one booth resolve to exactly one winner.

use crate::billing::{self, Elapsed, Rates};
use crate::domain::{
    PaymentOutcome, Receipt, ReportedUsage, Reservation, ReservationStatus, Session,
    SessionClosure, SessionStatus, TimerSnapshot,
};
use crate::ports::{Clock, DatabaseService, EventPublisher, PaymentService, PortError, SessionEvent};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

//=========================================================================================
// Errors
//=========================================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    /// The backing store or the payment processor failed.
    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl From<PortError> for EngineError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(m) => Self::NotFound(m),
            PortError::Conflict(m) => Self::Conflict(m),
            PortError::InvalidState(m) => Self::InvalidState(m),
            PortError::Unexpected(m) => Self::Upstream(m),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

fn occupied(booth_id: Uuid) -> EngineError {
    EngineError::Conflict(format!("Booth {} is currently occupied", booth_id))
}

//=========================================================================================
// Policy
//=========================================================================================

/// Deployment-time knobs for billing and the lifecycle watchdog.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub rates: Rates,
    /// Sessions older than this are auto-completed and billed for exactly this long.
    pub max_session: Duration,
    /// Pending reservations older than this are cancelled and their booth released.
    pub reservation_hold: Duration,
    /// An active session may be cancelled free of charge within this window.
    pub cancel_grace: Duration,
}

impl SessionPolicy {
    pub fn max_session_minutes(&self) -> i64 {
        self.max_session.num_minutes()
    }
}

/// What one watchdog pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_expired: usize,
    pub reservations_expired: usize,
}

//=========================================================================================
// The Engine
//=========================================================================================

pub struct SessionEngine {
    db: Arc<dyn DatabaseService>,
    payments: Arc<dyn PaymentService>,
    events: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
}

impl SessionEngine {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        payments: Arc<dyn PaymentService>,
        events: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            db,
            payments,
            events,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    // --- Reservation Manager ---

    /// Places a hold on an available booth for `user_id`.
    pub async fn reserve(
        &self,
        user_id: Uuid,
        booth_id: Uuid,
        requested_minutes: i32,
        payment_intent_id: Option<String>,
    ) -> EngineResult<Reservation> {
        let max = self.policy.max_session_minutes();
        if requested_minutes < 1 || i64::from(requested_minutes) > max {
            return Err(EngineError::Validation(format!(
                "requested_minutes must be between 1 and {}",
                max
            )));
        }
        if matches!(payment_intent_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(EngineError::Validation(
                "payment_intent_id must not be empty".to_string(),
            ));
        }

        self.db.get_booth(booth_id).await?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            user_id,
            booth_id,
            requested_minutes,
            status: ReservationStatus::Pending,
            payment_intent_id,
            created_at: self.clock.now(),
        };

        let reservation = match self.db.create_reservation(reservation).await {
            Ok(r) => r,
            Err(PortError::Conflict(_)) => return Err(occupied(booth_id)),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Reservation {} holds booth {} for user {}",
            reservation.id, booth_id, user_id
        );

        self.events
            .publish(SessionEvent::BoothAvailabilityChanged {
                booth_id,
                available: false,
            })
            .await;
        Ok(reservation)
    }

    /// Cancels a reservation that has not been consumed by a session yet.
    pub async fn cancel_reservation(
        &self,
        user_id: Uuid,
        reservation_id: Uuid,
    ) -> EngineResult<Reservation> {
        let reservation = self.owned_reservation(reservation_id, user_id).await?;
        if reservation.status != ReservationStatus::Pending {
            return Err(EngineError::InvalidState(format!(
                "Reservation {} is already {}",
                reservation_id, reservation.status
            )));
        }

        let cancelled = self.db.cancel_pending_reservation(reservation_id).await?;
        info!("Reservation {} cancelled by user {}", reservation_id, user_id);
        self.release_hold(&cancelled).await;
        Ok(cancelled)
    }

    // --- Session lifecycle ---

    /// Starts an active session on `booth_id`, consuming `reservation_id`.
    pub async fn start(
        &self,
        booth_id: Uuid,
        reservation_id: Uuid,
        user_id: Uuid,
    ) -> EngineResult<Session> {
        self.db.get_booth(booth_id).await?;
        let reservation = self.owned_reservation(reservation_id, user_id).await?;

        if reservation.booth_id != booth_id {
            return Err(EngineError::Validation(format!(
                "Reservation {} is for a different booth",
                reservation_id
            )));
        }
        match reservation.status {
            ReservationStatus::Pending => {}
            // A confirmed reservation means a session already holds this booth.
            ReservationStatus::Confirmed => {
                warn!(
                    "Start refused, reservation {} already started a session on booth {}",
                    reservation_id, booth_id
                );
                return Err(occupied(booth_id));
            }
            status => {
                return Err(EngineError::InvalidState(format!(
                    "Reservation {} is already {}",
                    reservation_id, status
                )));
            }
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            booth_id,
            reservation_id,
            start_time: self.clock.now(),
            end_time: None,
            total_minutes: None,
            total_cost: None,
            status: SessionStatus::Active,
        };

        match self.db.begin_session(session).await {
            Ok(session) => {
                info!(
                    "Session {} started on booth {} for user {}",
                    session.id, booth_id, user_id
                );
                Ok(session)
            }
            Err(PortError::Conflict(_)) => {
                warn!("Start refused, booth {} is occupied", booth_id);
                Err(occupied(booth_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Completes an active session, billing from the server's own clock.
    ///
    /// `reported` is whatever the client thinks it accrued; it is logged when
    /// it disagrees and echoed on the receipt, but never charged.
    pub async fn end(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        reported: Option<ReportedUsage>,
    ) -> EngineResult<Receipt> {
        let session = self.owned_session(session_id, user_id).await?;
        ensure_active(&session)?;

        let (end_time, elapsed) = self.billable_until(&session, self.clock.now());
        self.complete(session, end_time, elapsed, reported).await
    }

    /// Cancels an active session free of charge, within the grace window.
    pub async fn cancel(&self, session_id: Uuid, user_id: Uuid) -> EngineResult<Session> {
        let session = self.owned_session(session_id, user_id).await?;
        ensure_active(&session)?;

        let now = self.clock.now();
        let elapsed = billing::compute_elapsed(session.start_time, now);
        if elapsed > Elapsed::from_duration(self.policy.cancel_grace) {
            return Err(EngineError::InvalidState(format!(
                "Session {} is past the cancellation window and must be ended",
                session_id
            )));
        }

        let closed = self
            .db
            .close_session(SessionClosure {
                session_id,
                status: SessionStatus::Cancelled,
                end_time: now,
                total_minutes: billing::round_minutes(elapsed.minutes()),
                total_cost: 0.0,
            })
            .await?;
        info!("Session {} cancelled by user {}", session_id, user_id);

        self.events
            .publish(SessionEvent::BoothAvailabilityChanged {
                booth_id: closed.booth_id,
                available: true,
            })
            .await;
        if let Ok(reservation) = self.db.get_reservation(closed.reservation_id).await {
            self.void_quietly(&reservation).await;
        }
        Ok(closed)
    }

    /// Server-authoritative elapsed time and running cost for a session.
    pub async fn timer(&self, session_id: Uuid, user_id: Uuid) -> EngineResult<TimerSnapshot> {
        let session = self.owned_session(session_id, user_id).await?;
        Ok(self.snapshot(&session, self.clock.now()))
    }

    /// Timer values for `session` as of `as_of`. Terminal sessions report
    /// their stored totals.
    pub fn snapshot(&self, session: &Session, as_of: DateTime<Utc>) -> TimerSnapshot {
        match session.status {
            SessionStatus::Active => {
                let (_, elapsed) = self.billable_until(session, as_of);
                TimerSnapshot {
                    session_id: session.id,
                    status: session.status,
                    elapsed_minutes: elapsed.whole_minutes(),
                    elapsed_seconds: elapsed.whole_seconds(),
                    current_cost: billing::round_currency(self.policy.rates.cost_of(elapsed)),
                }
            }
            _ => {
                let minutes = session.total_minutes.unwrap_or(0.0);
                TimerSnapshot {
                    session_id: session.id,
                    status: session.status,
                    elapsed_minutes: minutes.floor() as i64,
                    elapsed_seconds: (minutes * 60.0).floor() as i64,
                    current_cost: session.total_cost.unwrap_or(0.0),
                }
            }
        }
    }

    pub async fn active_sessions(&self, user_id: Uuid) -> EngineResult<Vec<Session>> {
        Ok(self.db.list_active_sessions_for_user(user_id).await?)
    }

    // --- Watchdog ---

    /// Auto-completes sessions past the maximum duration and expires stale holds.
    pub async fn expire_overdue(&self) -> EngineResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let overdue = self
            .db
            .list_active_sessions_started_before(now - self.policy.max_session)
            .await?;
        for session in overdue {
            let session_id = session.id;
            let (end_time, capped) = self.billable_until(&session, now);
            match self.complete(session, end_time, capped, None).await {
                Ok(receipt) => {
                    warn!(
                        "Session {} exceeded the maximum duration and was auto-completed at {:.2} {}",
                        session_id, receipt.amount, receipt.currency
                    );
                    report.sessions_expired += 1;
                }
                Err(EngineError::InvalidState(_)) => {
                    debug!("Session {} ended concurrently with the sweep", session_id);
                }
                Err(e) => error!("Failed to auto-complete session {}: {}", session_id, e),
            }
        }

        let stale = self
            .db
            .list_pending_reservations_created_before(now - self.policy.reservation_hold)
            .await?;
        for reservation in stale {
            match self.db.cancel_pending_reservation(reservation.id).await {
                Ok(cancelled) => {
                    info!("Reservation {} expired unconsumed", cancelled.id);
                    self.release_hold(&cancelled).await;
                    report.reservations_expired += 1;
                }
                Err(PortError::InvalidState(_)) => {
                    debug!("Reservation {} was consumed during the sweep", reservation.id);
                }
                Err(e) => error!("Failed to expire reservation {}: {}", reservation.id, e),
            }
        }

        Ok(report)
    }

    //=====================================================================================
    // Internals
    //=====================================================================================

    /// End time and billable span of `session` as of `now`, capped at the
    /// maximum session duration.
    fn billable_until(&self, session: &Session, now: DateTime<Utc>) -> (DateTime<Utc>, Elapsed) {
        let cutoff = session.start_time + self.policy.max_session;
        if now > cutoff {
            (cutoff, Elapsed::from_duration(self.policy.max_session))
        } else {
            (now, billing::compute_elapsed(session.start_time, now))
        }
    }

    async fn owned_session(&self, session_id: Uuid, user_id: Uuid) -> EngineResult<Session> {
        let session = self.db.get_session(session_id).await?;
        if session.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "Session {} not found",
                session_id
            )));
        }
        Ok(session)
    }

    async fn owned_reservation(
        &self,
        reservation_id: Uuid,
        user_id: Uuid,
    ) -> EngineResult<Reservation> {
        let reservation = self.db.get_reservation(reservation_id).await?;
        if reservation.user_id != user_id {
            return Err(EngineError::NotFound(format!(
                "Reservation {} not found",
                reservation_id
            )));
        }
        Ok(reservation)
    }

    async fn complete(
        &self,
        session: Session,
        end_time: DateTime<Utc>,
        elapsed: Elapsed,
        reported: Option<ReportedUsage>,
    ) -> EngineResult<Receipt> {
        let amount = billing::round_currency(self.policy.rates.cost_of(elapsed));
        let billed_minutes = billing::round_minutes(elapsed.minutes());

        if let Some(hint) = reported {
            log_discrepancy(session.id, &hint, billed_minutes, amount);
        }

        let closed = self
            .db
            .close_session(SessionClosure {
                session_id: session.id,
                status: SessionStatus::Completed,
                end_time,
                total_minutes: billed_minutes,
                total_cost: amount,
            })
            .await?;
        info!(
            "Session {} completed: {:.2} min, {:.2} {}",
            closed.id, billed_minutes, amount, self.policy.rates.currency
        );

        self.events
            .publish(SessionEvent::BoothAvailabilityChanged {
                booth_id: closed.booth_id,
                available: true,
            })
            .await;
        self.events
            .publish(SessionEvent::SessionEnded {
                session_id: closed.id,
                user_id: closed.user_id,
                booth_id: closed.booth_id,
                total_cost: amount,
            })
            .await;

        let payment = self.capture(&closed, amount).await;
        Ok(Receipt {
            session: closed,
            billed_minutes,
            amount,
            currency: self.policy.rates.currency.clone(),
            payment,
            reported,
        })
    }

    /// A failed capture never rolls back a completed session.
    async fn capture(&self, session: &Session, amount: f64) -> PaymentOutcome {
        let reservation = match self.db.get_reservation(session.reservation_id).await {
            Ok(r) => r,
            Err(e) => {
                error!(
                    "Could not load reservation {} to capture payment: {}",
                    session.reservation_id, e
                );
                return PaymentOutcome::Failed {
                    reason: "reservation unavailable".to_string(),
                };
            }
        };
        let Some(intent) = reservation.payment_intent_id.as_deref() else {
            return PaymentOutcome::NotRequired;
        };

        match self
            .payments
            .capture(
                intent,
                billing::to_minor_units(amount),
                &self.policy.rates.currency,
            )
            .await
        {
            Ok(capture) => PaymentOutcome::Captured {
                capture_id: capture.capture_id,
            },
            Err(e) => {
                error!("Payment capture failed for session {}: {}", session.id, e);
                PaymentOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn release_hold(&self, reservation: &Reservation) {
        self.events
            .publish(SessionEvent::BoothAvailabilityChanged {
                booth_id: reservation.booth_id,
                available: true,
            })
            .await;
        self.void_quietly(reservation).await;
    }

    async fn void_quietly(&self, reservation: &Reservation) {
        if let Some(intent) = reservation.payment_intent_id.as_deref() {
            if let Err(e) = self.payments.void(intent).await {
                error!(
                    "Failed to void payment intent for reservation {}: {}",
                    reservation.id, e
                );
            }
        }
    }
}

fn ensure_active(session: &Session) -> EngineResult<()> {
    if session.status.is_terminal() {
        return Err(EngineError::InvalidState(format!(
            "Session {} is already {}",
            session.id, session.status
        )));
    }
    Ok(())
}

fn log_discrepancy(session_id: Uuid, hint: &ReportedUsage, minutes: f64, amount: f64) {
    let minutes_off = hint
        .total_minutes
        .is_some_and(|reported| (reported - minutes).abs() >= 1.0);
    let cost_off = hint
        .total_cost
        .is_some_and(|reported| (reported - amount).abs() >= 0.01);
    if minutes_off || cost_off {
        warn!(
            "Session {} client reported {:?} min / {:?}, billing {:.2} min / {:.2}",
            session_id, hint.total_minutes, hint.total_cost, minutes, amount
        );
    }
}
