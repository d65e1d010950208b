//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port for local
//! development and tests. All state sits behind one mutex, so each port call
//! is a single atomic step, the same guarantee the PostgreSQL adapter gets
//! from its conditional updates.

use async_trait::async_trait;
use boothnow_core::domain::{
    Booth, Reservation, ReservationStatus, Session, SessionClosure, SessionStatus,
};
use boothnow_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    booths: HashMap<Uuid, Booth>,
    reservations: HashMap<Uuid, Reservation>,
    sessions: HashMap<Uuid, Session>,
}

/// A `DatabaseService` backed by hash maps.
#[derive(Default)]
pub struct InMemoryDb {
    tables: Mutex<Tables>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a booth in the registry.
    pub async fn insert_booth(&self, booth: Booth) {
        self.tables.lock().await.booths.insert(booth.id, booth);
    }

    /// Registers a new, available booth and returns it.
    pub async fn seed_booth(
        &self,
        partner_name: &str,
        latitude: f64,
        longitude: f64,
        address: &str,
    ) -> Booth {
        let booth = Booth {
            id: Uuid::new_v4(),
            partner_name: partner_name.to_string(),
            latitude,
            longitude,
            address: address.to_string(),
            is_available: true,
            held_by_reservation: None,
            last_synced_at: Utc::now(),
        };
        self.insert_booth(booth.clone()).await;
        booth
    }

    /// Number of sessions ever recorded for a booth, in any status.
    pub async fn session_count_for_booth(&self, booth_id: Uuid) -> usize {
        self.tables
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.booth_id == booth_id)
            .count()
    }
}

fn booth_not_found(id: Uuid) -> PortError {
    PortError::NotFound(format!("Booth {} not found", id))
}

fn reservation_not_found(id: Uuid) -> PortError {
    PortError::NotFound(format!("Reservation {} not found", id))
}

#[async_trait]
impl DatabaseService for InMemoryDb {
    async fn get_booth(&self, booth_id: Uuid) -> PortResult<Booth> {
        self.tables
            .lock()
            .await
            .booths
            .get(&booth_id)
            .cloned()
            .ok_or_else(|| booth_not_found(booth_id))
    }

    async fn list_booths(&self) -> PortResult<Vec<Booth>> {
        let tables = self.tables.lock().await;
        let mut booths: Vec<Booth> = tables.booths.values().cloned().collect();
        booths.sort_by(|a, b| {
            (a.partner_name.as_str(), a.address.as_str())
                .cmp(&(b.partner_name.as_str(), b.address.as_str()))
        });
        Ok(booths)
    }

    async fn create_reservation(&self, reservation: Reservation) -> PortResult<Reservation> {
        let mut tables = self.tables.lock().await;
        let booth = tables
            .booths
            .get_mut(&reservation.booth_id)
            .ok_or_else(|| booth_not_found(reservation.booth_id))?;
        if !booth.is_available {
            return Err(PortError::Conflict(format!(
                "Booth {} is not available",
                booth.id
            )));
        }
        booth.is_available = false;
        booth.held_by_reservation = Some(reservation.id);
        booth.last_synced_at = Utc::now();

        tables
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        self.tables
            .lock()
            .await
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or_else(|| reservation_not_found(reservation_id))
    }

    async fn cancel_pending_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        let mut tables = self.tables.lock().await;
        let reservation = tables
            .reservations
            .get_mut(&reservation_id)
            .ok_or_else(|| reservation_not_found(reservation_id))?;
        if reservation.status != ReservationStatus::Pending {
            return Err(PortError::InvalidState(format!(
                "Reservation {} is not pending",
                reservation_id
            )));
        }
        reservation.status = ReservationStatus::Cancelled;
        let cancelled = reservation.clone();

        if let Some(booth) = tables.booths.get_mut(&cancelled.booth_id) {
            if booth.held_by_reservation == Some(reservation_id) {
                booth.is_available = true;
                booth.held_by_reservation = None;
                booth.last_synced_at = Utc::now();
            }
        }
        Ok(cancelled)
    }

    async fn list_pending_reservations_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Reservation>> {
        let tables = self.tables.lock().await;
        let mut stale: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Pending && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        Ok(stale)
    }

    async fn begin_session(&self, session: Session) -> PortResult<Session> {
        let mut tables = self.tables.lock().await;
        let Tables {
            booths,
            reservations,
            sessions,
        } = &mut *tables;

        let booth = booths
            .get_mut(&session.booth_id)
            .ok_or_else(|| booth_not_found(session.booth_id))?;
        let claimable =
            booth.is_available || booth.held_by_reservation == Some(session.reservation_id);
        if !claimable {
            return Err(PortError::Conflict(format!(
                "Booth {} is not available",
                booth.id
            )));
        }

        let reservation = reservations
            .get_mut(&session.reservation_id)
            .ok_or_else(|| reservation_not_found(session.reservation_id))?;
        if reservation.status != ReservationStatus::Pending {
            return Err(PortError::InvalidState(format!(
                "Reservation {} is not pending",
                reservation.id
            )));
        }

        booth.is_available = false;
        booth.held_by_reservation = None;
        booth.last_synced_at = Utc::now();
        reservation.status = ReservationStatus::Confirmed;
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.tables
            .lock()
            .await
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn list_active_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut active: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SessionStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(active)
    }

    async fn list_active_sessions_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        let mut overdue: Vec<Session> = tables
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active && s.start_time < cutoff)
            .cloned()
            .collect();
        overdue.sort_by_key(|s| s.start_time);
        Ok(overdue)
    }

    async fn close_session(&self, closure: SessionClosure) -> PortResult<Session> {
        let mut tables = self.tables.lock().await;
        let Tables {
            booths,
            reservations,
            sessions,
        } = &mut *tables;

        let session = sessions.get_mut(&closure.session_id).ok_or_else(|| {
            PortError::NotFound(format!("Session {} not found", closure.session_id))
        })?;
        if session.status != SessionStatus::Active {
            return Err(PortError::InvalidState(format!(
                "Session {} is not active",
                closure.session_id
            )));
        }
        session.status = closure.status;
        session.end_time = Some(closure.end_time);
        session.total_minutes = Some(closure.total_minutes);
        session.total_cost = Some(closure.total_cost);

        if let Some(reservation) = reservations.get_mut(&session.reservation_id) {
            reservation.status = match closure.status {
                SessionStatus::Cancelled => ReservationStatus::Cancelled,
                _ => ReservationStatus::Completed,
            };
        }
        if let Some(booth) = booths.get_mut(&session.booth_id) {
            if !booth.is_available && booth.held_by_reservation.is_none() {
                booth.is_available = true;
                booth.last_synced_at = Utc::now();
            }
        }
        Ok(session.clone())
    }
}
