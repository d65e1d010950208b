//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Availability flips are single conditional `UPDATE`s; a zero row count is
//! how a lost race is detected. Multi-row transitions run in one transaction.

use async_trait::async_trait;
use boothnow_core::domain::{
    Booth, Reservation, ReservationStatus, Session, SessionClosure, SessionStatus,
};
use boothnow_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    async fn begin(&self) -> PortResult<Transaction<'static, Postgres>> {
        self.pool.begin().await.map_err(unexpected)
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: &str, id: Uuid) -> impl FnOnce(sqlx::Error) -> PortError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        _ => unexpected(e),
    }
}

/// The partial unique index on active sessions turns a racing insert into 23505.
fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const BOOTH_COLUMNS: &str =
    "id, partner_name, latitude, longitude, address, is_available, held_by_reservation, last_synced_at";
const RESERVATION_COLUMNS: &str =
    "id, user_id, booth_id, requested_minutes, status, payment_intent_id, created_at";
const SESSION_COLUMNS: &str =
    "id, user_id, booth_id, reservation_id, start_time, end_time, total_minutes, total_cost, status";

#[derive(FromRow)]
struct BoothRecord {
    id: Uuid,
    partner_name: String,
    latitude: f64,
    longitude: f64,
    address: String,
    is_available: bool,
    held_by_reservation: Option<Uuid>,
    last_synced_at: DateTime<Utc>,
}
impl BoothRecord {
    fn to_domain(self) -> Booth {
        Booth {
            id: self.id,
            partner_name: self.partner_name,
            latitude: self.latitude,
            longitude: self.longitude,
            address: self.address,
            is_available: self.is_available,
            held_by_reservation: self.held_by_reservation,
            last_synced_at: self.last_synced_at,
        }
    }
}

#[derive(FromRow)]
struct ReservationRecord {
    id: Uuid,
    user_id: Uuid,
    booth_id: Uuid,
    requested_minutes: i32,
    status: String,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
}
impl ReservationRecord {
    fn to_domain(self) -> PortResult<Reservation> {
        let status = self
            .status
            .parse::<ReservationStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Reservation {
            id: self.id,
            user_id: self.user_id,
            booth_id: self.booth_id,
            requested_minutes: self.requested_minutes,
            status,
            payment_intent_id: self.payment_intent_id,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    user_id: Uuid,
    booth_id: Uuid,
    reservation_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    total_minutes: Option<f64>,
    total_cost: Option<f64>,
    status: String,
}
impl SessionRecord {
    fn to_domain(self) -> PortResult<Session> {
        let status = self
            .status
            .parse::<SessionStatus>()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Session {
            id: self.id,
            user_id: self.user_id,
            booth_id: self.booth_id,
            reservation_id: self.reservation_id,
            start_time: self.start_time,
            end_time: self.end_time,
            total_minutes: self.total_minutes,
            total_cost: self.total_cost,
            status,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_booth(&self, booth_id: Uuid) -> PortResult<Booth> {
        let record = sqlx::query_as::<_, BoothRecord>(&format!(
            "SELECT {} FROM booths WHERE id = $1",
            BOOTH_COLUMNS
        ))
        .bind(booth_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected("Booth", booth_id))?;
        Ok(record.to_domain())
    }

    async fn list_booths(&self) -> PortResult<Vec<Booth>> {
        let records = sqlx::query_as::<_, BoothRecord>(&format!(
            "SELECT {} FROM booths ORDER BY partner_name, address",
            BOOTH_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn create_reservation(&self, reservation: Reservation) -> PortResult<Reservation> {
        let mut tx = self.begin().await?;

        let claimed = sqlx::query(
            "UPDATE booths SET is_available = FALSE, held_by_reservation = $2, last_synced_at = NOW() \
             WHERE id = $1 AND is_available = TRUE",
        )
        .bind(reservation.booth_id)
        .bind(reservation.id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if claimed.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "Booth {} is not available",
                reservation.booth_id
            )));
        }

        let record = sqlx::query_as::<_, ReservationRecord>(&format!(
            "INSERT INTO reservations (id, user_id, booth_id, requested_minutes, status, payment_intent_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(reservation.id)
        .bind(reservation.user_id)
        .bind(reservation.booth_id)
        .bind(reservation.requested_minutes)
        .bind(reservation.status.as_str())
        .bind(&reservation.payment_intent_id)
        .bind(reservation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        sqlx::query_as::<_, ReservationRecord>(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected("Reservation", reservation_id))?
        .to_domain()
    }

    async fn cancel_pending_reservation(&self, reservation_id: Uuid) -> PortResult<Reservation> {
        let mut tx = self.begin().await?;

        let record = sqlx::query_as::<_, ReservationRecord>(&format!(
            "UPDATE reservations SET status = 'cancelled' WHERE id = $1 AND status = 'pending' RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::InvalidState(format!("Reservation {} is not pending", reservation_id))
        })?;

        sqlx::query(
            "UPDATE booths SET is_available = TRUE, held_by_reservation = NULL, last_synced_at = NOW() \
             WHERE id = $1 AND held_by_reservation = $2",
        )
        .bind(record.booth_id)
        .bind(reservation_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn list_pending_reservations_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Reservation>> {
        let records = sqlx::query_as::<_, ReservationRecord>(&format!(
            "SELECT {} FROM reservations WHERE status = 'pending' AND created_at < $1 ORDER BY created_at",
            RESERVATION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn begin_session(&self, session: Session) -> PortResult<Session> {
        let mut tx = self.begin().await?;

        let claimed = sqlx::query(
            "UPDATE booths SET is_available = FALSE, held_by_reservation = NULL, last_synced_at = NOW() \
             WHERE id = $1 AND (is_available = TRUE OR held_by_reservation = $2)",
        )
        .bind(session.booth_id)
        .bind(session.reservation_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if claimed.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "Booth {} is not available",
                session.booth_id
            )));
        }

        let confirmed = sqlx::query(
            "UPDATE reservations SET status = 'confirmed' WHERE id = $1 AND status = 'pending'",
        )
        .bind(session.reservation_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if confirmed.rows_affected() == 0 {
            return Err(PortError::InvalidState(format!(
                "Reservation {} is not pending",
                session.reservation_id
            )));
        }

        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO sessions (id, user_id, booth_id, reservation_id, start_time, status) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.booth_id)
        .bind(session.reservation_id)
        .bind(session.start_time)
        .bind(session.status.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!(
                    "Booth {} already has an active session",
                    session.booth_id
                ))
            } else {
                unexpected(e)
            }
        })?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected("Session", session_id))?
        .to_domain()
    }

    async fn list_active_sessions_for_user(&self, user_id: Uuid) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE user_id = $1 AND status = 'active' ORDER BY start_time DESC",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_active_sessions_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM sessions WHERE status = 'active' AND start_time < $1 ORDER BY start_time",
            SESSION_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn close_session(&self, closure: SessionClosure) -> PortResult<Session> {
        let reservation_status = match closure.status {
            SessionStatus::Cancelled => ReservationStatus::Cancelled,
            _ => ReservationStatus::Completed,
        };
        let mut tx = self.begin().await?;

        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "UPDATE sessions SET status = $2, end_time = $3, total_minutes = $4, total_cost = $5 \
             WHERE id = $1 AND status = 'active' RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(closure.session_id)
        .bind(closure.status.as_str())
        .bind(closure.end_time)
        .bind(closure.total_minutes)
        .bind(closure.total_cost)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            PortError::InvalidState(format!("Session {} is not active", closure.session_id))
        })?;

        sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1")
            .bind(record.reservation_id)
            .bind(reservation_status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        sqlx::query(
            "UPDATE booths SET is_available = TRUE, last_synced_at = NOW() \
             WHERE id = $1 AND is_available = FALSE AND held_by_reservation IS NULL",
        )
        .bind(record.booth_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }
}
