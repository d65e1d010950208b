//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::{
    error::{ApiError, ErrorBody},
    web::{
        idempotency::{key_from_headers, StoredResponse},
        state::AppState,
    },
};
use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    Extension,
};
use boothnow_core::{
    Booth, EngineError, PaymentOutcome, Receipt, ReportedUsage, Reservation, Session,
    TimerSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        list_booths_handler,
        get_booth_handler,
        create_reservation_handler,
        cancel_reservation_handler,
        list_sessions_handler,
        start_session_handler,
        end_session_handler,
        cancel_session_handler,
        session_timer_handler,
    ),
    components(
        schemas(
            BoothResponse,
            CreateReservationRequest,
            ReservationResponse,
            StartSessionRequest,
            EndSessionRequest,
            SessionResponse,
            ReceiptResponse,
            TimerResponse,
            ErrorBody,
        )
    ),
    tags(
        (name = "BoothNow API", description = "Booth discovery, reservations and pay-per-minute sessions.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct BoothResponse {
    id: Uuid,
    partner_name: String,
    latitude: f64,
    longitude: f64,
    address: String,
    availability: bool,
    last_synced_at: DateTime<Utc>,
}

impl From<Booth> for BoothResponse {
    fn from(b: Booth) -> Self {
        Self {
            id: b.id,
            partner_name: b.partner_name,
            latitude: b.latitude,
            longitude: b.longitude,
            address: b.address,
            availability: b.is_available,
            last_synced_at: b.last_synced_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateReservationRequest {
    pub booth_id: Uuid,
    pub requested_minutes: i32,
    /// Processor reference of the pre-authorised charge, if payment is required.
    pub payment_intent_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ReservationResponse {
    id: Uuid,
    user_id: Uuid,
    booth_id: Uuid,
    requested_minutes: i32,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            booth_id: r.booth_id,
            requested_minutes: r.requested_minutes,
            status: r.status.to_string(),
            created_at: r.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct StartSessionRequest {
    pub booth_id: Uuid,
    pub reservation_id: Uuid,
}

/// Client-side totals. Accepted for diagnostics only; billing is recomputed.
#[derive(Deserialize, ToSchema, Default)]
pub struct EndSessionRequest {
    pub total_minutes: Option<f64>,
    pub total_cost: Option<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
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

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            booth_id: s.booth_id,
            reservation_id: s.reservation_id,
            start_time: s.start_time,
            end_time: s.end_time,
            total_minutes: s.total_minutes,
            total_cost: s.total_cost,
            status: s.status.to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ReceiptResponse {
    session: SessionResponse,
    billed_minutes: f64,
    amount: f64,
    currency: String,
    /// `captured`, `not_required` or `failed`.
    payment_status: String,
    capture_id: Option<String>,
    reported_minutes: Option<f64>,
    reported_cost: Option<f64>,
}

impl From<Receipt> for ReceiptResponse {
    fn from(r: Receipt) -> Self {
        let payment_status = r.payment.as_str().to_string();
        let capture_id = match r.payment {
            PaymentOutcome::Captured { capture_id } => Some(capture_id),
            _ => None,
        };
        Self {
            session: r.session.into(),
            billed_minutes: r.billed_minutes,
            amount: r.amount,
            currency: r.currency,
            payment_status,
            capture_id,
            reported_minutes: r.reported.and_then(|u| u.total_minutes),
            reported_cost: r.reported.and_then(|u| u.total_cost),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TimerResponse {
    session_id: Uuid,
    elapsed_minutes: i64,
    elapsed_seconds: i64,
    current_cost: f64,
    status: String,
}

impl From<TimerSnapshot> for TimerResponse {
    fn from(t: TimerSnapshot) -> Self {
        Self {
            session_id: t.session_id,
            elapsed_minutes: t.elapsed_minutes,
            elapsed_seconds: t.elapsed_seconds,
            current_cost: t.current_cost,
            status: t.status.to_string(),
        }
    }
}

fn body_of<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn id_of(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn stored<T: Serialize>(status: StatusCode, body: T) -> Result<StoredResponse, EngineError> {
    let body = serde_json::to_value(body)
        .map_err(|e| EngineError::Upstream(format!("failed to encode response: {}", e)))?;
    Ok(StoredResponse { status, body })
}

fn replay(response: StoredResponse) -> Response {
    (response.status, Json(response.body)).into_response()
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness check.
#[utoipa::path(get, path = "/health", responses((status = 200, description = "Service is up")))]
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// List all booths with their current availability.
#[utoipa::path(
    get,
    path = "/booths",
    responses(
        (status = 200, description = "All booths", body = [BoothResponse]),
        (status = 401, description = "Missing or invalid token", body = ErrorBody)
    )
)]
pub async fn list_booths_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<BoothResponse>>, ApiError> {
    let booths = app_state.db.list_booths().await?;
    Ok(Json(booths.into_iter().map(BoothResponse::from).collect()))
}

/// Fetch one booth.
#[utoipa::path(
    get,
    path = "/booths/{id}",
    params(("id" = Uuid, Path, description = "Booth id")),
    responses(
        (status = 200, description = "The booth", body = BoothResponse),
        (status = 404, description = "No such booth", body = ErrorBody)
    )
)]
pub async fn get_booth_handler(
    State(app_state): State<Arc<AppState>>,
    booth_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<BoothResponse>, ApiError> {
    let booth_id = id_of(booth_id)?;
    let booth = app_state.db.get_booth(booth_id).await?;
    Ok(Json(booth.into()))
}

/// Hold a booth for the caller.
#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation created", body = ReservationResponse),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 404, description = "No such booth", body = ErrorBody),
        (status = 409, description = "Booth currently occupied", body = ErrorBody)
    )
)]
pub async fn create_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    payload: Result<Json<CreateReservationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body_of(payload)?;
    let reservation = app_state
        .engine
        .reserve(user_id, req.booth_id, req.requested_minutes, req.payment_intent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ReservationResponse::from(reservation))))
}

/// Cancel a reservation that has not been used to start a session.
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    params(("id" = Uuid, Path, description = "Reservation id")),
    responses(
        (status = 200, description = "Reservation cancelled", body = ReservationResponse),
        (status = 404, description = "No such reservation", body = ErrorBody),
        (status = 409, description = "Reservation no longer pending", body = ErrorBody)
    )
)]
pub async fn cancel_reservation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    reservation_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let reservation_id = id_of(reservation_id)?;
    let reservation = app_state
        .engine
        .cancel_reservation(user_id, reservation_id)
        .await?;
    Ok(Json(reservation.into()))
}

/// List the caller's active sessions.
#[utoipa::path(
    get,
    path = "/sessions",
    responses((status = 200, description = "Active sessions", body = [SessionResponse]))
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let sessions = app_state.engine.active_sessions(user_id).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect()))
}

/// Start a session on a reserved booth.
#[utoipa::path(
    post,
    path = "/sessions/start",
    request_body = StartSessionRequest,
    params(("Idempotency-Key" = Option<String>, Header, description = "Makes retries safe.")),
    responses(
        (status = 201, description = "Session started", body = SessionResponse),
        (status = 404, description = "Booth or reservation not found", body = ErrorBody),
        (status = 409, description = "Booth currently occupied, or reservation already used", body = ErrorBody)
    )
)]
pub async fn start_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<StartSessionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let req = body_of(payload)?;
    let key = key_from_headers(&headers)?;

    let engine = app_state.engine.clone();
    let response = app_state
        .idempotency
        .run(key.as_deref(), user_id, "sessions/start", async move {
            let session = engine.start(req.booth_id, req.reservation_id, user_id).await?;
            stored(StatusCode::CREATED, SessionResponse::from(session))
        })
        .await?;
    Ok(replay(response))
}

/// End an active session. Billing is computed from the server clock.
#[utoipa::path(
    post,
    path = "/sessions/{id}/end",
    request_body = EndSessionRequest,
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("Idempotency-Key" = Option<String>, Header, description = "Makes retries safe.")
    ),
    responses(
        (status = 200, description = "Session completed", body = ReceiptResponse),
        (status = 404, description = "No such session", body = ErrorBody),
        (status = 409, description = "Session already ended", body = ErrorBody)
    )
)]
pub async fn end_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    session_id: Result<Path<Uuid>, PathRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let session_id = id_of(session_id)?;
    let key = key_from_headers(&headers)?;
    // The body is optional; an empty one means no reported usage.
    let req: EndSessionRequest = if body.is_empty() {
        EndSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("Invalid end-session body: {}", e)))?
    };
    let reported = (req.total_minutes.is_some() || req.total_cost.is_some()).then_some(
        ReportedUsage {
            total_minutes: req.total_minutes,
            total_cost: req.total_cost,
        },
    );

    let engine = app_state.engine.clone();
    let route = format!("sessions/{}/end", session_id);
    let response = app_state
        .idempotency
        .run(key.as_deref(), user_id, &route, async move {
            let receipt = engine.end(session_id, user_id, reported).await?;
            stored(StatusCode::OK, ReceiptResponse::from(receipt))
        })
        .await?;
    Ok(replay(response))
}

/// Cancel an active session free of charge within the grace window.
#[utoipa::path(
    post,
    path = "/sessions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session cancelled", body = SessionResponse),
        (status = 404, description = "No such session", body = ErrorBody),
        (status = 409, description = "Session not active or past the grace window", body = ErrorBody)
    )
)]
pub async fn cancel_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    session_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = id_of(session_id)?;
    let session = app_state.engine.cancel(session_id, user_id).await?;
    Ok(Json(session.into()))
}

/// Server-authoritative elapsed time and running cost.
#[utoipa::path(
    get,
    path = "/sessions/{id}/timer",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Current timer", body = TimerResponse),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn session_timer_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    session_id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TimerResponse>, ApiError> {
    let session_id = id_of(session_id)?;
    let snapshot = app_state.engine.timer(session_id, user_id).await?;
    Ok(Json(snapshot.into()))
}
