use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router, extract::Path, extract::Query, extract::State};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::engine::{Bookability, CreateReservation, Engine, EngineError, RejectReason};
use crate::model::*;

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Registry
        .route("/venues", post(create_venue))
        .route("/venues/{venue_id}", patch(update_venue).delete(delete_venue))
        .route("/venues/{venue_id}/providers", post(create_provider))
        .route("/providers/{provider_id}", axum::routing::delete(delete_provider))
        // Shifts
        .route(
            "/providers/{provider_id}/shifts",
            post(create_shift).get(list_shifts),
        )
        .route("/shifts/{shift_id}", patch(update_shift).delete(delete_shift))
        // Reservations
        .route("/reservations", post(create_reservation))
        .route("/reservations/{id}", get(get_reservation))
        .route("/reservations/{id}/status", patch(update_reservation_status))
        .route("/reservations/{id}/deliveries", get(list_deliveries))
        .route("/deliveries/{id}/cancel", post(cancel_delivery))
        // Availability
        .route("/availability/{provider_id}", get(availability))
        .route("/bookable", get(bookable))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Error mapping ────────────────────────────────────────

pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    reasons: Vec<RejectReason>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    fn invalid_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_id", "malformed id")
    }

    fn invalid_status(raw: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_status",
            format!("unknown status: {raw}"),
        )
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", message),
            EngineError::AlreadyExists(_) => {
                Self::new(StatusCode::CONFLICT, "already_exists", message)
            }
            EngineError::InvalidTimeRange | EngineError::InvalidBreaks(_) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_time_range", message)
            }
            EngineError::ShiftOverlaps(_) => {
                Self::new(StatusCode::CONFLICT, "shift_overlaps_existing", message)
            }
            EngineError::BookingRejected(reasons) => Self {
                status: StatusCode::CONFLICT,
                kind: "booking_rejected",
                message,
                reasons,
            },
            EngineError::InvalidTransition { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_status_transition", message)
            }
            EngineError::DeliveryTerminal(_) => {
                Self::new(StatusCode::CONFLICT, "delivery_terminal", message)
            }
            EngineError::LimitExceeded(_) => {
                Self::new(StatusCode::BAD_REQUEST, "limit_exceeded", message)
            }
            EngineError::WalError(_) => {
                tracing::error!(error = %message, "storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "kind": self.kind,
            "message": self.message,
        });
        if !self.reasons.is_empty() {
            body["reasons"] = json!(self.reasons);
        }
        (self.status, Json(body)).into_response()
    }
}

fn parse_ulid(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::invalid_id())
}

// ── Health ───────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

// ── Registry ─────────────────────────────────────────────

#[derive(Deserialize)]
struct VenueBody {
    name: Option<String>,
    #[serde(default = "default_room_count")]
    room_count: u32,
    /// Default conflict buffer in minutes.
    #[serde(default)]
    default_buffer_min: i64,
}

fn default_room_count() -> u32 {
    1
}

async fn create_venue(
    State(state): State<AppState>,
    Json(body): Json<VenueBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Ulid::new();
    state
        .engine
        .create_venue(id, body.name, body.room_count, body.default_buffer_min * MINUTE_MS)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"venue_id": id.to_string()})),
    ))
}

async fn update_venue(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
    Json(body): Json<VenueBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&venue_id)?;
    state
        .engine
        .update_venue(id, body.name, body.room_count, body.default_buffer_min * MINUTE_MS)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_venue(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&venue_id)?;
    state.engine.delete_venue(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ProviderBody {
    name: Option<String>,
    /// Overrides the venue default buffer, in minutes.
    buffer_override_min: Option<i64>,
}

async fn create_provider(
    State(state): State<AppState>,
    Path(venue_id): Path<String>,
    Json(body): Json<ProviderBody>,
) -> Result<impl IntoResponse, ApiError> {
    let venue_id = parse_ulid(&venue_id)?;
    let id = Ulid::new();
    state
        .engine
        .create_provider(
            id,
            venue_id,
            body.name,
            body.buffer_override_min.map(|m| m * MINUTE_MS),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"provider_id": id.to_string()})),
    ))
}

async fn delete_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&provider_id)?;
    state.engine.delete_provider(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Shifts ───────────────────────────────────────────────

#[derive(Deserialize)]
struct BreakBody {
    start: Ms,
    end: Ms,
}

#[derive(Deserialize)]
struct ShiftBody {
    date: NaiveDate,
    start: Ms,
    end: Ms,
    #[serde(default)]
    breaks: Vec<BreakBody>,
    status: Option<ShiftStatus>,
}

async fn create_shift(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Json(body): Json<ShiftBody>,
) -> Result<impl IntoResponse, ApiError> {
    let provider_id = parse_ulid(&provider_id)?;
    let id = Ulid::new();
    state
        .engine
        .create_shift(
            id,
            provider_id,
            body.date,
            body.start,
            body.end,
            body.breaks.iter().map(|b| (b.start, b.end)).collect(),
            body.status.unwrap_or(ShiftStatus::Available),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"shift_id": id.to_string()})),
    ))
}

async fn list_shifts(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider_id = parse_ulid(&provider_id)?;
    let shifts = state.engine.shifts_for_provider(provider_id).await;
    Ok(Json(json!({"shifts": shifts})))
}

async fn update_shift(
    State(state): State<AppState>,
    Path(shift_id): Path<String>,
    Json(body): Json<ShiftBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&shift_id)?;
    state
        .engine
        .update_shift(
            id,
            body.date,
            body.start,
            body.end,
            body.breaks.iter().map(|b| (b.start, b.end)).collect(),
            body.status.unwrap_or(ShiftStatus::Available),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_shift(
    State(state): State<AppState>,
    Path(shift_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&shift_id)?;
    state.engine.delete_shift(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Reservations ─────────────────────────────────────────

#[derive(Deserialize)]
struct ReservationBody {
    venue_id: String,
    provider_id: Option<String>,
    start: Ms,
    end: Ms,
    customer: CustomerContact,
    price: Option<PriceInfo>,
    idempotency_key: Option<String>,
    actor: Option<String>,
}

async fn create_reservation(
    State(state): State<AppState>,
    Json(body): Json<ReservationBody>,
) -> Result<impl IntoResponse, ApiError> {
    let venue_id = parse_ulid(&body.venue_id)?;
    let provider_id = body
        .provider_id
        .as_deref()
        .map(parse_ulid)
        .transpose()?;
    let reservation = state
        .engine
        .create_reservation(CreateReservation {
            id: Ulid::new(),
            venue_id,
            provider_id,
            start: body.start,
            end: body.end,
            customer: body.customer,
            price: body.price,
            idempotency_key: body.idempotency_key,
            actor: body.actor.unwrap_or_else(|| "guest".into()),
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "reservation_id": reservation.id.to_string(),
            "status": reservation.status.as_str(),
        })),
    ))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&id)?;
    let reservation = state
        .engine
        .get_reservation(id)
        .await
        .ok_or(EngineError::NotFound(id))?;
    Ok(Json(reservation))
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    note: Option<String>,
    actor: Option<String>,
}

async fn update_reservation_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&id)?;
    let status = ReservationStatus::parse(&body.status)
        .ok_or_else(|| ApiError::invalid_status(&body.status))?;
    let new_status = state
        .engine
        .transition_reservation(
            id,
            status,
            body.actor.as_deref().unwrap_or("admin"),
            body.note,
        )
        .await?;
    Ok(Json(json!({"status": new_status.as_str()})))
}

async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&id)?;
    if state.engine.get_reservation(id).await.is_none() {
        return Err(EngineError::NotFound(id).into());
    }
    let deliveries = state.engine.outbox.for_reservation(&id);
    Ok(Json(json!({"deliveries": deliveries})))
}

async fn cancel_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_ulid(&id)?;
    state.engine.cancel_delivery(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Availability ─────────────────────────────────────────

#[derive(Deserialize)]
struct AvailabilityQuery {
    from: NaiveDate,
    to: NaiveDate,
    /// `calendar` (default) includes blocked segments; `free` lists open
    /// slots only.
    view: Option<String>,
}

async fn availability(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let provider_id = parse_ulid(&provider_id)?;
    if query.view.as_deref() == Some("free") {
        let days = state
            .engine
            .free_slots(provider_id, query.from, query.to)
            .await?;
        return Ok(Json(json!({"days": days})));
    }
    let days = state
        .engine
        .calendar_days(provider_id, query.from, query.to)
        .await?;
    Ok(Json(json!({"days": days})))
}

#[derive(Deserialize)]
struct BookableQuery {
    venue_id: String,
    provider_id: Option<String>,
    start: Ms,
    end: Ms,
}

async fn bookable(
    State(state): State<AppState>,
    Query(query): Query<BookableQuery>,
) -> Result<Json<Bookability>, ApiError> {
    let venue_id = parse_ulid(&query.venue_id)?;
    let provider_id = query
        .provider_id
        .as_deref()
        .map(parse_ulid)
        .transpose()?;
    let verdict = state
        .engine
        .is_bookable(venue_id, provider_id, query.start, query.end)
        .await;
    Ok(Json(verdict))
}
