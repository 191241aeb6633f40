use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::auth::{AppState, Identity};
use crate::error::AppError;
use crate::models::Booking;
use crate::services::booking::{self, BookingError};
use crate::services::ledger::LedgerError;

pub struct BookingsApiError(BookingError);

impl From<BookingError> for BookingsApiError {
    fn from(e: BookingError) -> Self {
        Self(e)
    }
}

impl IntoResponse for BookingsApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BookingError::BookingNotFound
            | BookingError::InstanceNotFound
            | BookingError::ChildNotFound
            | BookingError::LocationNotFound => StatusCode::NOT_FOUND,
            BookingError::Forbidden => StatusCode::FORBIDDEN,
            BookingError::ClassCancelled
            | BookingError::ClassInPast
            | BookingError::ClassFull
            | BookingError::AlreadyBooked
            | BookingError::AlreadyCancelled
            | BookingError::CancellationWindowPassed => StatusCode::CONFLICT,
            BookingError::Ledger(LedgerError::InsufficientCredits)
            | BookingError::Ledger(LedgerError::CreditsExpired)
            | BookingError::Ledger(LedgerError::PackageUnavailable) => StatusCode::CONFLICT,
            BookingError::Ledger(LedgerError::PackageNotFound) => StatusCode::NOT_FOUND,
            BookingError::Ledger(LedgerError::Database(_)) | BookingError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Store failures are logged with detail but surfaced generically.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Booking request failed");
            "Database error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "code": self.0.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub class_instance_id: Uuid,
    pub child_id: Option<Uuid>,
}

async fn create_booking(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), BookingsApiError> {
    let booking = booking::create(
        &state.pool,
        &state.notifier,
        identity.member_id(),
        req.class_instance_id,
        req.child_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(booking)))
}

async fn cancel_booking(
    State(state): State<AppState>,
    identity: Identity,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, BookingsApiError> {
    let booking = booking::cancel(
        &state.pool,
        &state.notifier,
        booking_id,
        identity.member_id(),
        identity.member.is_admin(),
    )
    .await?;

    Ok(Json(booking))
}

async fn list_my_bookings(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<Booking>>, AppError> {
    let bookings = Booking::list_for_member(&state.pool, identity.member_id()).await?;

    Ok(Json(bookings))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_my_bookings))
        .route("/bookings/:booking_id/cancel", post(cancel_booking))
}
