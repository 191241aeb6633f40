use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::auth::{AppState, AuthError, Identity};
use crate::models::{Booking, BookingStatus};
use crate::services::checkin::{self, CheckinError, CheckinToken, IssuedToken};

pub enum CheckinApiError {
    Auth(AuthError),
    Service(CheckinError),
}

impl From<CheckinError> for CheckinApiError {
    fn from(e: CheckinError) -> Self {
        Self::Service(e)
    }
}

impl IntoResponse for CheckinApiError {
    fn into_response(self) -> Response {
        let e = match self {
            CheckinApiError::Auth(e) => return e.into_response(),
            CheckinApiError::Service(e) => e,
        };

        let status = match &e {
            CheckinError::BookingNotFound => StatusCode::NOT_FOUND,
            CheckinError::InvalidSignature | CheckinError::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            CheckinError::Forbidden => StatusCode::FORBIDDEN,
            CheckinError::BookingMismatch
            | CheckinError::InvalidStatus
            | CheckinError::AlreadyCheckedIn
            | CheckinError::OutsideCheckinWindow
            | CheckinError::ClassEnded
            | CheckinError::InvalidDate => StatusCode::CONFLICT,
            CheckinError::Qr(_) | CheckinError::Serialization(_) | CheckinError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %e, "Check-in request failed");
            "Internal server error".to_string()
        } else {
            e.to_string()
        };

        let body = Json(json!({
            "code": e.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}

async fn issue_checkin_token(
    State(state): State<AppState>,
    identity: Identity,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<IssuedToken>, CheckinApiError> {
    let issued = checkin::issue_token(
        &state.pool,
        state.config.checkin_secret.expose_secret().as_bytes(),
        booking_id,
        identity.member_id(),
    )
    .await?;

    Ok(Json(issued))
}

async fn validate_checkin(
    State(state): State<AppState>,
    identity: Identity,
    Json(token): Json<CheckinToken>,
) -> Result<Json<Booking>, CheckinApiError> {
    identity.require_coach().map_err(CheckinApiError::Auth)?;

    let booking = checkin::validate(
        &state.pool,
        state.config.checkin_secret.expose_secret().as_bytes(),
        &token,
        &identity.member,
    )
    .await?;

    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
pub struct MarkAttendanceRequest {
    pub status: BookingStatus,
}

async fn mark_attendance(
    State(state): State<AppState>,
    identity: Identity,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<MarkAttendanceRequest>,
) -> Result<Json<Booking>, CheckinApiError> {
    identity.require_coach().map_err(CheckinApiError::Auth)?;

    let booking =
        checkin::mark_attendance(&state.pool, booking_id, &identity.member, req.status).await?;

    Ok(Json(booking))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings/:booking_id/checkin-token", post(issue_checkin_token))
        .route("/bookings/:booking_id/attendance", post(mark_attendance))
        .route("/checkin/validate", post(validate_checkin))
}
