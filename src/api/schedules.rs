use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::auth::{AppState, AuthError, Identity};
use crate::error::AppError;
use crate::models::ClassInstance;
use crate::services::booking::{self, BookingError};
use crate::services::ledger::{self, ExpirySweepStats, LedgerError};
use crate::services::schedule_generator::{self, GenerateError, GenerationStats};

pub enum SchedulesApiError {
    Auth(AuthError),
    Booking(BookingError),
    Generate(GenerateError),
    Ledger(LedgerError),
}

impl From<BookingError> for SchedulesApiError {
    fn from(e: BookingError) -> Self {
        Self::Booking(e)
    }
}

impl From<GenerateError> for SchedulesApiError {
    fn from(e: GenerateError) -> Self {
        Self::Generate(e)
    }
}

impl From<LedgerError> for SchedulesApiError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl IntoResponse for SchedulesApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            SchedulesApiError::Auth(e) => return e.into_response(),
            SchedulesApiError::Booking(e) => {
                return crate::api::bookings::BookingsApiError::from(e).into_response()
            }
            SchedulesApiError::Generate(e) => match &e {
                GenerateError::InvalidHorizon(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_horizon", msg.clone())
                }
                GenerateError::Database(db) => {
                    tracing::error!(error = %db, "Instance generation failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "store_error",
                        "Database error".to_string(),
                    )
                }
            },
            SchedulesApiError::Ledger(e) => {
                tracing::error!(error = %e, "Expiry sweep failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.code(),
                    "Database error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "code": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub months_ahead: Option<u32>,
}

/// Manual trigger for the instance generation job. Safe to run while the
/// cron trigger is active.
async fn generate_instances(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerationStats>, SchedulesApiError> {
    identity.require_admin().map_err(SchedulesApiError::Auth)?;

    let months_ahead = req
        .months_ahead
        .unwrap_or(state.config.generate_months_ahead);

    let stats = schedule_generator::generate(&state.pool, months_ahead).await?;

    Ok(Json(stats))
}

/// Manual trigger for the package expiry sweep.
async fn run_expiry_sweep(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ExpirySweepStats>, SchedulesApiError> {
    identity.require_admin().map_err(SchedulesApiError::Auth)?;

    let stats = ledger::expire_packages(&state.pool).await?;

    Ok(Json(stats))
}

async fn cancel_instance(
    State(state): State<AppState>,
    identity: Identity,
    Path(class_instance_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, SchedulesApiError> {
    identity.require_admin().map_err(SchedulesApiError::Auth)?;

    let refunded =
        booking::cancel_instance(&state.pool, &state.notifier, class_instance_id).await?;

    Ok(Json(json!({ "refunded_bookings": refunded })))
}

async fn delete_instance(
    State(state): State<AppState>,
    identity: Identity,
    Path(class_instance_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, SchedulesApiError> {
    identity.require_admin().map_err(SchedulesApiError::Auth)?;

    let refunded =
        booking::delete_instance(&state.pool, &state.notifier, class_instance_id).await?;

    Ok(Json(json!({ "refunded_bookings": refunded })))
}

async fn deactivate_location(
    State(state): State<AppState>,
    identity: Identity,
    Path(location_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, SchedulesApiError> {
    identity.require_admin().map_err(SchedulesApiError::Auth)?;

    let refunded =
        booking::deactivate_location(&state.pool, &state.notifier, location_id).await?;

    Ok(Json(json!({ "refunded_bookings": refunded })))
}

async fn delete_child(
    State(state): State<AppState>,
    identity: Identity,
    Path(child_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, SchedulesApiError> {
    let refunded = booking::delete_child(
        &state.pool,
        &state.notifier,
        child_id,
        identity.member_id(),
        identity.member.is_admin(),
    )
    .await?;

    Ok(Json(json!({ "refunded_bookings": refunded })))
}

async fn list_location_instances(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> Result<Json<Vec<ClassInstance>>, AppError> {
    let instances = ClassInstance::list_upcoming_at_location(&state.pool, location_id).await?;

    Ok(Json(instances))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/instances/generate", post(generate_instances))
        .route("/admin/packages/expiry-sweep", post(run_expiry_sweep))
        .route("/admin/instances/:class_instance_id/cancel", post(cancel_instance))
        .route("/admin/instances/:class_instance_id", delete(delete_instance))
        .route(
            "/admin/locations/:location_id/deactivate",
            post(deactivate_location),
        )
        .route("/children/:child_id", delete(delete_child))
        .route("/locations/:location_id/instances", get(list_location_instances))
}
