use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::middleware::auth::{AppState, AuthError, Identity};
use crate::error::AppError;
use crate::models::{CreditTransaction, MemberPackage};
use crate::services::ledger::{self, LedgerError};

pub enum PackagesApiError {
    Auth(AuthError),
    Ledger(LedgerError),
    Validation(String),
}

impl From<LedgerError> for PackagesApiError {
    fn from(e: LedgerError) -> Self {
        Self::Ledger(e)
    }
}

impl IntoResponse for PackagesApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            PackagesApiError::Auth(e) => return e.into_response(),
            PackagesApiError::Ledger(e) => {
                let status = match &e {
                    LedgerError::PackageNotFound => StatusCode::NOT_FOUND,
                    LedgerError::PackageUnavailable
                    | LedgerError::InsufficientCredits
                    | LedgerError::CreditsExpired => StatusCode::CONFLICT,
                    LedgerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!(error = %e, "Ledger request failed");
                    "Database error".to_string()
                } else {
                    e.to_string()
                };
                (status, e.code(), message)
            }
            PackagesApiError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg)
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
pub struct PurchaseRequest {
    pub location_id: Option<Uuid>,
}

async fn purchase_package(
    State(state): State<AppState>,
    identity: Identity,
    Path(package_id): Path<Uuid>,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<MemberPackage>), PackagesApiError> {
    let member_package = ledger::purchase(
        &state.pool,
        identity.member_id(),
        package_id,
        req.location_id,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(member_package)))
}

async fn list_my_packages(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Vec<MemberPackage>>, AppError> {
    let packages = MemberPackage::list_for_member(&state.pool, identity.member_id()).await?;

    Ok(Json(packages))
}

async fn list_package_transactions(
    State(state): State<AppState>,
    identity: Identity,
    Path(member_package_id): Path<Uuid>,
) -> Result<Json<Vec<CreditTransaction>>, AppError> {
    let package = MemberPackage::find_by_id(&state.pool, member_package_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Member package not found".to_string()))?;

    if package.member_id != identity.member_id() && !identity.member.is_admin() {
        return Err(AppError::Forbidden);
    }

    let transactions =
        CreditTransaction::list_for_package(&state.pool, member_package_id).await?;

    Ok(Json(transactions))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub credits: i32,
    pub new_expiry: DateTime<Utc>,
}

async fn grant_credits(
    State(state): State<AppState>,
    identity: Identity,
    Path(member_package_id): Path<Uuid>,
    Json(req): Json<GrantRequest>,
) -> Result<Json<MemberPackage>, PackagesApiError> {
    identity.require_admin().map_err(PackagesApiError::Auth)?;

    if req.credits <= 0 {
        return Err(PackagesApiError::Validation(
            "credits must be positive".to_string(),
        ));
    }

    let member_package =
        ledger::admin_grant(&state.pool, member_package_id, req.credits, req.new_expiry).await?;

    Ok(Json(member_package))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/packages/:package_id/purchase", post(purchase_package))
        .route("/member-packages", get(list_my_packages))
        .route(
            "/member-packages/:member_package_id/transactions",
            get(list_package_transactions),
        )
        .route(
            "/admin/member-packages/:member_package_id/grant",
            post(grant_credits),
        )
}
