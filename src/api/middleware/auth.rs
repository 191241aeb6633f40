use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::models::Member;
use crate::services::notifier::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub notifier: Notifier,
}

/// Header carrying the authenticated member id, set by the upstream
/// session gateway. Authentication itself happens there; this service
/// only consumes the identity contract.
pub const MEMBER_ID_HEADER: &str = "x-member-id";

#[derive(Debug)]
pub enum AuthError {
    Unauthorized,
    Forbidden,
    Database(sqlx::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", "Forbidden"),
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Database error during identity lookup");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "store_error",
                    "Database error",
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

/// The requesting member, resolved from the gateway header.
#[derive(Debug, Clone)]
pub struct Identity {
    pub member: Member,
}

impl Identity {
    pub fn member_id(&self) -> Uuid {
        self.member.id
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.member.is_admin() {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    pub fn require_coach(&self) -> Result<(), AuthError> {
        if self.member.is_coach() {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let member_id: Uuid = parts
            .headers
            .get(MEMBER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or(AuthError::Unauthorized)?;

        let member = Member::find_by_id(&state.pool, member_id)
            .await
            .map_err(AuthError::Database)?
            .ok_or(AuthError::Unauthorized)?;

        if !member.is_active {
            return Err(AuthError::Unauthorized);
        }

        Ok(Identity { member })
    }
}
