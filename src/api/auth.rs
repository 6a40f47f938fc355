use axum::{Json, extract::State, http::HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::AppError;
use crate::middleware::{AuthenticatedUser, validate_session};
use crate::models::UserRole;
use crate::services::api_keys::{self, VerifiedApiKey, VerifyApiKeyRequest};

/// Verify a session token, e.g. from the sign-in frontend
#[derive(Debug, Deserialize)]
pub struct VerifySessionRequest {
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifySessionResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub active_organization_id: Option<String>,
    pub impersonated_by: Option<String>,
}

impl From<AuthenticatedUser> for SessionInfo {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            name: user.name,
            role: user.role,
            active_organization_id: user.active_organization_id,
            impersonated_by: user.impersonated_by,
        }
    }
}

/// **Auth: Public**
pub async fn verify_session(
    State(state): State<AppState>,
    Json(req): Json<VerifySessionRequest>,
) -> Result<Json<VerifySessionResponse>, AppError> {
    match validate_session(state.store.as_ref(), &req.session_token, Utc::now()).await {
        Ok(user) => Ok(Json(VerifySessionResponse {
            valid: true,
            session: Some(user.into()),
        })),
        Err(AppError::Store(e)) => Err(AppError::Store(e)),
        Err(_) => Ok(Json(VerifySessionResponse {
            valid: false,
            session: None,
        })),
    }
}

/// Current session of the caller
///
/// **Auth: Session Required**
pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionInfo>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(user.into()))
}

/// **Auth: Public**
pub async fn verify_api_key(
    State(state): State<AppState>,
    Json(req): Json<VerifyApiKeyRequest>,
) -> Result<Json<VerifiedApiKey>, AppError> {
    let verified = api_keys::verify(state.store.as_ref(), &req.key, Utc::now()).await?;
    Ok(Json(verified))
}
