use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::Serialize;

use super::AppState;
use crate::error::AppError;
use crate::models::ApiKey;
use crate::services::api_keys::{self, CreateApiKeyRequest, CreatedApiKey};

#[derive(Debug, Serialize)]
pub struct ListApiKeysResponse {
    pub keys: Vec<ApiKey>,
}

#[derive(Debug, Serialize)]
pub struct RevokeApiKeyResponse {
    pub success: bool,
}

/// Create an API key. The raw key is returned once and never stored.
///
/// **Auth: Session Required**
pub async fn create_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKey>), AppError> {
    let user = state.actor(&headers).await?;
    let created = api_keys::create(state.store.as_ref(), &user, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// **Auth: Session Required**
pub async fn list_api_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListApiKeysResponse>, AppError> {
    let user = state.actor(&headers).await?;
    let keys = api_keys::list(state.store.as_ref(), &user).await?;
    Ok(Json(ListApiKeysResponse { keys }))
}

/// **Auth: Session Required**
pub async fn revoke_api_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Result<Json<RevokeApiKeyResponse>, AppError> {
    let user = state.actor(&headers).await?;
    api_keys::delete(state.store.as_ref(), &user, &key_id).await?;
    Ok(Json(RevokeApiKeyResponse { success: true }))
}
