use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::expiry_after;
use crate::db::OrgStore;
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::models::ApiKey;
use crate::utils::{generate_api_key, generate_id, hash_api_key};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Never expires when absent. At most ten years.
    #[serde(default)]
    #[validate(range(min = 60, max = 315_360_000))]
    pub expires_in_secs: Option<i64>,
}

/// Returned once at creation; the plaintext key is not stored.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyApiKeyRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifiedApiKey {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

pub async fn create(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    req: CreateApiKeyRequest,
    now: DateTime<Utc>,
) -> Result<CreatedApiKey, AppError> {
    req.validate()?;
    let expires_at = req
        .expires_in_secs
        .map(|secs| expiry_after(now, secs))
        .transpose()?;
    let (key, start) = generate_api_key();

    let api_key = store
        .create_api_key(ApiKey {
            id: generate_id(),
            user_id: actor.user_id.clone(),
            name: req.name.trim().to_string(),
            start,
            key_hash: hash_api_key(&key),
            enabled: true,
            expires_at,
            last_used_at: None,
            created_at: now,
        })
        .await?;

    tracing::info!("API key {} created for {}", api_key.id, actor.user_id);
    Ok(CreatedApiKey { api_key, key })
}

pub async fn list(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
) -> Result<Vec<ApiKey>, AppError> {
    Ok(store.list_api_keys(&actor.user_id).await?)
}

/// Deletes one of the actor's own keys.
pub async fn delete(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    key_id: &str,
) -> Result<(), AppError> {
    if !store.delete_api_key(key_id, &actor.user_id).await? {
        return Err(AppError::not_found("API_KEY_NOT_FOUND", "API key not found"));
    }
    tracing::info!("API key {} deleted by {}", key_id, actor.user_id);
    Ok(())
}

/// Checks a presented key. Unknown, disabled and expired keys are all
/// reported as invalid without saying which.
pub async fn verify(
    store: &dyn OrgStore,
    key: &str,
    now: DateTime<Utc>,
) -> Result<VerifiedApiKey, AppError> {
    let found = store
        .find_api_key_by_hash(&hash_api_key(key))
        .await?
        .filter(|k| k.is_usable(now));

    let Some(api_key) = found else {
        return Ok(VerifiedApiKey {
            valid: false,
            key_id: None,
            user_id: None,
        });
    };

    store.touch_api_key(&api_key.id, now).await?;
    Ok(VerifiedApiKey {
        valid: true,
        key_id: Some(api_key.id),
        user_id: Some(api_key.user_id),
    })
}
