use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::AppError;
use crate::models::{Session, User, UserRole};
use crate::services::admin::{
    self, BanUserRequest, CreateUserRequest, ListUsersQuery, OrganizationOverview, SessionGrant,
    UserList,
};

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct RevokedSessions {
    pub revoked: u64,
}

// ============================================
// Users
// ============================================

/// Search, sort and page through users
///
/// **Auth: Admin Required**
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<UserList>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(admin::list_users(state.store.as_ref(), &user, query).await?))
}

/// **Auth: Admin Required**
pub async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.actor(&headers).await?;
    let created = admin::create_user(state.store.as_ref(), &user, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// **Auth: Admin Required**
pub async fn remove_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = state.actor(&headers).await?;
    admin::remove_user(state.store.as_ref(), &user, &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// **Auth: Admin Required**
pub async fn set_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<SetRoleRequest>,
) -> Result<Json<User>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::set_role(state.store.as_ref(), &user, &user_id, req.role).await?,
    ))
}

/// Ban a user and revoke all of their sessions
///
/// **Auth: Admin Required**
pub async fn ban_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(req): Json<BanUserRequest>,
) -> Result<Json<User>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::ban(state.store.as_ref(), &user, &user_id, req, Utc::now()).await?,
    ))
}

/// **Auth: Admin Required**
pub async fn unban_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<User>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(admin::unban(state.store.as_ref(), &user, &user_id).await?))
}

// ============================================
// Sessions
// ============================================

/// **Auth: Admin Required**
pub async fn list_user_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Session>>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::list_user_sessions(state.store.as_ref(), &user, &user_id).await?,
    ))
}

/// **Auth: Admin Required**
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<RevokedSessions>, AppError> {
    let user = state.actor(&headers).await?;
    let revoked = admin::revoke_user_sessions(state.store.as_ref(), &user, &user_id).await?;
    Ok(Json(RevokedSessions { revoked }))
}

/// **Auth: Admin Required**
pub async fn revoke_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = state.actor(&headers).await?;
    admin::revoke_user_session(state.store.as_ref(), &user, &session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Impersonation
// ============================================

/// Start a short-lived session as another user
///
/// **Auth: Admin Required**
pub async fn impersonate_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<SessionGrant>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::impersonate(state.store.as_ref(), &user, &user_id, Utc::now()).await?,
    ))
}

/// **Auth: Session Required (impersonation session)**
pub async fn stop_impersonating(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionGrant>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::stop_impersonating(state.store.as_ref(), &user, Utc::now()).await?,
    ))
}

// ============================================
// Organizations
// ============================================

/// **Auth: Admin Required**
pub async fn list_organizations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrganizationOverview>>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(
        admin::list_all_organizations(state.store.as_ref(), &user).await?,
    ))
}
