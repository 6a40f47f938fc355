use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::AppError;
use crate::models::{Member, Organization};
use crate::services::members;
use crate::services::organizations::{
    self, CreateOrganizationRequest, FullOrganization, UpdateOrganizationRequest,
};

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Deserialize)]
pub struct CheckSlugQuery {
    pub slug: String,
}

#[derive(Debug, Serialize)]
pub struct CheckSlugResponse {
    pub slug: String,
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    /// `null` clears the active organization.
    pub organization_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SetActiveResponse {
    pub active_organization: Option<Organization>,
}

// ============================================
// Handlers
// ============================================

/// Create an organization owned by the caller
///
/// **Auth: Session Required**
pub async fn create_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), AppError> {
    let user = state.actor(&headers).await?;
    let organization =
        organizations::create(state.store.as_ref(), &user, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(organization)))
}

/// List the caller's organizations
///
/// **Auth: Session Required**
pub async fn list_organizations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Organization>>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(organizations::list(state.store.as_ref(), &user).await?))
}

/// **Auth: Session Required**
pub async fn check_slug(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CheckSlugQuery>,
) -> Result<Json<CheckSlugResponse>, AppError> {
    state.actor(&headers).await?;
    let available = organizations::check_slug(state.store.as_ref(), &query.slug).await?;
    Ok(Json(CheckSlugResponse {
        slug: query.slug,
        available,
    }))
}

/// Set or clear the session's active organization
///
/// **Auth: Session Required**
pub async fn set_active_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<SetActiveResponse>, AppError> {
    let user = state.actor(&headers).await?;
    let active_organization =
        organizations::set_active(state.store.as_ref(), &user, req.organization_id.as_deref())
            .await?;
    Ok(Json(SetActiveResponse {
        active_organization,
    }))
}

/// Active organization with members and pending invitations
///
/// **Auth: Session Required**
pub async fn get_active_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FullOrganization>, AppError> {
    let user = state.actor(&headers).await?;
    let full = organizations::full(state.store.as_ref(), &user, None, Utc::now()).await?;
    Ok(Json(full))
}

/// **Auth: Session Required (member)**
pub async fn get_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Json<FullOrganization>, AppError> {
    let user = state.actor(&headers).await?;
    let full = organizations::full(
        state.store.as_ref(),
        &user,
        Some(&organization_id),
        Utc::now(),
    )
    .await?;
    Ok(Json(full))
}

/// **Auth: Session Required (admin or owner)**
pub async fn update_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
    Json(req): Json<UpdateOrganizationRequest>,
) -> Result<Json<Organization>, AppError> {
    let user = state.actor(&headers).await?;
    let organization =
        organizations::update(state.store.as_ref(), &user, Some(&organization_id), req).await?;
    Ok(Json(organization))
}

/// **Auth: Session Required (owner)**
pub async fn delete_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let user = state.actor(&headers).await?;
    organizations::delete(state.store.as_ref(), &user, &organization_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Leave an organization
///
/// **Auth: Session Required (member)**
pub async fn leave_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Json<Member>, AppError> {
    let user = state.actor(&headers).await?;
    let removed = members::leave(state.store.as_ref(), &user, &organization_id).await?;
    Ok(Json(removed))
}
