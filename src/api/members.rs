use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};

use super::AppState;
use crate::error::AppError;
use crate::models::{Member, MemberWithUser};
use crate::services::members::{self, RemoveMemberRequest, UpdateMemberRoleRequest};

/// Members of an organization, with user details
///
/// **Auth: Session Required (member)**
pub async fn list_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Json<Vec<MemberWithUser>>, AppError> {
    let user = state.actor(&headers).await?;
    let members = members::list(state.store.as_ref(), &user, Some(&organization_id)).await?;
    Ok(Json(members))
}

/// The caller's membership in the active organization
///
/// **Auth: Session Required**
pub async fn get_active_member(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Member>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(members::active_member(state.store.as_ref(), &user).await?))
}

/// **Auth: Session Required (admin or owner)**
pub async fn update_member_role(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<Member>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(members::update_role(state.store.as_ref(), &user, req).await?))
}

/// **Auth: Session Required (admin or owner)**
pub async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RemoveMemberRequest>,
) -> Result<Json<Member>, AppError> {
    let user = state.actor(&headers).await?;
    Ok(Json(members::remove(state.store.as_ref(), &user, req).await?))
}
