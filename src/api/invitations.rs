use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;
use crate::models::Invitation;
use crate::services::invitations::{
    self, AcceptedInvitation, InvitationDetails, InviteMemberRequest,
};

#[derive(Debug, Deserialize)]
pub struct ListInvitationsQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Invite someone by email (or resend a pending invitation)
///
/// **Auth: Session Required (admin or owner)**
pub async fn create_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<InviteMemberRequest>,
) -> Result<(StatusCode, Json<Invitation>), AppError> {
    let user = state.actor(&headers).await?;
    state.rate_limit("invite", &user.user_id).await?;

    let invitation = invitations::issue(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &state.config,
        &user,
        req,
        Utc::now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

/// Valid pending invitations of an organization
///
/// **Auth: Session Required (member)**
pub async fn list_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListInvitationsQuery>,
) -> Result<Json<Vec<Invitation>>, AppError> {
    let user = state.actor(&headers).await?;
    let invitations = invitations::list(
        state.store.as_ref(),
        &user,
        query.organization_id.as_deref(),
        Utc::now(),
    )
    .await?;
    Ok(Json(invitations))
}

/// Valid pending invitations addressed to the caller
///
/// **Auth: Session Required**
pub async fn list_my_invitations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<InvitationDetails>>, AppError> {
    let user = state.actor(&headers).await?;
    let invitations =
        invitations::list_for_user(state.store.as_ref(), &user, Utc::now()).await?;
    Ok(Json(invitations))
}

/// **Auth: Session Required (recipient)**
pub async fn get_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Result<Json<InvitationDetails>, AppError> {
    let user = state.actor(&headers).await?;
    let details =
        invitations::get(state.store.as_ref(), &user, &invitation_id, Utc::now()).await?;
    Ok(Json(details))
}

/// **Auth: Session Required (recipient)**
pub async fn accept_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Result<Json<AcceptedInvitation>, AppError> {
    let user = state.actor(&headers).await?;
    state.rate_limit("invitation-response", &user.user_id).await?;
    let accepted =
        invitations::accept(state.store.as_ref(), &user, &invitation_id, Utc::now()).await?;
    Ok(Json(accepted))
}

/// **Auth: Session Required (recipient)**
pub async fn reject_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Result<Json<Invitation>, AppError> {
    let user = state.actor(&headers).await?;
    state.rate_limit("invitation-response", &user.user_id).await?;
    let rejected =
        invitations::reject(state.store.as_ref(), &user, &invitation_id, Utc::now()).await?;
    Ok(Json(rejected))
}

/// **Auth: Session Required (admin, owner or inviter)**
pub async fn cancel_invitation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Result<Json<Invitation>, AppError> {
    let user = state.actor(&headers).await?;
    let canceled = invitations::cancel(state.store.as_ref(), &user, &invitation_id).await?;
    Ok(Json(canceled))
}
