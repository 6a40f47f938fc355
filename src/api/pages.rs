//! Server-rendered accept-invitation page and its form targets.

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::Utc;
use url::form_urlencoded;

use super::AppState;
use crate::error::AppError;
use crate::mail::templates::escape;
use crate::services::invitations::{self, InvitationDetails};

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/accept-invitation/{invitation_id}", get(accept_invitation_page))
        .route(
            "/accept-invitation/{invitation_id}/accept",
            post(accept_from_page),
        )
        .route(
            "/accept-invitation/{invitation_id}/reject",
            post(reject_from_page),
        )
}

/// The id is query-encoded so it stays inside the `callbackURL` value.
fn sign_in_redirect(invitation_id: &str) -> Response {
    let encoded: String = form_urlencoded::byte_serialize(invitation_id.as_bytes()).collect();
    Redirect::to(&format!("/sign-in?callbackURL=/accept-invitation/{encoded}")).into_response()
}

/// Missing or dead sessions go to sign-in; everything else renders in place.
fn page_error(err: AppError, invitation_id: &str) -> Response {
    if err.status() == StatusCode::UNAUTHORIZED {
        return sign_in_redirect(invitation_id);
    }

    let status = err.status();
    let message = if status.is_server_error() {
        tracing::error!("Accept-invitation page failed: {}", err);
        "Something went wrong. Please try again later.".to_string()
    } else {
        err.to_string()
    };

    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Invitation</title></head>
<body style="font-family:sans-serif;max-width:480px;margin:40px auto">
<h1>Invitation error</h1>
<p>{message}</p>
<p><a href="/dashboard">Go to dashboard</a></p>
</body>
</html>"#,
        message = escape(&message),
    );
    (status, Html(body)).into_response()
}

fn render_invitation(details: &InvitationDetails) -> String {
    let id = escape(&details.invitation.id);
    let org = escape(&details.organization_name);
    let inviter = details
        .inviter_name
        .as_deref()
        .or(details.inviter_email.as_deref())
        .map(escape)
        .unwrap_or_else(|| "Someone".to_string());
    let logo = details
        .organization_logo
        .as_deref()
        .map(|src| format!(r#"<p><img src="{}" width="64" height="64" alt=""></p>"#, escape(src)))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Join {org}</title></head>
<body style="font-family:sans-serif;max-width:480px;margin:40px auto">
{logo}
<h1>Join {org}</h1>
<p><strong>{inviter}</strong> invited <strong>{email}</strong> to join <strong>{org}</strong> as <strong>{role}</strong>.</p>
<p>This invitation expires {expires}.</p>
<form method="post" action="/accept-invitation/{id}/accept" style="display:inline">
<button type="submit">Accept invitation</button>
</form>
<form method="post" action="/accept-invitation/{id}/reject" style="display:inline">
<button type="submit">Decline</button>
</form>
</body>
</html>"#,
        email = escape(&details.invitation.email),
        role = details.invitation.role,
        expires = details.invitation.expires_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

async fn load_invitation(
    state: &AppState,
    headers: &HeaderMap,
    invitation_id: &str,
) -> Result<InvitationDetails, AppError> {
    let user = state.actor(headers).await?;
    invitations::get(state.store.as_ref(), &user, invitation_id, Utc::now()).await
}

/// Accepts or rejects on behalf of the signed-in recipient.
async fn respond(
    state: &AppState,
    headers: &HeaderMap,
    invitation_id: &str,
    accept: bool,
) -> Result<(), AppError> {
    let user = state.actor(headers).await?;
    state.rate_limit("invitation-response", &user.user_id).await?;
    let store = state.store.as_ref();
    if accept {
        invitations::accept(store, &user, invitation_id, Utc::now()).await?;
    } else {
        invitations::reject(store, &user, invitation_id, Utc::now()).await?;
    }
    Ok(())
}

/// **Auth: Session Required (recipient)**
pub async fn accept_invitation_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Response {
    match load_invitation(&state, &headers, &invitation_id).await {
        Ok(details) => Html(render_invitation(&details)).into_response(),
        Err(err) => page_error(err, &invitation_id),
    }
}

pub async fn accept_from_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Response {
    match respond(&state, &headers, &invitation_id, true).await {
        Ok(()) => Redirect::to("/dashboard").into_response(),
        Err(err) => page_error(err, &invitation_id),
    }
}

pub async fn reject_from_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(invitation_id): Path<String>,
) -> Response {
    match respond(&state, &headers, &invitation_id, false).await {
        Ok(()) => Redirect::to("/dashboard").into_response(),
        Err(err) => page_error(err, &invitation_id),
    }
}
