use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};

use crate::db::OrgStore;
use crate::error::AppError;
use crate::models::{Session, User, UserRole};

/// Cookie set by the sign-in frontend.
pub const SESSION_COOKIE: &str = "session_token";

/// The acting user, resolved from a live session.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub session_id: String,
    pub role: UserRole,
    pub active_organization_id: Option<String>,
    /// Admin user id when this is an impersonation session.
    pub impersonated_by: Option<String>,
    pub impersonator_session_id: Option<String>,
}

impl AuthenticatedUser {
    pub fn from_session(session: &Session, user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            session_id: session.id.clone(),
            role: user.role,
            active_organization_id: session.active_organization_id.clone(),
            impersonated_by: session.impersonated_by.clone(),
            impersonator_session_id: session.impersonator_session_id.clone(),
        }
    }

    pub fn is_impersonating(&self) -> bool {
        self.impersonated_by.is_some()
    }
}

/// Bearer token first, then the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
}

pub async fn validate_session(
    store: &dyn OrgStore,
    token: &str,
    now: DateTime<Utc>,
) -> Result<AuthenticatedUser, AppError> {
    let Some((session, user)) = store.find_session(token).await? else {
        return Err(AppError::unauthorized(
            "SESSION_INVALID",
            "Invalid or expired session",
        ));
    };

    if session.expires_at <= now {
        return Err(AppError::unauthorized(
            "SESSION_INVALID",
            "Invalid or expired session",
        ));
    }

    if user.is_banned(now) {
        return Err(AppError::forbidden(
            "BANNED_USER",
            "You have been banned from this application",
        ));
    }

    Ok(AuthenticatedUser::from_session(&session, &user))
}

pub async fn require_session_from_headers(
    store: &dyn OrgStore,
    headers: &HeaderMap,
    now: DateTime<Utc>,
) -> Result<AuthenticatedUser, AppError> {
    let Some(token) = session_token(headers) else {
        return Err(AppError::unauthorized(
            "SESSION_REQUIRED",
            "Session token required. Please log in.",
        ));
    };

    validate_session(store, token, now).await
}

/// Platform admins only, and never through an impersonation session.
pub fn require_admin(user: &AuthenticatedUser) -> Result<(), AppError> {
    if user.is_impersonating() {
        return Err(AppError::forbidden(
            "IMPERSONATION_NOT_ALLOWED",
            "Stop impersonating before using admin actions",
        ));
    }
    if user.role != UserRole::Admin {
        return Err(AppError::forbidden(
            "ADMIN_REQUIRED",
            "You are not allowed to perform admin actions",
        ));
    }
    Ok(())
}
