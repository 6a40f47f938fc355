use axum::{Router, http::HeaderMap, routing::get};
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::db::OrgStore;
use crate::error::AppError;
use crate::mail::EmailSender;
use crate::middleware::{AuthenticatedUser, enforce_rate_limit, rate_limit_key, require_session_from_headers};

pub mod admin;
pub mod api_keys;
pub mod auth;
pub mod health;
pub mod invitations;
pub mod members;
pub mod organization;
pub mod pages;
pub mod routes;

// ============================================
// Application State
// ============================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrgStore>,
    pub mailer: Arc<dyn EmailSender>,
    /// Secondary storage; rate limiting is skipped without it.
    pub redis: Option<ConnectionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrgStore>,
        mailer: Arc<dyn EmailSender>,
        redis: Option<ConnectionManager>,
        config: Config,
    ) -> Self {
        Self {
            store,
            mailer,
            redis,
            config: Arc::new(config),
        }
    }

    /// Resolves the acting user from the request's session token.
    pub async fn actor(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        require_session_from_headers(self.store.as_ref(), headers, Utc::now()).await
    }

    /// Applies the configured per-user window to one action.
    pub async fn rate_limit(&self, action: &str, user_id: &str) -> Result<(), AppError> {
        enforce_rate_limit(
            self.redis.as_ref(),
            &rate_limit_key(action, user_id),
            self.config.rate_limit_max,
            self.config.rate_limit_window_secs,
        )
        .await
    }
}

/// Full application router: health checks, accept-invitation pages and `/v1`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ping", get(health::ping))
        .merge(pages::page_routes())
        .nest("/v1", routes::v1_routes())
        .with_state(state)
}
