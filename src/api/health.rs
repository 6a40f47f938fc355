use axum::{Json, extract::State};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceStatus,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub database: bool,
    /// `None` when no Redis is configured.
    pub redis: Option<bool>,
}

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
}

/// Lightweight liveness check. No store or Redis calls.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { status: "ok" })
}

/// Full health check: queries the store and Redis.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = state.store.ping().await;

    let redis_healthy = match &state.redis {
        Some(redis) => {
            let mut redis_conn = redis.clone();
            Some(
                redis::cmd("PING")
                    .query_async::<String>(&mut redis_conn)
                    .await
                    .is_ok(),
            )
        }
        None => None,
    };

    let all_healthy = db_healthy && redis_healthy.unwrap_or(true);

    Json(HealthResponse {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceStatus {
            database: db_healthy,
            redis: redis_healthy,
        },
    })
}
