use anyhow::Result;
use axum::http::{Method, header};
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod db;
mod error;
mod mail;
mod middleware;
mod models;
mod policy;
mod services;
mod utils;

#[cfg(test)]
mod testing;

use api::AppState;
use config::Config;
use db::{MemoryStore, OrgStore, PgStore};
use mail::{EmailSender, HttpRelaySender, LogSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "orgflow_api=info,tower_http=info".into()),
    );
    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Primary storage
    let store: Arc<dyn OrgStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .idle_timeout(std::time::Duration::from_secs(300))
                .connect(database_url)
                .await?;
            tracing::info!("Connected to PostgreSQL");

            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Database migrations completed");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    // Secondary storage for rate limiting
    let redis = match &config.redis_url {
        Some(redis_url) => connect_redis(redis_url).await,
        None => {
            tracing::info!("REDIS_URL not set, rate limiting disabled");
            None
        }
    };

    let mailer: Arc<dyn EmailSender> = match &config.mail_relay_url {
        Some(url) => Arc::new(HttpRelaySender::new(
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_from.clone(),
        )),
        None => {
            tracing::warn!("MAIL_RELAY_URL not set, invitation emails are only logged");
            Arc::new(LogSender)
        }
    };

    // Supports comma-separated list of origins for multiple environments
    let origins: Vec<header::HeaderValue> = config
        .frontend_url
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        // Session cookies travel cross-origin from the dashboard
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600));

    tracing::info!("CORS configured for origins: {}", config.frontend_url);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(store, mailer, redis, config);

    let app = api::app(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn connect_redis(redis_url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(redis_url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Invalid REDIS_URL (rate limiting disabled): {}", e);
            return None;
        }
    };

    match ConnectionManager::new(client).await {
        Ok(conn) => {
            tracing::info!("Connected to Redis");
            Some(conn)
        }
        Err(e) => {
            tracing::warn!("Redis connection failed (rate limiting disabled): {}", e);
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
