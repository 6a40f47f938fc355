// Configuration module

use serde::Deserialize;

/// Read from environment variables (`SERVER_PORT`, `DATABASE_URL`, ...).
/// Unset values fall back to [`Config::default`].
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Postgres connection string. Without it the service runs on the
    /// in-memory store.
    pub database_url: Option<String>,
    /// Secondary storage for rate limiting. Rate limiting is off without it.
    pub redis_url: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Public origin used to build links in outgoing email.
    pub base_url: String,
    /// Allowed CORS origin of the dashboard frontend.
    pub frontend_url: String,
    pub app_name: String,
    pub invitation_expires_in_secs: i64,
    pub invitation_limit: u64,
    pub rate_limit_max: u64,
    pub rate_limit_window_secs: u64,
    pub mail_relay_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        config.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            base_url: "http://localhost:3000".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            app_name: "Orgflow".to_string(),
            invitation_expires_in_secs: 48 * 60 * 60,
            invitation_limit: 100,
            rate_limit_max: 10,
            rate_limit_window_secs: 60,
            mail_relay_url: None,
            mail_api_key: None,
            mail_from: "noreply@orgflow.local".to_string(),
            environment: Environment::Development,
        }
    }
}
