use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user API key. Only the SHA-256 hash of the key is ever stored;
/// `start` keeps the first characters so the UI can tell keys apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub start: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub enabled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.expires_at.is_none_or(|expires| expires > now)
    }
}
