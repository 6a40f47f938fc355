// Outbound email

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

pub mod templates;

pub use templates::InvitationEmail;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mail relay answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Delivers one rendered message. Failures are returned, never retried.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError>;
}

// ============================================
// HTTP relay
// ============================================

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Posts messages as JSON to a transactional mail relay.
pub struct HttpRelaySender {
    client: Client,
    url: String,
    api_key: Option<String>,
    from: String,
}

impl HttpRelaySender {
    pub fn new(url: String, api_key: Option<String>, from: String) -> Self {
        Self {
            client: Client::new(),
            url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl EmailSender for HttpRelaySender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(&RelayMessage {
                from: &self.from,
                to,
                subject,
                html,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Mail relay returned {} for {}: {}", status, to, body);
            return Err(MailError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Sent \"{}\" to {}", subject, to);
        Ok(())
    }
}

// ============================================
// Development sender
// ============================================

/// Writes messages to the log instead of delivering them.
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), MailError> {
        tracing::info!(to, subject, bytes = html.len(), "Email not delivered (no relay configured)");
        tracing::debug!("{}", html);
        Ok(())
    }
}
