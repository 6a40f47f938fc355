use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::db::StoreError;
use crate::mail::MailError;
use crate::models::InvitationStatus;
use crate::policy::PolicyViolation;

/// Every failure a handler can return. Rendered as
/// `{ "error": { "message": ..., "code": ... } }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("invitation expired")]
    InvitationExpired,

    #[error("Too many requests. Retry in {retry_after} seconds.")]
    RateLimited { retry_after: u64 },

    #[error("Failed to send email: {0}")]
    Mail(#[from] MailError),

    #[error("Storage error: {0}")]
    Store(#[source] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Forbidden {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::InvitationExpired => StatusCode::GONE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Mail(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Conflict { code, .. } => *code,
            AppError::InvitationExpired => "INVITATION_EXPIRED",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Mail(_) => "EMAIL_SEND_FAILED",
            AppError::Store(_) => "DB_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Terminal-status conflict for an invitation, one code per terminal state
/// so the UI can say why the invitation is no longer valid.
pub fn invitation_not_pending(status: InvitationStatus) -> AppError {
    match status {
        InvitationStatus::Accepted => AppError::conflict(
            "INVITATION_ALREADY_ACCEPTED",
            "This invitation has already been accepted",
        ),
        InvitationStatus::Rejected => AppError::conflict(
            "INVITATION_ALREADY_REJECTED",
            "This invitation has already been rejected",
        ),
        InvitationStatus::Canceled => AppError::conflict(
            "INVITATION_ALREADY_CANCELED",
            "This invitation has been canceled",
        ),
        InvitationStatus::Pending => {
            AppError::conflict("INVITATION_INVALID", "This invitation is no longer valid")
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::not_found(
                "NOT_FOUND",
                format!("{} not found", what),
            ),
            StoreError::InvitationNotPending(status) => invitation_not_pending(status),
            StoreError::InvitationExpired => AppError::InvitationExpired,
            StoreError::AlreadyMember => AppError::conflict(
                "ALREADY_A_MEMBER",
                "User is already a member of this organization",
            ),
            StoreError::LastOwner => AppError::conflict(
                "LAST_OWNER",
                "An organization must keep at least one owner",
            ),
            StoreError::Duplicate(what) => {
                AppError::conflict("ALREADY_EXISTS", format!("{} already exists", what))
            }
            other => AppError::Store(other),
        }
    }
}

impl From<PolicyViolation> for AppError {
    fn from(violation: PolicyViolation) -> Self {
        match violation {
            PolicyViolation::LastOwner => StoreError::LastOwner.into(),
            other => AppError::forbidden(other.code(), other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields: Vec<String> = errors
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        AppError::validation(
            "VALIDATION_FAILED",
            format!("Invalid value for: {}", fields.join(", ")),
        )
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Serialize, Clone, Debug)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                code: code.into(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Store(e) => {
                tracing::error!("Storage failure: {}", e);
                "Internal storage error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal failure: {}", e);
                "Internal server error".to_string()
            }
            AppError::Mail(e) => {
                tracing::warn!("Email delivery failed: {}", e);
                self.to_string()
            }
            _ => self.to_string(),
        };

        (status, Json(ErrorResponse::new(message, self.code()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_and_terminal_invitations_have_distinct_codes() {
        let expired: AppError = StoreError::InvitationExpired.into();
        let accepted: AppError = StoreError::InvitationNotPending(InvitationStatus::Accepted).into();
        let canceled: AppError = StoreError::InvitationNotPending(InvitationStatus::Canceled).into();

        assert_eq!(expired.code(), "INVITATION_EXPIRED");
        assert_eq!(expired.to_string(), "invitation expired");
        assert_eq!(expired.status(), StatusCode::GONE);
        assert_eq!(accepted.code(), "INVITATION_ALREADY_ACCEPTED");
        assert_eq!(canceled.code(), "INVITATION_ALREADY_CANCELED");
        assert_eq!(accepted.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn last_owner_violation_is_a_conflict() {
        let err: AppError = PolicyViolation::LastOwner.into();
        assert_eq!(err.code(), "LAST_OWNER");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
