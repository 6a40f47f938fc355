pub mod api_key;
pub mod invitation;
pub mod organization;
pub mod user;

pub use api_key::ApiKey;
pub use invitation::{Invitation, InvitationStatus};
pub use organization::{Member, MemberWithUser, OrgRole, Organization};
pub use user::{Session, User, UserRole};

/// Returned when a stored or submitted enum string has no matching variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
