// Business operations shared by the JSON API and the accept-invitation pages.
//
// Every function takes the store, the acting user and the current instant;
// handlers stay thin and tests drive these directly against `MemoryStore`.

use chrono::{DateTime, Duration, Utc};

use crate::db::OrgStore;
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::models::{Member, Organization};

pub mod admin;
pub mod api_keys;
pub mod invitations;
pub mod members;
pub mod organizations;

/// `now + secs`, refusing lifetimes chrono cannot represent.
pub(crate) fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, AppError> {
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| AppError::validation("INVALID_EXPIRY", "Expiry is out of range"))
}

/// Explicit organization id, else the session's active organization.
pub(crate) fn resolve_organization_id(
    actor: &AuthenticatedUser,
    explicit: Option<&str>,
) -> Result<String, AppError> {
    explicit
        .map(str::to_string)
        .or_else(|| actor.active_organization_id.clone())
        .ok_or_else(|| {
            AppError::validation(
                "NO_ACTIVE_ORGANIZATION",
                "No organization given and no active organization set",
            )
        })
}

/// Loads the organization and the actor's membership in it.
pub(crate) async fn require_membership(
    store: &dyn OrgStore,
    organization_id: &str,
    actor: &AuthenticatedUser,
) -> Result<(Organization, Member), AppError> {
    let organization = store
        .find_organization(organization_id)
        .await?
        .ok_or_else(|| AppError::not_found("ORGANIZATION_NOT_FOUND", "Organization not found"))?;

    let member = store
        .find_member_by_user(organization_id, &actor.user_id)
        .await?
        .ok_or_else(|| {
            AppError::forbidden(
                "USER_IS_NOT_A_MEMBER_OF_THE_ORGANIZATION",
                "You are not a member of this organization",
            )
        })?;

    Ok((organization, member))
}
