use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{
    ApiKey, Invitation, InvitationStatus, Member, MemberWithUser, OrgRole, Organization,
    ParseEnumError, Session, User, UserRole,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invitation is {0}")]
    InvitationNotPending(InvitationStatus),

    #[error("invitation expired")]
    InvitationExpired,

    #[error("user is already a member")]
    AlreadyMember,

    #[error("organization must keep at least one owner")]
    LastOwner,

    #[error("{0} already exists")]
    Duplicate(&'static str),

    #[error("corrupt row: {0}")]
    Decode(#[from] ParseEnumError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================
// Inputs
// ============================================

#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub email_verified: bool,
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Ban {
    pub reason: Option<String>,
    pub expires: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSortField {
    Name,
    Email,
    #[default]
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    /// Case-insensitive substring match on name or email.
    pub search: Option<String>,
    pub limit: u32,
    pub offset: u32,
    pub sort_by: UserSortField,
    pub sort_direction: SortDirection,
}

#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub logo: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct OrganizationUpdate {
    pub name: Option<String>,
    pub logo: Option<String>,
}

/// Membership to create alongside another write (org creation, acceptance).
#[derive(Debug, Clone)]
pub struct NewMember {
    pub id: String,
    pub user_id: String,
    pub role: OrgRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub role: OrgRole,
    pub inviter_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Store contract
// ============================================

/// Persistence for users, sessions, organizations, memberships,
/// invitations and API keys.
///
/// Invitation transitions and owner-affecting membership writes are atomic:
/// implementations re-check the precondition inside the same write, so two
/// racing requests can never both succeed.
#[async_trait]
pub trait OrgStore: Send + Sync {
    // ---- users ----
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, u64)>;
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn set_user_role(&self, user_id: &str, role: UserRole) -> StoreResult<User>;
    /// `None` lifts the ban.
    async fn set_user_ban(&self, user_id: &str, ban: Option<Ban>) -> StoreResult<User>;
    async fn delete_user(&self, user_id: &str) -> StoreResult<()>;

    // ---- sessions ----
    async fn find_session(&self, token: &str) -> StoreResult<Option<(Session, User)>>;
    async fn find_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>>;
    async fn create_session(&self, session: Session) -> StoreResult<Session>;
    async fn list_user_sessions(&self, user_id: &str) -> StoreResult<Vec<Session>>;
    async fn delete_session(&self, session_id: &str) -> StoreResult<bool>;
    async fn delete_user_sessions(&self, user_id: &str) -> StoreResult<u64>;
    async fn set_active_organization(
        &self,
        session_id: &str,
        organization_id: Option<&str>,
    ) -> StoreResult<()>;

    // ---- organizations ----
    /// Creates the organization and its first owner in one write.
    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewMember,
    ) -> StoreResult<(Organization, Member)>;
    async fn find_organization(&self, organization_id: &str) -> StoreResult<Option<Organization>>;
    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>>;
    async fn list_organizations(&self) -> StoreResult<Vec<Organization>>;
    async fn list_user_organizations(&self, user_id: &str) -> StoreResult<Vec<Organization>>;
    async fn update_organization(
        &self,
        organization_id: &str,
        update: OrganizationUpdate,
    ) -> StoreResult<Organization>;
    /// Cascades to members and invitations and clears it as any session's
    /// active organization.
    async fn delete_organization(&self, organization_id: &str) -> StoreResult<()>;

    // ---- members ----
    async fn find_member(&self, member_id: &str) -> StoreResult<Option<Member>>;
    async fn find_member_by_user(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Member>>;
    async fn list_members(&self, organization_id: &str) -> StoreResult<Vec<MemberWithUser>>;
    /// Fails with `LastOwner` when the change would leave no owner.
    async fn update_member_role(&self, member_id: &str, role: OrgRole) -> StoreResult<Member>;
    /// Fails with `LastOwner` when the removal would leave no owner.
    async fn delete_member(&self, member_id: &str) -> StoreResult<Member>;

    // ---- invitations ----
    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation>;
    async fn find_invitation(&self, invitation_id: &str) -> StoreResult<Option<Invitation>>;
    /// Pending row for (organization, email), expired or not.
    async fn find_pending_invitation(
        &self,
        organization_id: &str,
        email: &str,
    ) -> StoreResult<Option<Invitation>>;
    async fn list_invitations(&self, organization_id: &str) -> StoreResult<Vec<Invitation>>;
    async fn list_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>>;
    async fn count_valid_invitations(
        &self,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
    /// Pushes out the expiry of a still-pending invitation.
    async fn refresh_invitation(
        &self,
        invitation_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Invitation>;
    /// Compare-and-set from `pending` to a terminal status. With `valid_at`,
    /// the invitation must also be unexpired at that instant.
    async fn transition_invitation(
        &self,
        invitation_id: &str,
        to: InvitationStatus,
        valid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Invitation>;
    /// Marks a pending, unexpired invitation accepted and creates the
    /// membership in the same write.
    async fn accept_invitation(
        &self,
        invitation_id: &str,
        member: NewMember,
        now: DateTime<Utc>,
    ) -> StoreResult<(Invitation, Member)>;

    // ---- api keys ----
    async fn create_api_key(&self, key: ApiKey) -> StoreResult<ApiKey>;
    async fn list_api_keys(&self, user_id: &str) -> StoreResult<Vec<ApiKey>>;
    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>>;
    async fn touch_api_key(&self, key_id: &str, used_at: DateTime<Utc>) -> StoreResult<()>;
    async fn delete_api_key(&self, key_id: &str, user_id: &str) -> StoreResult<bool>;

    async fn ping(&self) -> bool;
}

/// Explains why a pending-only transition did not apply.
pub(crate) fn transition_failure(
    current: Option<&Invitation>,
    valid_at: Option<DateTime<Utc>>,
) -> StoreError {
    match current {
        None => StoreError::NotFound("invitation"),
        Some(inv) if inv.status != InvitationStatus::Pending => {
            StoreError::InvitationNotPending(inv.status)
        }
        Some(inv) if valid_at.is_some_and(|at| inv.is_expired(at)) => StoreError::InvitationExpired,
        // Row changed between the conditional write and this read.
        Some(_) => StoreError::InvitationNotPending(InvitationStatus::Pending),
    }
}
