// Platform admin actions. Every call but `stop_impersonating` requires an
// admin on a regular (non-impersonated) session.

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::expiry_after;
use crate::db::{Ban, NewUser, OrgStore, SortDirection, StoreError, UserQuery, UserSortField};
use crate::error::AppError;
use crate::middleware::{AuthenticatedUser, require_admin};
use crate::models::{Invitation, MemberWithUser, OrgRole, Organization, Session, User, UserRole};
use crate::utils::{generate_id, generate_session_token, hash_password, normalize_email};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const IMPERSONATION_SESSION_SECS: i64 = 60 * 60;

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ListUsersQuery {
    #[serde(default)]
    pub search_value: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<UserSortField>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 2))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    #[serde(default = "default_user_role")]
    pub role: UserRole,
}

fn default_user_role() -> UserRole {
    UserRole::User
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct BanUserRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    /// Permanent when absent. At most ten years.
    #[serde(default)]
    #[validate(range(min = 1, max = 315_360_000))]
    pub expires_in_secs: Option<i64>,
}

/// Token of a freshly issued session. The token is only ever shown here.
#[derive(Debug, Clone, Serialize)]
pub struct SessionGrant {
    pub session: Session,
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationOverview {
    #[serde(flatten)]
    pub organization: Organization,
    pub members: Vec<MemberWithUser>,
    pub invitations: Vec<Invitation>,
}

// ============================================
// Users
// ============================================

pub async fn list_users(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    query: ListUsersQuery,
) -> Result<UserList, AppError> {
    require_admin(actor)?;
    query.validate()?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    let search = query
        .search_value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let (users, total) = store
        .list_users(&UserQuery {
            search,
            limit,
            offset,
            sort_by: query.sort_by.unwrap_or_default(),
            sort_direction: query.sort_direction.unwrap_or_default(),
        })
        .await?;

    Ok(UserList {
        users,
        total,
        limit,
        offset,
    })
}

pub async fn create_user(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    mut req: CreateUserRequest,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    require_admin(actor)?;
    req.email = normalize_email(&req.email);
    req.validate()?;

    let exists = || AppError::conflict("USER_ALREADY_EXISTS", "A user with this email already exists");
    if store.find_user_by_email(&req.email).await?.is_some() {
        return Err(exists());
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

    let user = store
        .create_user(NewUser {
            id: generate_id(),
            name: req.name.trim().to_string(),
            email: req.email,
            role: req.role,
            email_verified: true,
            password_hash: Some(password_hash),
            created_at: now,
        })
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => exists(),
            other => other.into(),
        })?;

    tracing::info!("Admin {} created user {}", actor.user_id, user.id);
    Ok(user)
}

pub async fn set_role(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
    role: UserRole,
) -> Result<User, AppError> {
    require_admin(actor)?;
    let user = store.set_user_role(user_id, role).await?;
    tracing::info!("Admin {} set role of {} to {}", actor.user_id, user_id, role);
    Ok(user)
}

/// Bans the user and signs them out everywhere.
pub async fn ban(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
    req: BanUserRequest,
    now: DateTime<Utc>,
) -> Result<User, AppError> {
    require_admin(actor)?;
    req.validate()?;
    if user_id == actor.user_id {
        return Err(AppError::validation("CANNOT_BAN_YOURSELF", "You cannot ban yourself"));
    }

    let expires = req
        .expires_in_secs
        .map(|secs| expiry_after(now, secs))
        .transpose()?;

    let user = store
        .set_user_ban(
            user_id,
            Some(Ban {
                reason: req.reason,
                expires,
            }),
        )
        .await?;
    let revoked = store.delete_user_sessions(user_id).await?;

    tracing::info!(
        "Admin {} banned {} ({} sessions revoked)",
        actor.user_id,
        user_id,
        revoked
    );
    Ok(user)
}

pub async fn unban(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
) -> Result<User, AppError> {
    require_admin(actor)?;
    let user = store.set_user_ban(user_id, None).await?;
    tracing::info!("Admin {} unbanned {}", actor.user_id, user_id);
    Ok(user)
}

/// Deletes the user with their sessions, memberships and API keys.
/// Refused while the user is the only owner of an organization.
pub async fn remove_user(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
) -> Result<(), AppError> {
    require_admin(actor)?;
    if user_id == actor.user_id {
        return Err(AppError::validation(
            "CANNOT_REMOVE_YOURSELF",
            "You cannot delete your own account here",
        ));
    }

    for organization in store.list_user_organizations(user_id).await? {
        let members = store.list_members(&organization.id).await?;
        let owners: Vec<&MemberWithUser> = members
            .iter()
            .filter(|m| m.member.role == OrgRole::Owner)
            .collect();
        if owners.len() == 1 && owners[0].member.user_id == user_id {
            return Err(AppError::conflict(
                "LAST_OWNER",
                format!(
                    "User is the only owner of organization '{}'",
                    organization.slug
                ),
            ));
        }
    }

    store.delete_user(user_id).await?;
    tracing::info!("Admin {} deleted user {}", actor.user_id, user_id);
    Ok(())
}

// ============================================
// Sessions
// ============================================

pub async fn list_user_sessions(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
) -> Result<Vec<Session>, AppError> {
    require_admin(actor)?;
    Ok(store.list_user_sessions(user_id).await?)
}

pub async fn revoke_user_session(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    session_id: &str,
) -> Result<(), AppError> {
    require_admin(actor)?;
    if !store.delete_session(session_id).await? {
        return Err(AppError::not_found("SESSION_NOT_FOUND", "Session not found"));
    }
    tracing::info!("Admin {} revoked session {}", actor.user_id, session_id);
    Ok(())
}

pub async fn revoke_user_sessions(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
) -> Result<u64, AppError> {
    require_admin(actor)?;
    let revoked = store.delete_user_sessions(user_id).await?;
    tracing::info!(
        "Admin {} revoked {} sessions of {}",
        actor.user_id,
        revoked,
        user_id
    );
    Ok(revoked)
}

/// Opens a one-hour session as the target user. Admins cannot be impersonated.
pub async fn impersonate(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<SessionGrant, AppError> {
    require_admin(actor)?;
    if user_id == actor.user_id {
        return Err(AppError::validation(
            "CANNOT_IMPERSONATE_YOURSELF",
            "You cannot impersonate yourself",
        ));
    }

    let target = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("USER_NOT_FOUND", "User not found"))?;
    if target.role == UserRole::Admin {
        return Err(AppError::forbidden(
            "CANNOT_IMPERSONATE_ADMINS",
            "Admins cannot be impersonated",
        ));
    }

    let token = generate_session_token();
    let session = store
        .create_session(Session {
            id: generate_id(),
            token: token.clone(),
            user_id: target.id.clone(),
            expires_at: now + Duration::seconds(IMPERSONATION_SESSION_SECS),
            ip_address: None,
            user_agent: None,
            active_organization_id: None,
            impersonated_by: Some(actor.user_id.clone()),
            impersonator_session_id: Some(actor.session_id.clone()),
            created_at: now,
        })
        .await?;

    tracing::warn!("Admin {} is impersonating {}", actor.user_id, target.id);
    Ok(SessionGrant { session, token })
}

/// Ends an impersonation session and hands back the admin's own session.
pub async fn stop_impersonating(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    now: DateTime<Utc>,
) -> Result<SessionGrant, AppError> {
    let (Some(admin_id), Some(admin_session_id)) =
        (&actor.impersonated_by, &actor.impersonator_session_id)
    else {
        return Err(AppError::validation(
            "NOT_IMPERSONATING",
            "This session is not impersonating anyone",
        ));
    };

    store.delete_session(&actor.session_id).await?;

    let session = store
        .find_session_by_id(admin_session_id)
        .await?
        .filter(|s| s.user_id == *admin_id && s.expires_at > now)
        .ok_or_else(|| {
            AppError::unauthorized("SESSION_INVALID", "The original admin session has ended")
        })?;

    tracing::info!("Admin {} stopped impersonating {}", admin_id, actor.user_id);
    Ok(SessionGrant {
        token: session.token.clone(),
        session,
    })
}

// ============================================
// Organizations
// ============================================

/// Every organization with its members and invitations.
pub async fn list_all_organizations(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
) -> Result<Vec<OrganizationOverview>, AppError> {
    require_admin(actor)?;

    let organizations = store.list_organizations().await?;
    let overviews = try_join_all(organizations.into_iter().map(|organization| async move {
        let (members, invitations) = futures::try_join!(
            store.list_members(&organization.id),
            store.list_invitations(&organization.id)
        )?;
        Ok::<_, StoreError>(OrganizationOverview {
            organization,
            members,
            invitations,
        })
    }))
    .await?;

    Ok(overviews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::middleware::require_session_from_headers;
    use crate::testing::{add_member, seed_org, sign_in};
    use axum::http::{HeaderMap, HeaderValue, header};

    async fn admin(store: &MemoryStore) -> AuthenticatedUser {
        sign_in(store, "root@example.com", UserRole::Admin).await
    }

    fn new_user(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            name: "New User".to_string(),
            email: email.to_string(),
            password: "correct horse".to_string(),
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn non_admins_are_refused() {
        let store = MemoryStore::new();
        let user = sign_in(&store, "u@example.com", UserRole::User).await;

        let err = list_users(&store, &user, ListUsersQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ADMIN_REQUIRED");
        let err = list_all_organizations(&store, &user).await.unwrap_err();
        assert_eq!(err.code(), "ADMIN_REQUIRED");
    }

    #[tokio::test]
    async fn created_users_get_a_password_and_show_up_in_search() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let admin = admin(&store).await;

        let user = create_user(&store, &admin, new_user("New@Example.com"), now)
            .await
            .unwrap();
        assert_eq!(user.email, "new@example.com");
        let hash = store.password_hash(&user.id).await.unwrap();
        assert!(hash.starts_with("$argon2"));

        let err = create_user(&store, &admin, new_user("new@example.com"), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_ALREADY_EXISTS");

        let mut short = new_user("short@example.com");
        short.password = "short".to_string();
        let err = create_user(&store, &admin, short, now).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");

        let page = list_users(
            &store,
            &admin,
            ListUsersQuery {
                search_value: Some("new".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(page.users[0].id, user.id);

        let err = list_users(
            &store,
            &admin,
            ListUsersQuery {
                limit: Some(500),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn ban_revokes_sessions_and_unban_restores_access() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let admin = admin(&store).await;
        let user = sign_in(&store, "u@example.com", UserRole::User).await;

        let err = ban(&store, &admin, &admin.user_id, BanUserRequest::default(), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANNOT_BAN_YOURSELF");

        let banned = ban(
            &store,
            &admin,
            &user.user_id,
            BanUserRequest {
                reason: Some("spam".to_string()),
                expires_in_secs: Some(3600),
            },
            now,
        )
        .await
        .unwrap();
        assert!(banned.is_banned(now));
        assert!(!banned.is_banned(now + Duration::hours(2)));
        assert!(store.list_user_sessions(&user.user_id).await.unwrap().is_empty());

        let unbanned = unban(&store, &admin, &user.user_id).await.unwrap();
        assert!(!unbanned.banned);
        assert_eq!(unbanned.ban_reason, None);
    }

    #[tokio::test]
    async fn ban_lifetime_is_bounded() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let admin = admin(&store).await;
        let user = sign_in(&store, "u@example.com", UserRole::User).await;

        let err = ban(
            &store,
            &admin,
            &user.user_id,
            BanUserRequest {
                reason: None,
                expires_in_secs: Some(i64::MAX),
            },
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");

        let found = store.find_user(&user.user_id).await.unwrap().unwrap();
        assert!(!found.banned);
        assert_eq!(store.list_user_sessions(&user.user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn impersonation_round_trip() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let admin = admin(&store).await;
        let other_admin = sign_in(&store, "root2@example.com", UserRole::Admin).await;
        let user = sign_in(&store, "u@example.com", UserRole::User).await;

        let err = impersonate(&store, &admin, &other_admin.user_id, now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANNOT_IMPERSONATE_ADMINS");

        let grant = impersonate(&store, &admin, &user.user_id, now).await.unwrap();
        assert_eq!(grant.session.user_id, user.user_id);
        assert_eq!(
            grant.session.expires_at,
            now + Duration::seconds(IMPERSONATION_SESSION_SECS)
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", grant.token)).unwrap(),
        );
        let as_user = require_session_from_headers(&store, &headers, now)
            .await
            .unwrap();
        assert_eq!(as_user.impersonated_by.as_deref(), Some(admin.user_id.as_str()));

        // Impersonation sessions cannot reach admin actions.
        let err = list_all_organizations(&store, &as_user).await.unwrap_err();
        assert_eq!(err.code(), "IMPERSONATION_NOT_ALLOWED");

        let back = stop_impersonating(&store, &as_user, now).await.unwrap();
        assert_eq!(back.session.id, admin.session_id);
        assert!(store.find_session_by_id(&as_user.session_id).await.unwrap().is_none());

        let err = stop_impersonating(&store, &admin, now).await.unwrap_err();
        assert_eq!(err.code(), "NOT_IMPERSONATING");
    }

    #[tokio::test]
    async fn sole_owners_cannot_be_deleted() {
        let store = MemoryStore::new();
        let admin = admin(&store).await;
        let owner = sign_in(&store, "owner@example.com", UserRole::User).await;
        let member = sign_in(&store, "m@example.com", UserRole::User).await;
        seed_org(&store, "org1", &owner).await;
        add_member(&store, "org1", &member, OrgRole::Member).await;

        let err = remove_user(&store, &admin, &owner.user_id).await.unwrap_err();
        assert_eq!(err.code(), "LAST_OWNER");

        remove_user(&store, &admin, &member.user_id).await.unwrap();
        assert!(store.find_user(&member.user_id).await.unwrap().is_none());
        assert_eq!(store.list_members("org1").await.unwrap().len(), 1);

        let err = remove_user(&store, &admin, &admin.user_id).await.unwrap_err();
        assert_eq!(err.code(), "CANNOT_REMOVE_YOURSELF");
    }

    #[tokio::test]
    async fn all_organizations_include_members() {
        let store = MemoryStore::new();
        let admin = admin(&store).await;
        let owner = sign_in(&store, "owner@example.com", UserRole::User).await;
        seed_org(&store, "org1", &owner).await;
        seed_org(&store, "org2", &owner).await;

        let all = list_all_organizations(&store, &admin).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|o| o.members.len() == 1));
        assert_eq!(list_user_sessions(&store, &admin, &owner.user_id).await.unwrap().len(), 1);
        assert_eq!(revoke_user_sessions(&store, &admin, &owner.user_id).await.unwrap(), 1);
    }
}
