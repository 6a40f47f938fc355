// Shared fixtures for unit tests.

use chrono::{DateTime, Duration, Utc};

use crate::db::{MemoryStore, NewMember, NewOrganization, NewUser, OrgStore};
use crate::middleware::AuthenticatedUser;
use crate::models::{
    Invitation, InvitationStatus, Member, OrgRole, Organization, Session, User, UserRole,
};
use crate::utils::{generate_id, generate_session_token};

pub async fn seed_user(store: &dyn OrgStore, email: &str, role: UserRole) -> User {
    let name = email.split('@').next().unwrap_or(email).to_string();
    store
        .create_user(NewUser {
            id: generate_id(),
            name,
            email: email.to_string(),
            role,
            email_verified: true,
            password_hash: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap()
}

pub async fn seed_session(store: &dyn OrgStore, user: &User) -> Session {
    let now = Utc::now();
    store
        .create_session(Session {
            id: generate_id(),
            token: generate_session_token(),
            user_id: user.id.clone(),
            expires_at: now + Duration::days(7),
            ip_address: None,
            user_agent: None,
            active_organization_id: None,
            impersonated_by: None,
            impersonator_session_id: None,
            created_at: now,
        })
        .await
        .unwrap()
}

/// A user with a live session, as the session resolver would produce it.
pub async fn sign_in(store: &dyn OrgStore, email: &str, role: UserRole) -> AuthenticatedUser {
    let user = seed_user(store, email, role).await;
    let session = seed_session(store, &user).await;
    AuthenticatedUser::from_session(&session, &user)
}

/// Re-reads the actor so session changes (active organization) show up.
pub async fn refresh(store: &dyn OrgStore, actor: &AuthenticatedUser) -> AuthenticatedUser {
    let session = store
        .find_session_by_id(&actor.session_id)
        .await
        .unwrap()
        .unwrap();
    let user = store.find_user(&actor.user_id).await.unwrap().unwrap();
    AuthenticatedUser::from_session(&session, &user)
}

pub async fn seed_org(store: &dyn OrgStore, id: &str, owner: &AuthenticatedUser) -> Organization {
    let now = Utc::now();
    let (org, _) = store
        .create_organization(
            NewOrganization {
                id: id.to_string(),
                name: format!("Org {id}"),
                slug: id.to_string(),
                logo: None,
                created_at: now,
            },
            NewMember {
                id: generate_id(),
                user_id: owner.user_id.clone(),
                role: OrgRole::Owner,
                created_at: now,
            },
        )
        .await
        .unwrap();
    org
}

pub async fn add_member(
    store: &MemoryStore,
    organization_id: &str,
    user: &AuthenticatedUser,
    role: OrgRole,
) -> Member {
    let member = Member {
        id: generate_id(),
        organization_id: organization_id.to_string(),
        user_id: user.user_id.clone(),
        role,
        created_at: Utc::now(),
    };
    store.seed_member(member.clone()).await;
    member
}

pub fn pending_invitation(
    id: &str,
    organization_id: &str,
    email: &str,
    inviter_id: &str,
    expires_at: DateTime<Utc>,
) -> Invitation {
    Invitation {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        email: email.to_string(),
        role: OrgRole::Member,
        status: InvitationStatus::Pending,
        inviter_id: inviter_id.to_string(),
        expires_at,
        created_at: Utc::now(),
    }
}
