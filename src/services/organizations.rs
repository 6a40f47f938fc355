use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{require_membership, resolve_organization_id};
use crate::db::{NewMember, NewOrganization, OrgStore, OrganizationUpdate, StoreError};
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::models::{Invitation, MemberWithUser, OrgRole, Organization};
use crate::policy::{self, OrgAction};
use crate::utils::{generate_id, slugify};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrganizationRequest {
    #[validate(length(min = 2, max = 50))]
    pub name: String,
    /// Derived from the name when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    #[validate(length(min = 2, max = 50))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255))]
    pub logo: Option<String>,
}

/// Organization with its members and valid pending invitations.
#[derive(Debug, Clone, Serialize)]
pub struct FullOrganization {
    #[serde(flatten)]
    pub organization: Organization,
    pub members: Vec<MemberWithUser>,
    pub invitations: Vec<Invitation>,
}

fn slug_taken() -> AppError {
    AppError::conflict(
        "ORGANIZATION_ALREADY_EXISTS",
        "An organization with this slug already exists",
    )
}

/// Creates the organization with the actor as owner and makes it active.
pub async fn create(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    req: CreateOrganizationRequest,
    now: DateTime<Utc>,
) -> Result<Organization, AppError> {
    req.validate()?;

    let slug = match req.slug.as_deref() {
        Some(slug) if slugify(slug) == slug && !slug.is_empty() => slug.to_string(),
        Some(_) => {
            return Err(AppError::validation(
                "INVALID_SLUG",
                "Slug may only contain lowercase letters, digits and dashes",
            ));
        }
        None => slugify(&req.name),
    };
    if slug.is_empty() {
        return Err(AppError::validation(
            "INVALID_SLUG",
            "Could not derive a slug from the organization name",
        ));
    }

    if store.find_organization_by_slug(&slug).await?.is_some() {
        return Err(slug_taken());
    }

    let (organization, _) = store
        .create_organization(
            NewOrganization {
                id: generate_id(),
                name: req.name.trim().to_string(),
                slug,
                logo: req.logo,
                created_at: now,
            },
            NewMember {
                id: generate_id(),
                user_id: actor.user_id.clone(),
                role: OrgRole::Owner,
                created_at: now,
            },
        )
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(_) => slug_taken(),
            other => other.into(),
        })?;

    store
        .set_active_organization(&actor.session_id, Some(&organization.id))
        .await?;

    tracing::info!(
        "Organization {} ({}) created by {}",
        organization.id,
        organization.slug,
        actor.user_id
    );
    Ok(organization)
}

/// `true` when the slug is free.
pub async fn check_slug(store: &dyn OrgStore, slug: &str) -> Result<bool, AppError> {
    Ok(store.find_organization_by_slug(slug).await?.is_none())
}

/// Organizations the actor belongs to.
pub async fn list(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
) -> Result<Vec<Organization>, AppError> {
    Ok(store.list_user_organizations(&actor.user_id).await?)
}

pub async fn full(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<FullOrganization, AppError> {
    let organization_id = resolve_organization_id(actor, organization_id)?;
    let (organization, _) = require_membership(store, &organization_id, actor).await?;

    let members = store.list_members(&organization_id).await?;
    let invitations = store
        .list_invitations(&organization_id)
        .await?
        .into_iter()
        .filter(|i| i.is_valid(now))
        .collect();

    Ok(FullOrganization {
        organization,
        members,
        invitations,
    })
}

/// Sets (or with `None` clears) the session's active organization.
pub async fn set_active(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: Option<&str>,
) -> Result<Option<Organization>, AppError> {
    let Some(organization_id) = organization_id else {
        store.set_active_organization(&actor.session_id, None).await?;
        return Ok(None);
    };

    let (organization, _) = require_membership(store, organization_id, actor).await?;
    store
        .set_active_organization(&actor.session_id, Some(&organization.id))
        .await?;
    Ok(Some(organization))
}

pub async fn update(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: Option<&str>,
    req: UpdateOrganizationRequest,
) -> Result<Organization, AppError> {
    req.validate()?;
    let organization_id = resolve_organization_id(actor, organization_id)?;
    let (_, member) = require_membership(store, &organization_id, actor).await?;
    policy::authorize(member.role, OrgAction::UpdateOrganization)?;

    let organization = store
        .update_organization(
            &organization_id,
            OrganizationUpdate {
                name: req.name.map(|n| n.trim().to_string()),
                logo: req.logo,
            },
        )
        .await?;

    tracing::info!("Organization {} updated by {}", organization.id, actor.user_id);
    Ok(organization)
}

/// Owners only. Members and invitations go with it.
pub async fn delete(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: &str,
) -> Result<(), AppError> {
    let (_, member) = require_membership(store, organization_id, actor).await?;
    policy::authorize(member.role, OrgAction::DeleteOrganization)?;

    store.delete_organization(organization_id).await?;
    tracing::info!("Organization {} deleted by {}", organization_id, actor.user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::UserRole;
    use crate::testing::{add_member, refresh, sign_in};

    fn named(name: &str) -> CreateOrganizationRequest {
        CreateOrganizationRequest {
            name: name.to_string(),
            slug: None,
            logo: None,
        }
    }

    #[tokio::test]
    async fn creator_becomes_owner_of_the_active_organization() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let actor = sign_in(&store, "owner@example.com", UserRole::User).await;

        let org = create(&store, &actor, named("Acme Corp"), now).await.unwrap();
        assert_eq!(org.slug, "acme-corp");

        let member = store
            .find_member_by_user(&org.id, &actor.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.role, OrgRole::Owner);

        let actor = refresh(&store, &actor).await;
        assert_eq!(actor.active_organization_id.as_deref(), Some(org.id.as_str()));
        assert!(!check_slug(&store, "acme-corp").await.unwrap());
        assert!(check_slug(&store, "other").await.unwrap());
    }

    #[tokio::test]
    async fn bad_names_and_slugs_are_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let actor = sign_in(&store, "owner@example.com", UserRole::User).await;

        let err = create(&store, &actor, named("A"), now).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");

        let mut req = named("Acme");
        req.slug = Some("Not A Slug".to_string());
        let err = create(&store, &actor, req, now).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_SLUG");

        create(&store, &actor, named("Acme"), now).await.unwrap();
        let err = create(&store, &actor, named("acme"), now).await.unwrap_err();
        assert_eq!(err.code(), "ORGANIZATION_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn only_owners_delete_and_members_cannot_update() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = sign_in(&store, "owner@example.com", UserRole::User).await;
        let admin = sign_in(&store, "admin@example.com", UserRole::User).await;
        let member = sign_in(&store, "member@example.com", UserRole::User).await;
        let org = create(&store, &owner, named("Acme"), now).await.unwrap();
        add_member(&store, &org.id, &admin, OrgRole::Admin).await;
        add_member(&store, &org.id, &member, OrgRole::Member).await;

        let rename = UpdateOrganizationRequest {
            name: Some("Acme Inc".to_string()),
            logo: None,
        };
        let err = update(&store, &member, Some(&org.id), rename.clone())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_ALLOWED_TO_UPDATE_THIS_ORGANIZATION");
        let renamed = update(&store, &admin, Some(&org.id), rename).await.unwrap();
        assert_eq!(renamed.name, "Acme Inc");
        assert_eq!(renamed.slug, "acme");

        let err = delete(&store, &admin, &org.id).await.unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_ALLOWED_TO_DELETE_THIS_ORGANIZATION");
        delete(&store, &owner, &org.id).await.unwrap();

        assert!(store.find_organization(&org.id).await.unwrap().is_none());
        let owner = refresh(&store, &owner).await;
        assert_eq!(owner.active_organization_id, None);
    }

    #[tokio::test]
    async fn set_active_requires_membership() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = sign_in(&store, "owner@example.com", UserRole::User).await;
        let outsider = sign_in(&store, "x@example.com", UserRole::User).await;
        let org = create(&store, &owner, named("Acme"), now).await.unwrap();

        let err = set_active(&store, &outsider, Some(&org.id)).await.unwrap_err();
        assert_eq!(err.code(), "USER_IS_NOT_A_MEMBER_OF_THE_ORGANIZATION");

        assert!(set_active(&store, &owner, None).await.unwrap().is_none());
        let owner = refresh(&store, &owner).await;
        assert_eq!(owner.active_organization_id, None);

        let full_view = full(&store, &owner, Some(&org.id), now).await.unwrap();
        assert_eq!(full_view.members.len(), 1);
        assert!(full_view.invitations.is_empty());
        assert_eq!(list(&store, &owner).await.unwrap().len(), 1);
    }
}
