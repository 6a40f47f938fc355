use serde::Deserialize;

use super::{require_membership, resolve_organization_id};
use crate::db::OrgStore;
use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::models::{Member, MemberWithUser, OrgRole};
use crate::policy::{self, OrgAction};

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub member_id: String,
    pub role: OrgRole,
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMemberRequest {
    /// A member id, or the member's email address.
    pub member_id_or_email: String,
    #[serde(default)]
    pub organization_id: Option<String>,
}

pub async fn list(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: Option<&str>,
) -> Result<Vec<MemberWithUser>, AppError> {
    let organization_id = resolve_organization_id(actor, organization_id)?;
    require_membership(store, &organization_id, actor).await?;
    Ok(store.list_members(&organization_id).await?)
}

/// The actor's membership in the active organization.
pub async fn active_member(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
) -> Result<Member, AppError> {
    let organization_id = resolve_organization_id(actor, None)?;
    let (_, member) = require_membership(store, &organization_id, actor).await?;
    Ok(member)
}

async fn find_target(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    member_id_or_email: &str,
    organization_id: Option<&str>,
) -> Result<Member, AppError> {
    let not_found = || AppError::not_found("MEMBER_NOT_FOUND", "Member not found");

    let target = if member_id_or_email.contains('@') {
        let organization_id = resolve_organization_id(actor, organization_id)?;
        let user = store
            .find_user_by_email(member_id_or_email)
            .await?
            .ok_or_else(not_found)?;
        store.find_member_by_user(&organization_id, &user.id).await?
    } else {
        store.find_member(member_id_or_email).await?
    }
    .ok_or_else(not_found)?;

    if organization_id.is_some_and(|id| id != target.organization_id) {
        return Err(not_found());
    }
    Ok(target)
}

/// Changes a member's role. The actor must outrank or equal both the
/// member's current role and the new one, and an owner must remain.
pub async fn update_role(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    req: UpdateMemberRoleRequest,
) -> Result<Member, AppError> {
    let target = find_target(store, actor, &req.member_id, req.organization_id.as_deref()).await?;
    let (_, acting) = require_membership(store, &target.organization_id, actor).await?;

    policy::authorize(acting.role, OrgAction::UpdateMemberRole)?;
    policy::authorize_against(acting.role, Some(target.role), Some(req.role))?;

    let members: Vec<Member> = store
        .list_members(&target.organization_id)
        .await?
        .into_iter()
        .map(|m| m.member)
        .collect();
    policy::ensure_owner_retained(&members, &target, Some(req.role))?;

    let updated = store.update_member_role(&target.id, req.role).await?;
    tracing::info!(
        "Member {} of {} is now {} (by {})",
        updated.id,
        updated.organization_id,
        updated.role,
        actor.user_id
    );
    Ok(updated)
}

/// Removes another member. Use [`leave`] to remove yourself.
pub async fn remove(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    req: RemoveMemberRequest,
) -> Result<Member, AppError> {
    let target = find_target(
        store,
        actor,
        &req.member_id_or_email,
        req.organization_id.as_deref(),
    )
    .await?;
    let (_, acting) = require_membership(store, &target.organization_id, actor).await?;

    if target.user_id == actor.user_id {
        return Err(AppError::validation(
            "CANNOT_REMOVE_YOURSELF",
            "Use leave to remove yourself from an organization",
        ));
    }

    policy::authorize(acting.role, OrgAction::RemoveMember)?;
    policy::authorize_against(acting.role, Some(target.role), None)?;

    let members: Vec<Member> = store
        .list_members(&target.organization_id)
        .await?
        .into_iter()
        .map(|m| m.member)
        .collect();
    policy::ensure_owner_retained(&members, &target, None)?;

    let removed = store.delete_member(&target.id).await?;
    tracing::info!(
        "Member {} removed from {} by {}",
        removed.user_id,
        removed.organization_id,
        actor.user_id
    );
    Ok(removed)
}

/// Removes the actor from the organization. The last owner cannot leave.
pub async fn leave(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: &str,
) -> Result<Member, AppError> {
    let (_, member) = require_membership(store, organization_id, actor).await?;

    let members: Vec<Member> = store
        .list_members(organization_id)
        .await?
        .into_iter()
        .map(|m| m.member)
        .collect();
    policy::ensure_owner_retained(&members, &member, None)?;

    let removed = store.delete_member(&member.id).await?;
    tracing::info!("User {} left {}", actor.user_id, organization_id);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::UserRole;
    use crate::testing::{add_member, refresh, seed_org, sign_in};

    struct Fixture {
        store: MemoryStore,
        owner: AuthenticatedUser,
        admin: AuthenticatedUser,
        member: AuthenticatedUser,
        owner_member: Member,
        admin_member: Member,
        member_member: Member,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let owner = sign_in(&store, "owner@example.com", UserRole::User).await;
        let admin = sign_in(&store, "admin@example.com", UserRole::User).await;
        let member = sign_in(&store, "member@example.com", UserRole::User).await;
        seed_org(&store, "org1", &owner).await;
        let owner_member = store
            .find_member_by_user("org1", &owner.user_id)
            .await
            .unwrap()
            .unwrap();
        let admin_member = add_member(&store, "org1", &admin, OrgRole::Admin).await;
        let member_member = add_member(&store, "org1", &member, OrgRole::Member).await;
        Fixture {
            store,
            owner,
            admin,
            member,
            owner_member,
            admin_member,
            member_member,
        }
    }

    fn set_role(member: &Member, role: OrgRole) -> UpdateMemberRoleRequest {
        UpdateMemberRoleRequest {
            member_id: member.id.clone(),
            role,
            organization_id: None,
        }
    }

    fn removal(member: &Member) -> RemoveMemberRequest {
        RemoveMemberRequest {
            member_id_or_email: member.id.clone(),
            organization_id: None,
        }
    }

    #[tokio::test]
    async fn members_cannot_change_or_remove_anyone() {
        let f = fixture().await;

        let err = update_role(&f.store, &f.member, set_role(&f.admin_member, OrgRole::Member))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_ALLOWED_TO_UPDATE_THIS_MEMBER");

        let err = remove(&f.store, &f.member, removal(&f.admin_member))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_ALLOWED_TO_REMOVE_THIS_MEMBER");

        assert_eq!(f.store.list_members("org1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn admins_cannot_touch_owners_or_mint_them() {
        let f = fixture().await;

        let err = remove(&f.store, &f.admin, removal(&f.owner_member))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANNOT_MODIFY_HIGHER_ROLE");

        let err = update_role(&f.store, &f.admin, set_role(&f.member_member, OrgRole::Owner))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANNOT_GRANT_HIGHER_ROLE");

        let promoted = update_role(&f.store, &f.admin, set_role(&f.member_member, OrgRole::Admin))
            .await
            .unwrap();
        assert_eq!(promoted.role, OrgRole::Admin);
    }

    #[tokio::test]
    async fn last_owner_cannot_be_demoted_or_leave() {
        let f = fixture().await;

        let err = update_role(&f.store, &f.owner, set_role(&f.owner_member, OrgRole::Admin))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "LAST_OWNER");

        let err = leave(&f.store, &f.owner, "org1").await.unwrap_err();
        assert_eq!(err.code(), "LAST_OWNER");

        // With a second owner the first may step down.
        update_role(&f.store, &f.owner, set_role(&f.admin_member, OrgRole::Owner))
            .await
            .unwrap();
        let demoted = update_role(&f.store, &f.owner, set_role(&f.owner_member, OrgRole::Member))
            .await
            .unwrap();
        assert_eq!(demoted.role, OrgRole::Member);
    }

    #[tokio::test]
    async fn remove_refuses_self_and_accepts_email() {
        let f = fixture().await;

        let err = remove(&f.store, &f.owner, removal(&f.owner_member))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CANNOT_REMOVE_YOURSELF");

        let removed = remove(
            &f.store,
            &f.owner,
            RemoveMemberRequest {
                member_id_or_email: "member@example.com".to_string(),
                organization_id: Some("org1".to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(removed.user_id, f.member.user_id);
        assert_eq!(f.store.list_members("org1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn leaving_clears_the_active_organization() {
        let f = fixture().await;
        f.store
            .set_active_organization(&f.member.session_id, Some("org1"))
            .await
            .unwrap();
        let member = refresh(&f.store, &f.member).await;
        assert_eq!(active_member(&f.store, &member).await.unwrap().id, f.member_member.id);

        leave(&f.store, &member, "org1").await.unwrap();

        let member = refresh(&f.store, &member).await;
        assert_eq!(member.active_organization_id, None);
        let err = list(&f.store, &f.member, Some("org1")).await.unwrap_err();
        assert_eq!(err.code(), "USER_IS_NOT_A_MEMBER_OF_THE_ORGANIZATION");
    }
}
