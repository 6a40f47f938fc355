//! Organization authorization rules.
//!
//! Pure functions only: no IO, no panics. Every mutating service call runs
//! these checks on the server, whatever the UI disabled.

use crate::models::{Member, OrgRole};

/// Organization-scoped mutations that need a minimum role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrgAction {
    Invite,
    CancelInvitation,
    UpdateMemberRole,
    RemoveMember,
    UpdateOrganization,
    DeleteOrganization,
}

impl OrgAction {
    pub const ALL: [OrgAction; 6] = [
        OrgAction::Invite,
        OrgAction::CancelInvitation,
        OrgAction::UpdateMemberRole,
        OrgAction::RemoveMember,
        OrgAction::UpdateOrganization,
        OrgAction::DeleteOrganization,
    ];

    /// Lowest role allowed to perform the action.
    pub fn minimum_role(&self) -> OrgRole {
        match self {
            OrgAction::DeleteOrganization => OrgRole::Owner,
            _ => OrgRole::Admin,
        }
    }

    fn denial_code(&self) -> &'static str {
        match self {
            OrgAction::Invite => "YOU_ARE_NOT_ALLOWED_TO_INVITE_USERS_TO_THIS_ORGANIZATION",
            OrgAction::CancelInvitation => "YOU_ARE_NOT_ALLOWED_TO_CANCEL_THIS_INVITATION",
            OrgAction::UpdateMemberRole => "YOU_ARE_NOT_ALLOWED_TO_UPDATE_THIS_MEMBER",
            OrgAction::RemoveMember => "YOU_ARE_NOT_ALLOWED_TO_REMOVE_THIS_MEMBER",
            OrgAction::UpdateOrganization => "YOU_ARE_NOT_ALLOWED_TO_UPDATE_THIS_ORGANIZATION",
            OrgAction::DeleteOrganization => "YOU_ARE_NOT_ALLOWED_TO_DELETE_THIS_ORGANIZATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("Your role does not allow this action")]
    NotAllowed(OrgAction),

    #[error("You cannot modify a member with a higher role than yours")]
    TargetOutranksActor,

    #[error("You cannot grant a role higher than your own")]
    RoleAboveActor,

    #[error("An organization must keep at least one owner")]
    LastOwner,
}

impl PolicyViolation {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyViolation::NotAllowed(action) => action.denial_code(),
            PolicyViolation::TargetOutranksActor => "CANNOT_MODIFY_HIGHER_ROLE",
            PolicyViolation::RoleAboveActor => "CANNOT_GRANT_HIGHER_ROLE",
            PolicyViolation::LastOwner => "LAST_OWNER",
        }
    }
}

pub fn can_mutate(role: OrgRole, action: OrgAction) -> bool {
    role >= action.minimum_role()
}

pub fn authorize(role: OrgRole, action: OrgAction) -> Result<(), PolicyViolation> {
    if can_mutate(role, action) {
        Ok(())
    } else {
        Err(PolicyViolation::NotAllowed(action))
    }
}

/// Ranking rule for acting on another member or handing out a role:
/// the target's current role and the granted role must not exceed the
/// actor's own.
pub fn authorize_against(
    actor: OrgRole,
    target: Option<OrgRole>,
    granted: Option<OrgRole>,
) -> Result<(), PolicyViolation> {
    if target.is_some_and(|target| target > actor) {
        return Err(PolicyViolation::TargetOutranksActor);
    }
    if granted.is_some_and(|granted| granted > actor) {
        return Err(PolicyViolation::RoleAboveActor);
    }
    Ok(())
}

/// Checks that changing `target` to `new_role` (`None` = removal) leaves
/// at least one owner among `members`.
pub fn ensure_owner_retained(
    members: &[Member],
    target: &Member,
    new_role: Option<OrgRole>,
) -> Result<(), PolicyViolation> {
    if target.role != OrgRole::Owner || new_role == Some(OrgRole::Owner) {
        return Ok(());
    }

    let remaining_owners = members
        .iter()
        .filter(|m| m.role == OrgRole::Owner && m.id != target.id)
        .count();

    if remaining_owners == 0 {
        Err(PolicyViolation::LastOwner)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn member(id: &str, role: OrgRole) -> Member {
        Member {
            id: id.to_string(),
            organization_id: "org1".to_string(),
            user_id: format!("user-{id}"),
            role,
            created_at: Utc::now(),
        }
    }

    fn any_role() -> impl Strategy<Value = OrgRole> {
        prop_oneof![
            Just(OrgRole::Member),
            Just(OrgRole::Admin),
            Just(OrgRole::Owner)
        ]
    }

    fn any_action() -> impl Strategy<Value = OrgAction> {
        (0..OrgAction::ALL.len()).prop_map(|i| OrgAction::ALL[i])
    }

    #[test]
    fn members_cannot_mutate_anything() {
        for action in OrgAction::ALL {
            assert!(!can_mutate(OrgRole::Member, action), "{action:?}");
            assert_eq!(
                authorize(OrgRole::Member, action),
                Err(PolicyViolation::NotAllowed(action))
            );
        }
    }

    #[test]
    fn admins_cannot_delete_the_organization() {
        assert!(can_mutate(OrgRole::Admin, OrgAction::Invite));
        assert!(can_mutate(OrgRole::Admin, OrgAction::RemoveMember));
        assert!(can_mutate(OrgRole::Admin, OrgAction::UpdateMemberRole));
        assert!(!can_mutate(OrgRole::Admin, OrgAction::DeleteOrganization));
        assert!(can_mutate(OrgRole::Owner, OrgAction::DeleteOrganization));
    }

    #[test]
    fn admin_cannot_touch_owner_or_create_one() {
        assert_eq!(
            authorize_against(OrgRole::Admin, Some(OrgRole::Owner), Some(OrgRole::Member)),
            Err(PolicyViolation::TargetOutranksActor)
        );
        assert_eq!(
            authorize_against(OrgRole::Admin, Some(OrgRole::Member), Some(OrgRole::Owner)),
            Err(PolicyViolation::RoleAboveActor)
        );
        assert!(authorize_against(OrgRole::Admin, Some(OrgRole::Member), Some(OrgRole::Admin)).is_ok());
    }

    #[test]
    fn sole_owner_cannot_be_demoted_or_removed() {
        let owner = member("m1", OrgRole::Owner);
        let members = vec![owner.clone(), member("m2", OrgRole::Admin)];

        assert_eq!(
            ensure_owner_retained(&members, &owner, Some(OrgRole::Admin)),
            Err(PolicyViolation::LastOwner)
        );
        assert_eq!(
            ensure_owner_retained(&members, &owner, None),
            Err(PolicyViolation::LastOwner)
        );
        assert!(ensure_owner_retained(&members, &owner, Some(OrgRole::Owner)).is_ok());
    }

    #[test]
    fn second_owner_allows_demotion() {
        let owner = member("m1", OrgRole::Owner);
        let members = vec![owner.clone(), member("m2", OrgRole::Owner)];
        assert!(ensure_owner_retained(&members, &owner, Some(OrgRole::Member)).is_ok());
        assert!(ensure_owner_retained(&members, &owner, None).is_ok());
    }

    proptest! {
        #[test]
        fn higher_roles_keep_every_permission_of_lower_roles(
            low in any_role(),
            high in any_role(),
            action in any_action(),
        ) {
            prop_assume!(low <= high);
            if can_mutate(low, action) {
                prop_assert!(can_mutate(high, action));
            }
        }

        #[test]
        fn accepted_changes_never_exceed_the_actor(
            actor in any_role(),
            target in any_role(),
            granted in any_role(),
        ) {
            if authorize_against(actor, Some(target), Some(granted)).is_ok() {
                prop_assert!(target <= actor);
                prop_assert!(granted <= actor);
            }
        }
    }
}
