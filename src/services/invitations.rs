use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{require_membership, resolve_organization_id};
use crate::config::Config;
use crate::db::{NewInvitation, NewMember, OrgStore, StoreError};
use crate::error::{AppError, invitation_not_pending};
use crate::mail::{EmailSender, InvitationEmail};
use crate::middleware::AuthenticatedUser;
use crate::models::{Invitation, InvitationStatus, Member, OrgRole, Organization};
use crate::policy::{self, OrgAction};
use crate::utils::{generate_id, normalize_email};

// ============================================
// Request / Response Types
// ============================================

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InviteMemberRequest {
    #[validate(email)]
    pub email: String,
    pub role: OrgRole,
    /// Defaults to the active organization.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Re-send the email of an existing pending invitation.
    #[serde(default)]
    pub resend: bool,
}

/// An invitation with the organization it leads to.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationDetails {
    #[serde(flatten)]
    pub invitation: Invitation,
    pub organization_name: String,
    pub organization_slug: String,
    pub organization_logo: Option<String>,
    pub inviter_name: Option<String>,
    pub inviter_email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedInvitation {
    pub invitation: Invitation,
    pub member: Member,
}

// ============================================
// Issue / resend
// ============================================

/// Creates a pending invitation (or refreshes one on resend) and emails the
/// accept link. A mail failure is reported but the invitation is kept.
pub async fn issue(
    store: &dyn OrgStore,
    mailer: &dyn EmailSender,
    config: &Config,
    actor: &AuthenticatedUser,
    mut req: InviteMemberRequest,
    now: DateTime<Utc>,
) -> Result<Invitation, AppError> {
    req.email = normalize_email(&req.email);
    req.validate()?;
    let email = req.email.clone();

    if req.role == OrgRole::Owner {
        return Err(AppError::validation(
            "INVALID_ROLE",
            "Invitations can grant the admin or member role only",
        ));
    }

    let organization_id = resolve_organization_id(actor, req.organization_id.as_deref())?;
    let (organization, member) = require_membership(store, &organization_id, actor).await?;
    policy::authorize(member.role, OrgAction::Invite)?;
    policy::authorize_against(member.role, None, Some(req.role))?;

    if let Some(invitee) = store.find_user_by_email(&email).await?
        && store
            .find_member_by_user(&organization_id, &invitee.id)
            .await?
            .is_some()
    {
        return Err(AppError::conflict(
            "USER_IS_ALREADY_A_MEMBER_OF_THIS_ORGANIZATION",
            "User is already a member of this organization",
        ));
    }

    let expires_at = now + Duration::seconds(config.invitation_expires_in_secs);

    let invitation = match store.find_pending_invitation(&organization_id, &email).await? {
        Some(existing) if !existing.is_expired(now) => {
            if !req.resend {
                return Err(AppError::conflict(
                    "USER_IS_ALREADY_INVITED_TO_THIS_ORGANIZATION",
                    "User is already invited to this organization",
                ));
            }
            tracing::info!("Resending invitation {} to {}", existing.id, email);
            store.refresh_invitation(&existing.id, expires_at).await?
        }
        stale => {
            if let Some(expired) = stale {
                // Frees the pending slot for (organization, email).
                store
                    .transition_invitation(&expired.id, InvitationStatus::Canceled, None)
                    .await?;
            }

            let pending = store.count_valid_invitations(&organization_id, now).await?;
            if pending >= config.invitation_limit {
                return Err(AppError::forbidden(
                    "INVITATION_LIMIT_REACHED",
                    "This organization has reached its invitation limit",
                ));
            }

            store
                .create_invitation(NewInvitation {
                    id: generate_id(),
                    organization_id: organization_id.clone(),
                    email: email.clone(),
                    role: req.role,
                    inviter_id: actor.user_id.clone(),
                    expires_at,
                    created_at: now,
                })
                .await
                .map_err(|e| match e {
                    StoreError::Duplicate(_) => AppError::conflict(
                        "USER_IS_ALREADY_INVITED_TO_THIS_ORGANIZATION",
                        "User is already invited to this organization",
                    ),
                    other => other.into(),
                })?
        }
    };

    send_invitation_email(mailer, config, actor, &organization, &invitation).await?;

    tracing::info!(
        invitation_id = %invitation.id,
        organization_id = %organization_id,
        role = %invitation.role,
        "Invitation issued"
    );
    Ok(invitation)
}

async fn send_invitation_email(
    mailer: &dyn EmailSender,
    config: &Config,
    inviter: &AuthenticatedUser,
    organization: &Organization,
    invitation: &Invitation,
) -> Result<(), AppError> {
    let email = InvitationEmail {
        app_name: &config.app_name,
        base_url: &config.base_url,
        invitation_id: &invitation.id,
        recipient: &invitation.email,
        inviter_name: &inviter.name,
        inviter_email: &inviter.email,
        organization_name: &organization.name,
        organization_logo: organization.logo.as_deref(),
    };

    mailer
        .send(&invitation.email, &email.subject(), &email.render_html())
        .await?;
    Ok(())
}

// ============================================
// Recipient actions
// ============================================

async fn find_for_recipient(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    invitation_id: &str,
) -> Result<Invitation, AppError> {
    let invitation = store
        .find_invitation(invitation_id)
        .await?
        .ok_or_else(|| AppError::not_found("INVITATION_NOT_FOUND", "Invitation not found"))?;

    if !invitation.email.eq_ignore_ascii_case(&actor.email) {
        return Err(AppError::forbidden(
            "YOU_ARE_NOT_THE_RECIPIENT_OF_THE_INVITATION",
            "You are not the recipient of this invitation",
        ));
    }
    Ok(invitation)
}

fn ensure_valid(invitation: &Invitation, now: DateTime<Utc>) -> Result<(), AppError> {
    if invitation.status.is_terminal() {
        return Err(invitation_not_pending(invitation.status));
    }
    if invitation.is_expired(now) {
        return Err(AppError::InvitationExpired);
    }
    Ok(())
}

/// Invitation shown on the accept page. Only valid invitations are shown.
pub async fn get(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    invitation_id: &str,
    now: DateTime<Utc>,
) -> Result<InvitationDetails, AppError> {
    let invitation = find_for_recipient(store, actor, invitation_id).await?;
    ensure_valid(&invitation, now)?;

    let organization = store
        .find_organization(&invitation.organization_id)
        .await?
        .ok_or_else(|| AppError::not_found("ORGANIZATION_NOT_FOUND", "Organization not found"))?;
    let inviter = store.find_user(&invitation.inviter_id).await?;

    Ok(InvitationDetails {
        organization_name: organization.name,
        organization_slug: organization.slug,
        organization_logo: organization.logo,
        inviter_name: inviter.as_ref().map(|u| u.name.clone()),
        inviter_email: inviter.map(|u| u.email),
        invitation,
    })
}

/// Joins the organization and makes it the session's active organization.
pub async fn accept(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    invitation_id: &str,
    now: DateTime<Utc>,
) -> Result<AcceptedInvitation, AppError> {
    let invitation = find_for_recipient(store, actor, invitation_id).await?;

    // Status, expiry and membership are re-checked inside the store write.
    let (invitation, member) = store
        .accept_invitation(
            &invitation.id,
            NewMember {
                id: generate_id(),
                user_id: actor.user_id.clone(),
                role: invitation.role,
                created_at: now,
            },
            now,
        )
        .await?;

    store
        .set_active_organization(&actor.session_id, Some(&invitation.organization_id))
        .await?;

    tracing::info!(
        "User {} joined organization {} as {}",
        actor.user_id,
        invitation.organization_id,
        member.role
    );
    Ok(AcceptedInvitation { invitation, member })
}

pub async fn reject(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    invitation_id: &str,
    now: DateTime<Utc>,
) -> Result<Invitation, AppError> {
    let invitation = find_for_recipient(store, actor, invitation_id).await?;
    let invitation = store
        .transition_invitation(&invitation.id, InvitationStatus::Rejected, Some(now))
        .await?;

    tracing::info!("Invitation {} rejected by {}", invitation.id, actor.user_id);
    Ok(invitation)
}

// ============================================
// Organization-side actions
// ============================================

/// Admins and owners may cancel any pending invitation; members only their own.
pub async fn cancel(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    invitation_id: &str,
) -> Result<Invitation, AppError> {
    let invitation = store
        .find_invitation(invitation_id)
        .await?
        .ok_or_else(|| AppError::not_found("INVITATION_NOT_FOUND", "Invitation not found"))?;

    let (_, member) = require_membership(store, &invitation.organization_id, actor).await?;
    if invitation.inviter_id != actor.user_id {
        policy::authorize(member.role, OrgAction::CancelInvitation)?;
    }

    let invitation = store
        .transition_invitation(&invitation.id, InvitationStatus::Canceled, None)
        .await?;

    tracing::info!("Invitation {} canceled by {}", invitation.id, actor.user_id);
    Ok(invitation)
}

/// Valid pending invitations of one organization.
pub async fn list(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    organization_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<Invitation>, AppError> {
    let organization_id = resolve_organization_id(actor, organization_id)?;
    require_membership(store, &organization_id, actor).await?;

    Ok(store
        .list_invitations(&organization_id)
        .await?
        .into_iter()
        .filter(|i| i.is_valid(now))
        .collect())
}

/// Valid pending invitations addressed to the actor.
pub async fn list_for_user(
    store: &dyn OrgStore,
    actor: &AuthenticatedUser,
    now: DateTime<Utc>,
) -> Result<Vec<InvitationDetails>, AppError> {
    let mut details = Vec::new();
    for invitation in store.list_invitations_for_email(&actor.email).await? {
        if !invitation.is_valid(now) {
            continue;
        }
        let Some(organization) = store.find_organization(&invitation.organization_id).await? else {
            continue;
        };
        let inviter = store.find_user(&invitation.inviter_id).await?;
        details.push(InvitationDetails {
            organization_name: organization.name,
            organization_slug: organization.slug,
            organization_logo: organization.logo,
            inviter_name: inviter.as_ref().map(|u| u.name.clone()),
            inviter_email: inviter.map(|u| u.email),
            invitation,
        });
    }
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::mail::testing::RecordingSender;
    use crate::models::UserRole;
    use crate::testing::{add_member, pending_invitation, refresh, seed_org, sign_in};

    fn invite(email: &str, role: OrgRole) -> InviteMemberRequest {
        InviteMemberRequest {
            email: email.to_string(),
            role,
            organization_id: Some("org1".to_string()),
            resend: false,
        }
    }

    async fn org_with_owner(store: &MemoryStore) -> AuthenticatedUser {
        let owner = sign_in(store, "owner@example.com", UserRole::User).await;
        seed_org(store, "org1", &owner).await;
        owner
    }

    #[tokio::test]
    async fn accepting_a_valid_invitation_creates_the_membership() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let accepted = accept(&store, &invitee, "inv1", now).await.unwrap();

        assert_eq!(accepted.invitation.status, InvitationStatus::Accepted);
        assert_eq!(accepted.member.organization_id, "org1");
        assert_eq!(accepted.member.user_id, invitee.user_id);
        assert_eq!(accepted.member.role, OrgRole::Member);

        let stored = store.find_invitation("inv1").await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);
        let invitee = refresh(&store, &invitee).await;
        assert_eq!(invitee.active_organization_id.as_deref(), Some("org1"));
    }

    #[tokio::test]
    async fn expired_invitation_is_refused_without_membership() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now - Duration::seconds(1),
            ))
            .await;

        let err = accept(&store, &invitee, "inv1", now).await.unwrap_err();
        assert!(matches!(err, AppError::InvitationExpired));
        assert_eq!(err.to_string(), "invitation expired");

        assert!(
            store
                .find_member_by_user("org1", &invitee.user_id)
                .await
                .unwrap()
                .is_none()
        );
        let stored = store.find_invitation("inv1").await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_invitations_cannot_be_answered_again() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        reject(&store, &invitee, "inv1", now).await.unwrap();

        let err = accept(&store, &invitee, "inv1", now).await.unwrap_err();
        assert_eq!(err.code(), "INVITATION_ALREADY_REJECTED");
        let err = reject(&store, &invitee, "inv1", now).await.unwrap_err();
        assert_eq!(err.code(), "INVITATION_ALREADY_REJECTED");
        assert!(
            store
                .find_member_by_user("org1", &invitee.user_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrent_accepts_create_one_membership() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let (first, second) = tokio::join!(
            accept(&store, &invitee, "inv1", now),
            accept(&store, &invitee, "inv1", now)
        );

        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
        let loser = first.err().or(second.err()).unwrap();
        assert_eq!(loser.code(), "INVITATION_ALREADY_ACCEPTED");

        let members = store.list_members("org1").await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn accept_racing_reject_settles_on_one_outcome() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let (accepted, rejected) = tokio::join!(
            accept(&store, &invitee, "inv1", now),
            reject(&store, &invitee, "inv1", now)
        );

        let members = store.list_members("org1").await.unwrap();
        let stored = store.find_invitation("inv1").await.unwrap().unwrap();
        match (accepted, rejected) {
            (Ok(_), Err(loser)) => {
                assert_eq!(loser.code(), "INVITATION_ALREADY_ACCEPTED");
                assert_eq!(stored.status, InvitationStatus::Accepted);
                assert_eq!(members.len(), 2);
            }
            (Err(loser), Ok(_)) => {
                assert_eq!(loser.code(), "INVITATION_ALREADY_REJECTED");
                assert_eq!(stored.status, InvitationStatus::Rejected);
                assert_eq!(members.len(), 1);
            }
            (a, r) => panic!("expected exactly one winner, got {:?} / {:?}", a.is_ok(), r.is_ok()),
        }
    }

    #[tokio::test]
    async fn accept_racing_cancel_settles_on_one_outcome() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let (canceled, accepted) = tokio::join!(
            cancel(&store, &owner, "inv1"),
            accept(&store, &invitee, "inv1", now)
        );

        let members = store.list_members("org1").await.unwrap();
        let stored = store.find_invitation("inv1").await.unwrap().unwrap();
        match (canceled, accepted) {
            (Ok(_), Err(loser)) => {
                assert_eq!(loser.code(), "INVITATION_ALREADY_CANCELED");
                assert_eq!(stored.status, InvitationStatus::Canceled);
                assert_eq!(members.len(), 1);
            }
            (Err(loser), Ok(_)) => {
                assert_eq!(loser.code(), "INVITATION_ALREADY_ACCEPTED");
                assert_eq!(stored.status, InvitationStatus::Accepted);
                assert_eq!(members.len(), 2);
            }
            (c, a) => panic!("expected exactly one winner, got {:?} / {:?}", c.is_ok(), a.is_ok()),
        }
    }

    #[tokio::test]
    async fn existing_member_cannot_accept_and_invitation_stays_pending() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        add_member(&store, "org1", &invitee, OrgRole::Member).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let err = accept(&store, &invitee, "inv1", now).await.unwrap_err();
        assert_eq!(err.code(), "ALREADY_A_MEMBER");
        let stored = store.find_invitation("inv1").await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
    }

    #[tokio::test]
    async fn only_the_recipient_may_answer() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let stranger = sign_in(&store, "x@y.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let err = accept(&store, &stranger, "inv1", now).await.unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_THE_RECIPIENT_OF_THE_INVITATION");
        let err = get(&store, &stranger, "inv1", now).await.unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_THE_RECIPIENT_OF_THE_INVITATION");
    }

    #[tokio::test]
    async fn issuing_sends_the_accept_link() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::default();
        let config = Config::default();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;

        let invitation = issue(
            &store,
            &mailer,
            &config,
            &owner,
            invite(" A@B.com ", OrgRole::Admin),
            now,
        )
        .await
        .unwrap();

        assert_eq!(invitation.email, "a@b.com");
        assert_eq!(invitation.status, InvitationStatus::Pending);
        assert_eq!(
            invitation.expires_at,
            now + Duration::seconds(config.invitation_expires_in_secs)
        );

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@b.com");
        assert_eq!(sent[0].subject, "Orgflow - Invitation to join organization");
        assert!(
            sent[0]
                .html
                .contains(&format!("/accept-invitation/{}", invitation.id))
        );
    }

    #[tokio::test]
    async fn members_cannot_invite() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::default();
        let now = Utc::now();
        org_with_owner(&store).await;
        let member = sign_in(&store, "m@example.com", UserRole::User).await;
        add_member(&store, "org1", &member, OrgRole::Member).await;

        let err = issue(
            &store,
            &mailer,
            &Config::default(),
            &member,
            invite("a@b.com", OrgRole::Member),
            now,
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.code(),
            "YOU_ARE_NOT_ALLOWED_TO_INVITE_USERS_TO_THIS_ORGANIZATION"
        );
        assert!(store.list_invitations("org1").await.unwrap().is_empty());
        assert!(mailer.sent().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_invite_conflicts_and_resend_refreshes_expiry() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::default();
        let config = Config::default();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;

        let first = issue(&store, &mailer, &config, &owner, invite("a@b.com", OrgRole::Member), now)
            .await
            .unwrap();

        let err = issue(&store, &mailer, &config, &owner, invite("a@b.com", OrgRole::Member), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "USER_IS_ALREADY_INVITED_TO_THIS_ORGANIZATION");

        let later = now + Duration::hours(1);
        let mut again = invite("a@b.com", OrgRole::Member);
        again.resend = true;
        let resent = issue(&store, &mailer, &config, &owner, again, later)
            .await
            .unwrap();

        assert_eq!(resent.id, first.id);
        assert!(resent.expires_at > first.expires_at);
        assert_eq!(mailer.sent().await.len(), 2);
        assert_eq!(store.list_invitations("org1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_pending_invitation_is_replaced() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::default();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        store
            .seed_invitation(pending_invitation(
                "old",
                "org1",
                "a@b.com",
                &owner.user_id,
                now - Duration::seconds(1),
            ))
            .await;

        let fresh = issue(
            &store,
            &mailer,
            &Config::default(),
            &owner,
            invite("a@b.com", OrgRole::Member),
            now,
        )
        .await
        .unwrap();

        assert_ne!(fresh.id, "old");
        let old = store.find_invitation("old").await.unwrap().unwrap();
        assert_eq!(old.status, InvitationStatus::Canceled);
    }

    #[tokio::test]
    async fn invitation_survives_mail_failure() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::failing();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;

        let err = issue(
            &store,
            &mailer,
            &Config::default(),
            &owner,
            invite("a@b.com", OrgRole::Member),
            now,
        )
        .await
        .unwrap_err();

        assert_eq!(err.code(), "EMAIL_SEND_FAILED");
        assert_eq!(list(&store, &owner, Some("org1"), now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_role_cannot_be_invited_and_existing_members_are_refused() {
        let store = MemoryStore::new();
        let mailer = RecordingSender::default();
        let config = Config::default();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let member = sign_in(&store, "m@example.com", UserRole::User).await;
        add_member(&store, "org1", &member, OrgRole::Member).await;

        let err = issue(&store, &mailer, &config, &owner, invite("x@y.com", OrgRole::Owner), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ROLE");

        let err = issue(
            &store,
            &mailer,
            &config,
            &owner,
            invite("m@example.com", OrgRole::Member),
            now,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "USER_IS_ALREADY_A_MEMBER_OF_THIS_ORGANIZATION");
    }

    #[tokio::test]
    async fn cancel_needs_admin_or_the_inviter() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let member = sign_in(&store, "m@example.com", UserRole::User).await;
        add_member(&store, "org1", &member, OrgRole::Member).await;
        store
            .seed_invitation(pending_invitation(
                "inv1",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(7),
            ))
            .await;

        let err = cancel(&store, &member, "inv1").await.unwrap_err();
        assert_eq!(err.code(), "YOU_ARE_NOT_ALLOWED_TO_CANCEL_THIS_INVITATION");

        let canceled = cancel(&store, &owner, "inv1").await.unwrap();
        assert_eq!(canceled.status, InvitationStatus::Canceled);

        let err = cancel(&store, &owner, "inv1").await.unwrap_err();
        assert_eq!(err.code(), "INVITATION_ALREADY_CANCELED");
    }

    #[tokio::test]
    async fn listings_hide_expired_and_answered_invitations() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let owner = org_with_owner(&store).await;
        let invitee = sign_in(&store, "a@b.com", UserRole::User).await;
        store
            .seed_invitation(pending_invitation(
                "live",
                "org1",
                "a@b.com",
                &owner.user_id,
                now + Duration::days(1),
            ))
            .await;
        let mut stale = pending_invitation(
            "stale",
            "org1",
            "a@b.com",
            &owner.user_id,
            now - Duration::seconds(1),
        );
        stale.email = "c@d.com".to_string();
        store.seed_invitation(stale).await;

        let org_view = list(&store, &owner, Some("org1"), now).await.unwrap();
        assert_eq!(org_view.len(), 1);
        assert_eq!(org_view[0].id, "live");

        let mine = list_for_user(&store, &invitee, now).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].organization_name, "Org org1");
    }
}
