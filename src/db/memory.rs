// In-process store used by the test suite and by local runs without
// DATABASE_URL. One mutex guards all tables, so every trait call is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    Ban, NewInvitation, NewMember, NewOrganization, NewUser, OrgStore, OrganizationUpdate,
    SortDirection, StoreError, StoreResult, UserQuery, UserSortField, transition_failure,
};
use crate::models::organization::MemberUser;
use crate::models::{
    ApiKey, Invitation, InvitationStatus, Member, MemberWithUser, OrgRole, Organization, Session,
    User, UserRole,
};

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    passwords: HashMap<String, String>,
    sessions: HashMap<String, Session>,
    organizations: HashMap<String, Organization>,
    members: HashMap<String, Member>,
    invitations: HashMap<String, Invitation>,
    api_keys: HashMap<String, ApiKey>,
}

impl Tables {
    fn owners_after(&self, target: &Member, new_role: Option<OrgRole>) -> usize {
        self.members
            .values()
            .filter(|m| m.organization_id == target.organization_id)
            .filter(|m| {
                if m.id == target.id {
                    new_role == Some(OrgRole::Owner)
                } else {
                    m.role == OrgRole::Owner
                }
            })
            .count()
    }

    fn is_member(&self, organization_id: &str, user_id: &str) -> bool {
        self.members
            .values()
            .any(|m| m.organization_id == organization_id && m.user_id == user_id)
    }
}

fn sorted<T: Clone>(
    items: impl Iterator<Item = T>,
    key: impl Fn(&T) -> (DateTime<Utc>, String),
) -> Vec<T> {
    let mut items: Vec<T> = items.collect();
    items.sort_by_key(|item| key(item));
    items
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Password hash stored for a user, if any.
    #[cfg(test)]
    pub async fn password_hash(&self, user_id: &str) -> Option<String> {
        self.tables.lock().await.passwords.get(user_id).cloned()
    }

    /// Inserts an invitation row as-is, bypassing creation rules.
    #[cfg(test)]
    pub async fn seed_invitation(&self, invitation: Invitation) {
        self.tables
            .lock()
            .await
            .invitations
            .insert(invitation.id.clone(), invitation);
    }

    /// Inserts a member row as-is.
    #[cfg(test)]
    pub async fn seed_member(&self, member: Member) {
        self.tables
            .lock()
            .await
            .members
            .insert(member.id.clone(), member);
    }
}

#[async_trait]
impl OrgStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().await.users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, u64)> {
        let tables = self.tables.lock().await;
        let needle = query.search.as_deref().map(str::to_lowercase);

        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|u| match &needle {
                Some(n) => u.name.to_lowercase().contains(n) || u.email.to_lowercase().contains(n),
                None => true,
            })
            .cloned()
            .collect();

        users.sort_by(|a, b| {
            let ordering = match query.sort_by {
                UserSortField::Name => a.name.cmp(&b.name),
                UserSortField::Email => a.email.cmp(&b.email),
                UserSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            }
            .then_with(|| a.id.cmp(&b.id));
            match query.sort_direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });

        let total = users.len() as u64;
        let page = users
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        if tables
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::Duplicate("user"));
        }

        let created = User {
            id: user.id,
            name: user.name,
            email: user.email,
            email_verified: user.email_verified,
            image: None,
            role: user.role,
            banned: false,
            ban_reason: None,
            ban_expires: None,
            two_factor_enabled: false,
            created_at: user.created_at,
        };
        if let Some(hash) = user.password_hash {
            tables.passwords.insert(created.id.clone(), hash);
        }
        tables.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn set_user_role(&self, user_id: &str, role: UserRole) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or(StoreError::NotFound("user"))?;
        user.role = role;
        Ok(user.clone())
    }

    async fn set_user_ban(&self, user_id: &str, ban: Option<Ban>) -> StoreResult<User> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(user_id)
            .ok_or(StoreError::NotFound("user"))?;
        match ban {
            Some(ban) => {
                user.banned = true;
                user.ban_reason = ban.reason;
                user.ban_expires = ban.expires;
            }
            None => {
                user.banned = false;
                user.ban_reason = None;
                user.ban_expires = None;
            }
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.remove(user_id).is_none() {
            return Err(StoreError::NotFound("user"));
        }
        tables.passwords.remove(user_id);
        tables.sessions.retain(|_, s| s.user_id != user_id);
        tables.members.retain(|_, m| m.user_id != user_id);
        tables.api_keys.retain(|_, k| k.user_id != user_id);
        tables.invitations.retain(|_, i| i.inviter_id != user_id);
        Ok(())
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<(Session, User)>> {
        let tables = self.tables.lock().await;
        let found = tables
            .sessions
            .values()
            .find(|s| s.token == token)
            .and_then(|s| tables.users.get(&s.user_id).map(|u| (s.clone(), u.clone())));
        Ok(found)
    }

    async fn find_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.tables.lock().await.sessions.get(session_id).cloned())
    }

    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&session.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        tables.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn list_user_sessions(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables.sessions.values().filter(|s| s.user_id == user_id).cloned(),
            |s| (s.created_at, s.id.clone()),
        ))
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        Ok(self.tables.lock().await.sessions.remove(session_id).is_some())
    }

    async fn delete_user_sessions(&self, user_id: &str) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn set_active_organization(
        &self,
        session_id: &str,
        organization_id: Option<&str>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let session = tables
            .sessions
            .get_mut(session_id)
            .ok_or(StoreError::NotFound("session"))?;
        session.active_organization_id = organization_id.map(str::to_string);
        Ok(())
    }

    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewMember,
    ) -> StoreResult<(Organization, Member)> {
        let mut tables = self.tables.lock().await;
        if tables
            .organizations
            .values()
            .any(|o| o.slug == organization.slug)
        {
            return Err(StoreError::Duplicate("organization slug"));
        }

        let created = Organization {
            id: organization.id,
            name: organization.name,
            slug: organization.slug,
            logo: organization.logo,
            created_at: organization.created_at,
        };
        let member = Member {
            id: owner.id,
            organization_id: created.id.clone(),
            user_id: owner.user_id,
            role: owner.role,
            created_at: owner.created_at,
        };
        tables
            .organizations
            .insert(created.id.clone(), created.clone());
        tables.members.insert(member.id.clone(), member.clone());
        Ok((created, member))
    }

    async fn find_organization(&self, organization_id: &str) -> StoreResult<Option<Organization>> {
        Ok(self
            .tables
            .lock()
            .await
            .organizations
            .get(organization_id)
            .cloned())
    }

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .organizations
            .values()
            .find(|o| o.slug == slug)
            .cloned())
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        let tables = self.tables.lock().await;
        Ok(sorted(tables.organizations.values().cloned(), |o| {
            (o.created_at, o.id.clone())
        }))
    }

    async fn list_user_organizations(&self, user_id: &str) -> StoreResult<Vec<Organization>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .members
                .values()
                .filter(|m| m.user_id == user_id)
                .filter_map(|m| tables.organizations.get(&m.organization_id).cloned()),
            |o| (o.created_at, o.id.clone()),
        ))
    }

    async fn update_organization(
        &self,
        organization_id: &str,
        update: OrganizationUpdate,
    ) -> StoreResult<Organization> {
        let mut tables = self.tables.lock().await;
        let organization = tables
            .organizations
            .get_mut(organization_id)
            .ok_or(StoreError::NotFound("organization"))?;
        if let Some(name) = update.name {
            organization.name = name;
        }
        if let Some(logo) = update.logo {
            organization.logo = Some(logo);
        }
        Ok(organization.clone())
    }

    async fn delete_organization(&self, organization_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.organizations.remove(organization_id).is_none() {
            return Err(StoreError::NotFound("organization"));
        }
        tables
            .members
            .retain(|_, m| m.organization_id != organization_id);
        tables
            .invitations
            .retain(|_, i| i.organization_id != organization_id);
        for session in tables.sessions.values_mut() {
            if session.active_organization_id.as_deref() == Some(organization_id) {
                session.active_organization_id = None;
            }
        }
        Ok(())
    }

    async fn find_member(&self, member_id: &str) -> StoreResult<Option<Member>> {
        Ok(self.tables.lock().await.members.get(member_id).cloned())
    }

    async fn find_member_by_user(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Member>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .values()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, organization_id: &str) -> StoreResult<Vec<MemberWithUser>> {
        let tables = self.tables.lock().await;
        let members = sorted(
            tables
                .members
                .values()
                .filter(|m| m.organization_id == organization_id)
                .cloned(),
            |m| (m.created_at, m.id.clone()),
        );
        Ok(members
            .into_iter()
            .filter_map(|member| {
                let user = tables.users.get(&member.user_id)?;
                Some(MemberWithUser {
                    user: MemberUser {
                        id: user.id.clone(),
                        name: user.name.clone(),
                        email: user.email.clone(),
                        image: user.image.clone(),
                    },
                    member,
                })
            })
            .collect())
    }

    async fn update_member_role(&self, member_id: &str, role: OrgRole) -> StoreResult<Member> {
        let mut tables = self.tables.lock().await;
        let target = tables
            .members
            .get(member_id)
            .cloned()
            .ok_or(StoreError::NotFound("member"))?;
        if target.role == OrgRole::Owner && tables.owners_after(&target, Some(role)) == 0 {
            return Err(StoreError::LastOwner);
        }
        let member = tables
            .members
            .get_mut(member_id)
            .ok_or(StoreError::NotFound("member"))?;
        member.role = role;
        Ok(member.clone())
    }

    async fn delete_member(&self, member_id: &str) -> StoreResult<Member> {
        let mut tables = self.tables.lock().await;
        let target = tables
            .members
            .get(member_id)
            .cloned()
            .ok_or(StoreError::NotFound("member"))?;
        if target.role == OrgRole::Owner && tables.owners_after(&target, None) == 0 {
            return Err(StoreError::LastOwner);
        }
        tables.members.remove(member_id);
        for session in tables.sessions.values_mut() {
            if session.user_id == target.user_id
                && session.active_organization_id.as_deref() == Some(target.organization_id.as_str())
            {
                session.active_organization_id = None;
            }
        }
        Ok(target)
    }

    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        let mut tables = self.tables.lock().await;
        if !tables
            .organizations
            .contains_key(&invitation.organization_id)
        {
            return Err(StoreError::NotFound("organization"));
        }
        let duplicate = tables.invitations.values().any(|i| {
            i.organization_id == invitation.organization_id
                && i.status == InvitationStatus::Pending
                && i.email.eq_ignore_ascii_case(&invitation.email)
        });
        if duplicate {
            return Err(StoreError::Duplicate("pending invitation"));
        }

        let created = Invitation {
            id: invitation.id,
            organization_id: invitation.organization_id,
            email: invitation.email,
            role: invitation.role,
            status: InvitationStatus::Pending,
            inviter_id: invitation.inviter_id,
            expires_at: invitation.expires_at,
            created_at: invitation.created_at,
        };
        tables
            .invitations
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_invitation(&self, invitation_id: &str) -> StoreResult<Option<Invitation>> {
        Ok(self
            .tables
            .lock()
            .await
            .invitations
            .get(invitation_id)
            .cloned())
    }

    async fn find_pending_invitation(
        &self,
        organization_id: &str,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .find(|i| {
                i.organization_id == organization_id
                    && i.status == InvitationStatus::Pending
                    && i.email.eq_ignore_ascii_case(email)
            })
            .cloned())
    }

    async fn list_invitations(&self, organization_id: &str) -> StoreResult<Vec<Invitation>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .invitations
                .values()
                .filter(|i| i.organization_id == organization_id)
                .cloned(),
            |i| (i.created_at, i.id.clone()),
        ))
    }

    async fn list_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .invitations
                .values()
                .filter(|i| i.email.eq_ignore_ascii_case(email))
                .cloned(),
            |i| (i.created_at, i.id.clone()),
        ))
    }

    async fn count_valid_invitations(
        &self,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| i.organization_id == organization_id && i.is_valid(now))
            .count() as u64)
    }

    async fn refresh_invitation(
        &self,
        invitation_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let mut tables = self.tables.lock().await;
        match tables.invitations.get_mut(invitation_id) {
            Some(inv) if inv.status == InvitationStatus::Pending => {
                inv.expires_at = expires_at;
                Ok(inv.clone())
            }
            other => Err(transition_failure(other.as_deref(), None)),
        }
    }

    async fn transition_invitation(
        &self,
        invitation_id: &str,
        to: InvitationStatus,
        valid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Invitation> {
        let mut tables = self.tables.lock().await;
        match tables.invitations.get_mut(invitation_id) {
            Some(inv)
                if inv.status == InvitationStatus::Pending
                    && !valid_at.is_some_and(|at| inv.is_expired(at)) =>
            {
                inv.status = to;
                Ok(inv.clone())
            }
            other => Err(transition_failure(other.as_deref(), valid_at)),
        }
    }

    async fn accept_invitation(
        &self,
        invitation_id: &str,
        member: NewMember,
        now: DateTime<Utc>,
    ) -> StoreResult<(Invitation, Member)> {
        let mut tables = self.tables.lock().await;
        let invitation = match tables.invitations.get(invitation_id) {
            Some(inv) if inv.is_valid(now) => inv.clone(),
            other => return Err(transition_failure(other, Some(now))),
        };
        if tables.is_member(&invitation.organization_id, &member.user_id) {
            return Err(StoreError::AlreadyMember);
        }

        let created = Member {
            id: member.id,
            organization_id: invitation.organization_id.clone(),
            user_id: member.user_id,
            role: invitation.role,
            created_at: member.created_at,
        };
        tables.members.insert(created.id.clone(), created.clone());

        let invitation = tables
            .invitations
            .get_mut(invitation_id)
            .ok_or(StoreError::NotFound("invitation"))?;
        invitation.status = InvitationStatus::Accepted;
        Ok((invitation.clone(), created))
    }

    async fn create_api_key(&self, key: ApiKey) -> StoreResult<ApiKey> {
        let mut tables = self.tables.lock().await;
        if tables.api_keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Duplicate("api key"));
        }
        tables.api_keys.insert(key.id.clone(), key.clone());
        Ok(key)
    }

    async fn list_api_keys(&self, user_id: &str) -> StoreResult<Vec<ApiKey>> {
        let tables = self.tables.lock().await;
        let mut keys = sorted(
            tables
                .api_keys
                .values()
                .filter(|k| k.user_id == user_id)
                .cloned(),
            |k| (k.created_at, k.id.clone()),
        );
        keys.reverse();
        Ok(keys)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn touch_api_key(&self, key_id: &str, used_at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(key) = tables.api_keys.get_mut(key_id) {
            key.last_used_at = Some(used_at);
        }
        Ok(())
    }

    async fn delete_api_key(&self, key_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let owned = tables
            .api_keys
            .get(key_id)
            .is_some_and(|k| k.user_id == user_id);
        if owned {
            tables.api_keys.remove(key_id);
        }
        Ok(owned)
    }

    async fn ping(&self) -> bool {
        true
    }
}
