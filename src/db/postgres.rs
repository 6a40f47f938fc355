use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::{
    Ban, NewInvitation, NewMember, NewOrganization, NewUser, OrgStore, OrganizationUpdate,
    SortDirection, StoreError, StoreResult, UserQuery, UserSortField, transition_failure,
};
use crate::models::organization::MemberUser;
use crate::models::{
    ApiKey, Invitation, InvitationStatus, Member, MemberWithUser, OrgRole, Organization, Session,
    User, UserRole,
};

const USER_COLUMNS: &str = r#"id, name, email, email_verified, image, role, banned, ban_reason,
    ban_expires, two_factor_enabled, created_at"#;

const SESSION_COLUMNS: &str = r#"id, token, user_id, expires_at, ip_address, user_agent,
    active_organization_id, impersonated_by, impersonator_session_id, created_at"#;

const ORGANIZATION_COLUMNS: &str = "id, name, slug, logo, created_at";

const MEMBER_COLUMNS: &str = "id, organization_id, user_id, role, created_at";

const INVITATION_COLUMNS: &str =
    "id, organization_id, email, role, status, inviter_id, expires_at, created_at";

const API_KEY_COLUMNS: &str =
    "id, user_id, name, start, key_hash, enabled, expires_at, last_used_at, created_at";

// ============================================
// Row mapping
// ============================================

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        email_verified: row.try_get("email_verified")?,
        image: row.try_get("image")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        banned: row.try_get("banned")?,
        ban_reason: row.try_get("ban_reason")?,
        ban_expires: row.try_get("ban_expires")?,
        two_factor_enabled: row.try_get("two_factor_enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        ip_address: row.try_get("ip_address")?,
        user_agent: row.try_get("user_agent")?,
        active_organization_id: row.try_get("active_organization_id")?,
        impersonated_by: row.try_get("impersonated_by")?,
        impersonator_session_id: row.try_get("impersonator_session_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn organization_from_row(row: &PgRow) -> StoreResult<Organization> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        logo: row.try_get("logo")?,
        created_at: row.try_get("created_at")?,
    })
}

fn member_from_row(row: &PgRow) -> StoreResult<Member> {
    Ok(Member {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        user_id: row.try_get("user_id")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn invitation_from_row(row: &PgRow) -> StoreResult<Invitation> {
    Ok(Invitation {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        email: row.try_get("email")?,
        role: row.try_get::<String, _>("role")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        inviter_id: row.try_get("inviter_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn api_key_from_row(row: &PgRow) -> StoreResult<ApiKey> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        start: row.try_get("start")?,
        key_hash: row.try_get("key_hash")?,
        enabled: row.try_get("enabled")?,
        expires_at: row.try_get("expires_at")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Maps unique and foreign-key violations onto domain errors.
fn constraint_error(err: sqlx::Error, duplicate: &'static str, missing: &'static str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(duplicate),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound(missing),
        _ => StoreError::Database(err),
    }
}

fn owners_after(members: &[Member], target: &Member, new_role: Option<OrgRole>) -> usize {
    members
        .iter()
        .filter(|m| {
            if m.id == target.id {
                new_role == Some(OrgRole::Owner)
            } else {
                m.role == OrgRole::Owner
            }
        })
        .count()
}

// ============================================
// Store
// ============================================

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks every member row of the organization owning `member_id`, in id
    /// order, so concurrent owner changes serialize instead of deadlocking.
    async fn lock_organization_members(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        member_id: &str,
    ) -> StoreResult<(Member, Vec<Member>)> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MEMBER_COLUMNS}
            FROM member
            WHERE organization_id = (SELECT organization_id FROM member WHERE id = $1)
            ORDER BY id
            FOR UPDATE
            "#
        ))
        .bind(member_id)
        .fetch_all(&mut **tx)
        .await?;

        let members = rows
            .iter()
            .map(member_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        let target = members
            .iter()
            .find(|m| m.id == member_id)
            .cloned()
            .ok_or(StoreError::NotFound("member"))?;
        Ok((target, members))
    }
}

#[async_trait]
impl OrgStore for PgStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(r#"SELECT {USER_COLUMNS} FROM "user" WHERE id = $1"#))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            r#"SELECT {USER_COLUMNS} FROM "user" WHERE lower(email) = lower($1)"#
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, u64)> {
        let order_column = match query.sort_by {
            UserSortField::Name => "name",
            UserSortField::Email => "email",
            UserSortField::CreatedAt => "created_at",
        };
        let direction = match query.sort_direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let filter = "($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%' OR email ILIKE '%' || $1 || '%')";

        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM "user"
            WHERE {filter}
            ORDER BY {order_column} {direction}, id {direction}
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(query.search.as_deref())
        .bind(i64::from(query.limit))
        .bind(i64::from(query.offset))
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!(r#"SELECT COUNT(*) FROM "user" WHERE {filter}"#))
            .bind(query.search.as_deref())
            .fetch_one(&self.pool)
            .await?;

        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((users, total.max(0) as u64))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO "user" (id, name, email, email_verified, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| constraint_error(e, "user", "user"))?;

        if let Some(hash) = &user.password_hash {
            sqlx::query(
                r#"
                INSERT INTO account (id, user_id, account_id, provider_id, password, created_at, updated_at)
                VALUES ($1, $2, $2, 'credential', $3, $4, $4)
                "#,
            )
            .bind(crate::utils::generate_id())
            .bind(&user.id)
            .bind(hash)
            .bind(user.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        user_from_row(&row)
    }

    async fn set_user_role(&self, user_id: &str, role: UserRole) -> StoreResult<User> {
        let row = sqlx::query(&format!(
            r#"UPDATE "user" SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"#
        ))
        .bind(user_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
        user_from_row(&row)
    }

    async fn set_user_ban(&self, user_id: &str, ban: Option<Ban>) -> StoreResult<User> {
        let (banned, reason, expires) = match ban {
            Some(ban) => (true, ban.reason, ban.expires),
            None => (false, None, None),
        };
        let row = sqlx::query(&format!(
            r#"
            UPDATE "user"
            SET banned = $2, ban_reason = $3, ban_expires = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(banned)
        .bind(reason)
        .bind(expires)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("user"))?;
        user_from_row(&row)
    }

    async fn delete_user(&self, user_id: &str) -> StoreResult<()> {
        let result = sqlx::query(r#"DELETE FROM "user" WHERE id = $1"#)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<(Session, User)>> {
        let Some(session_row) = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let session = session_from_row(&session_row)?;
        let user = self.find_user(&session.user_id).await?;
        Ok(user.map(|user| (session, user)))
    }

    async fn find_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = $1"))
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn create_session(&self, session: Session) -> StoreResult<Session> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO session (id, token, user_id, expires_at, ip_address, user_agent,
                active_organization_id, impersonated_by, impersonator_session_id,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(&session.id)
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(&session.active_organization_id)
        .bind(&session.impersonated_by)
        .bind(&session.impersonator_session_id)
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "session", "user"))?;
        session_from_row(&row)
    }

    async fn list_user_sessions(&self, user_id: &str) -> StoreResult<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM session WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_sessions(&self, user_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM session WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_active_organization(
        &self,
        session_id: &str,
        organization_id: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE session SET active_organization_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(session_id)
        .bind(organization_id)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "session", "organization"))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("session"));
        }
        Ok(())
    }

    async fn create_organization(
        &self,
        organization: NewOrganization,
        owner: NewMember,
    ) -> StoreResult<(Organization, Member)> {
        let mut tx = self.pool.begin().await?;

        let org_row = sqlx::query(&format!(
            r#"
            INSERT INTO organization (id, name, slug, logo, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        ))
        .bind(&organization.id)
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(&organization.logo)
        .bind(organization.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| constraint_error(e, "organization slug", "organization"))?;

        let member_row = sqlx::query(&format!(
            r#"
            INSERT INTO member (id, organization_id, user_id, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(&owner.id)
        .bind(&organization.id)
        .bind(&owner.user_id)
        .bind(owner.role.as_str())
        .bind(owner.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| constraint_error(e, "member", "user"))?;

        tx.commit().await?;
        Ok((organization_from_row(&org_row)?, member_from_row(&member_row)?))
    }

    async fn find_organization(&self, organization_id: &str) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organization WHERE id = $1"
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        let row = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organization WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn list_organizations(&self) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organization ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn list_user_organizations(&self, user_id: &str) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query(
            r#"
            SELECT o.id, o.name, o.slug, o.logo, o.created_at
            FROM organization o
            JOIN member m ON o.id = m.organization_id
            WHERE m.user_id = $1
            ORDER BY o.created_at, o.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(organization_from_row).collect()
    }

    async fn update_organization(
        &self,
        organization_id: &str,
        update: OrganizationUpdate,
    ) -> StoreResult<Organization> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE organization
            SET name = COALESCE($2, name), logo = COALESCE($3, logo)
            WHERE id = $1
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        ))
        .bind(organization_id)
        .bind(update.name)
        .bind(update.logo)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound("organization"))?;
        organization_from_row(&row)
    }

    async fn delete_organization(&self, organization_id: &str) -> StoreResult<()> {
        // member and invitation rows cascade; session.active_organization_id is SET NULL
        let result = sqlx::query("DELETE FROM organization WHERE id = $1")
            .bind(organization_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("organization"));
        }
        Ok(())
    }

    async fn find_member(&self, member_id: &str) -> StoreResult<Option<Member>> {
        let row = sqlx::query(&format!("SELECT {MEMBER_COLUMNS} FROM member WHERE id = $1"))
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn find_member_by_user(
        &self,
        organization_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Member>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member WHERE organization_id = $1 AND user_id = $2"
        ))
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn list_members(&self, organization_id: &str) -> StoreResult<Vec<MemberWithUser>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.organization_id, m.user_id, m.role, m.created_at,
                   u.name AS user_name, u.email AS user_email, u.image AS user_image
            FROM member m
            JOIN "user" u ON u.id = m.user_id
            WHERE m.organization_id = $1
            ORDER BY m.created_at, m.id
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<MemberWithUser> {
                let member = member_from_row(row)?;
                Ok(MemberWithUser {
                    user: MemberUser {
                        id: member.user_id.clone(),
                        name: row.try_get("user_name")?,
                        email: row.try_get("user_email")?,
                        image: row.try_get("user_image")?,
                    },
                    member,
                })
            })
            .collect()
    }

    async fn update_member_role(&self, member_id: &str, role: OrgRole) -> StoreResult<Member> {
        let mut tx = self.pool.begin().await?;
        let (target, members) = Self::lock_organization_members(&mut tx, member_id).await?;

        if target.role == OrgRole::Owner && owners_after(&members, &target, Some(role)) == 0 {
            return Err(StoreError::LastOwner);
        }

        let row = sqlx::query(&format!(
            "UPDATE member SET role = $2 WHERE id = $1 RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(member_id)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        member_from_row(&row)
    }

    async fn delete_member(&self, member_id: &str) -> StoreResult<Member> {
        let mut tx = self.pool.begin().await?;
        let (target, members) = Self::lock_organization_members(&mut tx, member_id).await?;

        if target.role == OrgRole::Owner && owners_after(&members, &target, None) == 0 {
            return Err(StoreError::LastOwner);
        }

        sqlx::query("DELETE FROM member WHERE id = $1")
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE session SET active_organization_id = NULL
            WHERE user_id = $1 AND active_organization_id = $2
            "#,
        )
        .bind(&target.user_id)
        .bind(&target.organization_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(target)
    }

    async fn create_invitation(&self, invitation: NewInvitation) -> StoreResult<Invitation> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO invitation (id, organization_id, email, role, status, inviter_id,
                expires_at, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            RETURNING {INVITATION_COLUMNS}
            "#
        ))
        .bind(&invitation.id)
        .bind(&invitation.organization_id)
        .bind(&invitation.email)
        .bind(invitation.role.as_str())
        .bind(&invitation.inviter_id)
        .bind(invitation.expires_at)
        .bind(invitation.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "pending invitation", "organization"))?;
        invitation_from_row(&row)
    }

    async fn find_invitation(&self, invitation_id: &str) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitation WHERE id = $1"
        ))
        .bind(invitation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn find_pending_invitation(
        &self,
        organization_id: &str,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {INVITATION_COLUMNS}
            FROM invitation
            WHERE organization_id = $1 AND lower(email) = lower($2) AND status = 'pending'
            "#
        ))
        .bind(organization_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn list_invitations(&self, organization_id: &str) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVITATION_COLUMNS}
            FROM invitation
            WHERE organization_id = $1
            ORDER BY created_at, id
            "#
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn list_invitations_for_email(&self, email: &str) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INVITATION_COLUMNS}
            FROM invitation
            WHERE lower(email) = lower($1)
            ORDER BY created_at, id
            "#
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invitation_from_row).collect()
    }

    async fn count_valid_invitations(
        &self,
        organization_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invitation
            WHERE organization_id = $1 AND status = 'pending' AND expires_at > $2
            "#,
        )
        .bind(organization_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn refresh_invitation(
        &self,
        invitation_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<Invitation> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE invitation SET expires_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {INVITATION_COLUMNS}
            "#
        ))
        .bind(invitation_id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => invitation_from_row(&row),
            None => {
                let current = self.find_invitation(invitation_id).await?;
                Err(transition_failure(current.as_ref(), None))
            }
        }
    }

    async fn transition_invitation(
        &self,
        invitation_id: &str,
        to: InvitationStatus,
        valid_at: Option<DateTime<Utc>>,
    ) -> StoreResult<Invitation> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE invitation SET status = $2
            WHERE id = $1
              AND status = 'pending'
              AND ($3::TIMESTAMPTZ IS NULL OR expires_at > $3)
            RETURNING {INVITATION_COLUMNS}
            "#
        ))
        .bind(invitation_id)
        .bind(to.as_str())
        .bind(valid_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => invitation_from_row(&row),
            None => {
                let current = self.find_invitation(invitation_id).await?;
                Err(transition_failure(current.as_ref(), valid_at))
            }
        }
    }

    async fn accept_invitation(
        &self,
        invitation_id: &str,
        member: NewMember,
        now: DateTime<Utc>,
    ) -> StoreResult<(Invitation, Member)> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here makes a racing accept/reject/cancel wait,
        // then find the status no longer pending.
        let invitation_row = sqlx::query(&format!(
            r#"
            UPDATE invitation SET status = 'accepted'
            WHERE id = $1 AND status = 'pending' AND expires_at > $2
            RETURNING {INVITATION_COLUMNS}
            "#
        ))
        .bind(invitation_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(invitation_row) = invitation_row else {
            tx.rollback().await?;
            let current = self.find_invitation(invitation_id).await?;
            return Err(transition_failure(current.as_ref(), Some(now)));
        };
        let invitation = invitation_from_row(&invitation_row)?;

        let member_row = sqlx::query(&format!(
            r#"
            INSERT INTO member (id, organization_id, user_id, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (organization_id, user_id) DO NOTHING
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(&member.id)
        .bind(&invitation.organization_id)
        .bind(&member.user_id)
        .bind(invitation.role.as_str())
        .bind(member.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(member_row) = member_row else {
            tx.rollback().await?;
            return Err(StoreError::AlreadyMember);
        };

        tx.commit().await?;
        Ok((invitation, member_from_row(&member_row)?))
    }

    async fn create_api_key(&self, key: ApiKey) -> StoreResult<ApiKey> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO apikey (id, user_id, name, start, key_hash, enabled, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {API_KEY_COLUMNS}
            "#
        ))
        .bind(&key.id)
        .bind(&key.user_id)
        .bind(&key.name)
        .bind(&key.start)
        .bind(&key.key_hash)
        .bind(key.enabled)
        .bind(key.expires_at)
        .bind(key.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "api key", "user"))?;
        api_key_from_row(&row)
    }

    async fn list_api_keys(&self, user_id: &str) -> StoreResult<Vec<ApiKey>> {
        let rows = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM apikey WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(api_key_from_row).collect()
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> StoreResult<Option<ApiKey>> {
        let row = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM apikey WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    async fn touch_api_key(&self, key_id: &str, used_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE apikey SET last_used_at = $2 WHERE id = $1")
            .bind(key_id)
            .bind(used_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_api_key(&self, key_id: &str, user_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM apikey WHERE id = $1 AND user_id = $2")
            .bind(key_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}
