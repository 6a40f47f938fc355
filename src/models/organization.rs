use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ParseEnumError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub logo: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Role of a user inside one organization.
///
/// Variants are declared in ascending rank so the derived `Ord` gives
/// `Member < Admin < Owner`. Compare roles with `<`/`>=`, never as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Member,
    Admin,
    Owner,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Member => "member",
            OrgRole::Admin => "admin",
            OrgRole::Owner => "owner",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(OrgRole::Member),
            "admin" => Ok(OrgRole::Admin),
            "owner" => Ok(OrgRole::Owner),
            other => Err(ParseEnumError::new("organization role", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub role: OrgRole,
    pub created_at: DateTime<Utc>,
}

/// Member row joined with the user columns the members table shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberWithUser {
    #[serde(flatten)]
    pub member: Member,
    pub user: MemberUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_rank_owner_over_admin_over_member() {
        assert!(OrgRole::Owner > OrgRole::Admin);
        assert!(OrgRole::Admin > OrgRole::Member);
        assert_eq!(
            [OrgRole::Owner, OrgRole::Member, OrgRole::Admin]
                .iter()
                .max(),
            Some(&OrgRole::Owner)
        );
    }

    #[test]
    fn role_parses_only_known_names() {
        assert_eq!("admin".parse::<OrgRole>(), Ok(OrgRole::Admin));
        assert!("Admin".parse::<OrgRole>().is_err());
        assert!("superuser".parse::<OrgRole>().is_err());
    }
}
