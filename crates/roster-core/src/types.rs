//! Core domain types for the Roster directory.
//!
//! Field names on the wire follow the directory API used by existing
//! callers (`memberOf`, `nestedGroups`, `commonName`, ...), so every
//! serialized type here uses camelCase.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────

/// Unique identifier of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Unique identifier of a user group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The two kinds of entity held by the directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    #[serde(rename = "usergroup")]
    UserGroup,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::UserGroup => f.write_str("usergroup"),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────

/// A directory user.
///
/// `member_of` is maintained by the directory as the inverse of
/// [`UserGroup::members`]; it is never stored from caller input directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "uuid")]
    pub id: UserId,
    #[serde(rename = "numericID")]
    pub numeric_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default)]
    pub member_of: Vec<GroupId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named group of users that may itself be nested within other groups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    #[serde(rename = "uuid")]
    pub id: GroupId,
    #[serde(rename = "numericID")]
    pub numeric_id: u64,
    pub shortname: String,
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Groups this group is nested within (outbound edges).
    #[serde(default)]
    pub member_of: Vec<GroupId>,
    /// Groups nested within this group (inbound edges, derived).
    #[serde(default)]
    pub nested_groups: Vec<GroupId>,
    /// Users directly belonging to this group.
    #[serde(default)]
    pub members: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Requests ──────────────────────────────────────────────────────

/// Fields accepted when creating a user. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub principal_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub member_of: Vec<GroupId>,
}

/// Partial update of a user.
///
/// `None` leaves a field unchanged. For scalar fields `Some(None)` (an
/// explicit JSON `null`) clears the value. `member_of`, when present,
/// replaces the user's whole membership set.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default, deserialize_with = "nullable")]
    pub shortname: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub principal_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub given_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub surname: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub full_name: Option<Option<String>>,
    #[serde(default)]
    pub member_of: Option<Vec<GroupId>>,
}

/// Fields accepted when creating a user group. Unknown fields are ignored.
///
/// `shortname` and `common_name` are required; they are optional here so a
/// missing value surfaces as a directory error rather than a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewUserGroup {
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub member_of: Vec<GroupId>,
    #[serde(default)]
    pub nested_groups: Vec<GroupId>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

impl NewUserGroup {
    pub fn new(shortname: &str, common_name: &str) -> Self {
        Self {
            shortname: Some(shortname.to_string()),
            common_name: Some(common_name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_member_of(mut self, parents: Vec<GroupId>) -> Self {
        self.member_of = parents;
        self
    }

    pub fn with_members(mut self, members: Vec<UserId>) -> Self {
        self.members = members;
        self
    }
}

/// Partial update of a user group.
///
/// Relation fields that are present replace the stored set wholesale.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserGroupPatch {
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default)]
    pub member_of: Option<Vec<GroupId>>,
    #[serde(default)]
    pub nested_groups: Option<Vec<GroupId>>,
    #[serde(default)]
    pub members: Option<Vec<UserId>>,
}

impl UserGroupPatch {
    pub fn has_relations(&self) -> bool {
        self.member_of.is_some() || self.nested_groups.is_some() || self.members.is_some()
    }
}

/// Distinguishes an absent field (outer `None`, via `#[serde(default)]`)
/// from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
