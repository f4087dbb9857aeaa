//! Directory facade: the public create/get/update/delete/list surface.
//!
//! [`DirectoryState`] holds the store and applies one operation at a time.
//! [`Directory`] wraps it in a single async read-write lock and publishes a
//! [`DirectoryEvent`] after every successful mutation. Clone is cheap
//! (inner Arc).

use std::sync::Arc;

use chrono::Utc;
use roster_core::{
    validate, DirectoryError, DirectoryEvent, EventPayload, GroupId, NewUser, NewUserGroup,
    Result, RosterConfig, User, UserGroup, UserGroupPatch, UserId, UserPatch,
};
use tokio::sync::{broadcast, RwLock};

use crate::consistency::{self, Violation};
use crate::relations::{dedup, GroupLinks, RelationshipMaintainer};
use crate::store::{Entity, EntityStore};
use crate::unlink;

/// The directory contents plus the rules that keep them consistent.
///
/// Every method either applies completely or returns an error having
/// changed nothing.
#[derive(Debug, Clone)]
pub struct DirectoryState {
    store: EntityStore,
    maintainer: RelationshipMaintainer,
}

impl DirectoryState {
    pub fn new(config: &RosterConfig) -> Self {
        Self {
            store: EntityStore::new(config.user_numeric_id_start, config.group_numeric_id_start),
            maintainer: RelationshipMaintainer::new(config.reject_nesting_cycles),
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// All invariant violations in the store. Empty unless something bypassed
    /// the maintainer.
    pub fn violations(&self) -> Vec<Violation> {
        consistency::verify(&self.store, self.maintainer.rejects_nesting_cycles())
    }

    // ── Users ────────────────────────────────────────────────────

    pub fn create_user(&mut self, fields: NewUser) -> Result<(User, EventPayload)> {
        validate_user_fields(
            fields.shortname.as_deref(),
            fields.principal_name.as_deref(),
            fields.email.as_deref(),
        )?;
        let member_of = dedup(&fields.member_of);
        self.maintainer.validate_user_groups(&self.store, &member_of)?;

        let (id, numeric_id) = self.store.users.allocate();
        let now = Utc::now();
        self.store.users.insert(User {
            id,
            numeric_id,
            shortname: fields.shortname,
            principal_name: fields.principal_name,
            email: fields.email,
            given_name: fields.given_name,
            surname: fields.surname,
            full_name: fields.full_name,
            member_of: vec![],
            created_at: now,
            updated_at: now,
        });
        self.maintainer
            .set_user_member_of(&mut self.store, id, member_of)?;

        let user = self.store.users.get_mut(&id)?;
        user.updated_at = now;
        tracing::debug!(user_id = %id, numeric_id, groups = user.member_of.len(), "user created");
        Ok((user.clone(), EventPayload::UserCreated { user_id: id }))
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.store.users.get(id).cloned()
    }

    pub fn list_users(&self) -> Vec<User> {
        self.store.users.list()
    }

    pub fn update_user(&mut self, id: UserId, patch: UserPatch) -> Result<(User, EventPayload)> {
        self.store.users.get(&id)?;
        validate_user_fields(
            patch.shortname.as_ref().and_then(|v| v.as_deref()),
            patch.principal_name.as_ref().and_then(|v| v.as_deref()),
            patch.email.as_ref().and_then(|v| v.as_deref()),
        )?;
        let member_of = patch.member_of.map(|ids| dedup(&ids));
        if let Some(ids) = &member_of {
            self.maintainer.validate_user_groups(&self.store, ids)?;
        }

        let mut changed = Vec::new();
        let user = self.store.users.get_mut(&id)?;
        assign(&mut user.shortname, patch.shortname, "shortname", &mut changed);
        assign(&mut user.principal_name, patch.principal_name, "principalName", &mut changed);
        assign(&mut user.email, patch.email, "email", &mut changed);
        assign(&mut user.given_name, patch.given_name, "givenName", &mut changed);
        assign(&mut user.surname, patch.surname, "surname", &mut changed);
        assign(&mut user.full_name, patch.full_name, "fullName", &mut changed);
        if !changed.is_empty() {
            user.touch(Utc::now());
        }

        let relinked_groups = match member_of {
            Some(ids) => self.maintainer.set_user_member_of(&mut self.store, id, ids)?,
            None => vec![],
        };
        if !relinked_groups.is_empty() {
            changed.push("memberOf".to_string());
        }

        tracing::debug!(user_id = %id, changed = ?changed, "user updated");
        let user = self.store.users.get(&id)?.clone();
        Ok((
            user,
            EventPayload::UserUpdated {
                user_id: id,
                changed_fields: changed,
                relinked_groups,
            },
        ))
    }

    pub fn delete_user(&mut self, id: UserId) -> Result<(User, EventPayload)> {
        let (user, unlinked) = unlink::delete_user(&mut self.store, id)?;
        debug_assert!(
            consistency::verify_neighbours(&self.store, &unlinked.groups, &[]).is_empty(),
            "deleting user {id} left inconsistent neighbours"
        );
        Ok((
            user,
            EventPayload::UserDeleted {
                user_id: id,
                unlinked_groups: unlinked.groups,
            },
        ))
    }

    // ── User groups ──────────────────────────────────────────────

    pub fn create_group(&mut self, fields: NewUserGroup) -> Result<(UserGroup, EventPayload)> {
        let shortname = fields
            .shortname
            .ok_or(DirectoryError::MissingField("shortname"))?;
        let common_name = fields
            .common_name
            .ok_or(DirectoryError::MissingField("commonName"))?;
        validate::shortname(&shortname)?;
        validate::optional(fields.email.as_deref(), validate::email)?;

        let links = GroupLinks {
            member_of: Some(dedup(&fields.member_of)),
            nested_groups: Some(dedup(&fields.nested_groups)),
            members: Some(dedup(&fields.members)),
        };
        self.maintainer
            .validate_group_links(&self.store, None, &links)?;

        let (id, numeric_id) = self.store.groups.allocate();
        let now = Utc::now();
        self.store.groups.insert(UserGroup {
            id,
            numeric_id,
            shortname,
            common_name,
            email: fields.email,
            member_of: vec![],
            nested_groups: vec![],
            members: vec![],
            created_at: now,
            updated_at: now,
        });
        let relinked = self
            .maintainer
            .apply_group_links(&mut self.store, id, links)?;

        let group = self.store.groups.get_mut(&id)?;
        group.updated_at = now;
        tracing::debug!(
            group_id = %id,
            numeric_id,
            relinked_groups = relinked.groups.len(),
            relinked_users = relinked.users.len(),
            "usergroup created"
        );
        Ok((group.clone(), EventPayload::GroupCreated { group_id: id }))
    }

    pub fn get_group(&self, id: &GroupId) -> Result<UserGroup> {
        self.store.groups.get(id).cloned()
    }

    pub fn list_groups(&self) -> Vec<UserGroup> {
        self.store.groups.list()
    }

    pub fn update_group(
        &mut self,
        id: GroupId,
        patch: UserGroupPatch,
    ) -> Result<(UserGroup, EventPayload)> {
        let before = self.store.groups.get(&id)?.clone();
        validate::optional(patch.shortname.as_deref(), validate::shortname)?;
        validate::optional(
            patch.email.as_ref().and_then(|v| v.as_deref()),
            validate::email,
        )?;

        let links = GroupLinks {
            member_of: patch.member_of,
            nested_groups: patch.nested_groups,
            members: patch.members,
        };
        self.maintainer
            .validate_group_links(&self.store, Some(id), &links)?;

        let mut changed = Vec::new();
        let group = self.store.groups.get_mut(&id)?;
        assign(&mut group.shortname, patch.shortname, "shortname", &mut changed);
        assign(&mut group.common_name, patch.common_name, "commonName", &mut changed);
        assign(&mut group.email, patch.email, "email", &mut changed);
        if !changed.is_empty() {
            group.touch(Utc::now());
        }

        let relinked = self
            .maintainer
            .apply_group_links(&mut self.store, id, links)?;

        let group = self.store.groups.get(&id)?.clone();
        if group.member_of != before.member_of {
            changed.push("memberOf".to_string());
        }
        if group.nested_groups != before.nested_groups {
            changed.push("nestedGroups".to_string());
        }
        if group.members != before.members {
            changed.push("members".to_string());
        }

        tracing::debug!(
            group_id = %id,
            changed = ?changed,
            relinked_groups = relinked.groups.len(),
            relinked_users = relinked.users.len(),
            "usergroup updated"
        );
        Ok((
            group,
            EventPayload::GroupUpdated {
                group_id: id,
                changed_fields: changed,
                relinked_groups: relinked.groups,
                relinked_users: relinked.users,
            },
        ))
    }

    pub fn delete_group(&mut self, id: GroupId) -> Result<(UserGroup, EventPayload)> {
        let (group, unlinked) = unlink::delete_group(&mut self.store, id)?;
        debug_assert!(
            consistency::verify_neighbours(&self.store, &unlinked.groups, &unlinked.users)
                .is_empty(),
            "deleting usergroup {id} left inconsistent neighbours"
        );
        Ok((
            group,
            EventPayload::GroupDeleted {
                group_id: id,
                unlinked_groups: unlinked.groups,
                unlinked_users: unlinked.users,
            },
        ))
    }
}

fn validate_user_fields(
    shortname: Option<&str>,
    principal_name: Option<&str>,
    email: Option<&str>,
) -> Result<()> {
    validate::optional(shortname, validate::shortname)?;
    validate::optional(principal_name, validate::principal_name)?;
    validate::optional(email, validate::email)
}

/// Apply a present patch value, recording `name` if the stored value changed.
fn assign<T: PartialEq>(slot: &mut T, value: Option<T>, name: &str, changed: &mut Vec<String>) {
    if let Some(value) = value {
        if *slot != value {
            *slot = value;
            changed.push(name.to_string());
        }
    }
}

// ── Async facade ─────────────────────────────────────────────────

/// Shared handle to an in-memory directory.
///
/// Mutations hold the write lock for the whole operation; reads share the
/// read lock. Events are sent while the write lock is held, so every
/// subscriber sees them in mutation order.
#[derive(Clone)]
pub struct Directory {
    state: Arc<RwLock<DirectoryState>>,
    events: broadcast::Sender<DirectoryEvent>,
}

impl Directory {
    pub fn new(config: &RosterConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(DirectoryState::new(config))),
            events,
        }
    }

    /// Receive an event for every mutation applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryEvent> {
        self.events.subscribe()
    }

    pub fn users(&self) -> Users<'_> {
        Users { directory: self }
    }

    pub fn usergroups(&self) -> UserGroups<'_> {
        UserGroups { directory: self }
    }

    pub async fn check_consistency(&self) -> Vec<Violation> {
        self.read(|state| state.violations()).await
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut DirectoryState) -> Result<(T, EventPayload)>,
    ) -> Result<T> {
        let mut state = self.state.write().await;
        let (value, payload) = op(&mut *state)?;
        // No receivers is not an error.
        let _ = self.events.send(DirectoryEvent::new(payload));
        Ok(value)
    }

    async fn read<T>(&self, op: impl FnOnce(&DirectoryState) -> T) -> T {
        let state = self.state.read().await;
        op(&*state)
    }
}

/// `users.*` operations.
pub struct Users<'a> {
    directory: &'a Directory,
}

impl Users<'_> {
    pub async fn create(&self, fields: NewUser) -> Result<UserId> {
        self.directory
            .mutate(|state| {
                let (user, event) = state.create_user(fields)?;
                Ok((user.id, event))
            })
            .await
    }

    pub async fn get(&self, id: UserId) -> Result<User> {
        self.directory.read(|state| state.get_user(&id)).await
    }

    pub async fn update(&self, id: UserId, patch: UserPatch) -> Result<User> {
        self.directory
            .mutate(|state| state.update_user(id, patch))
            .await
    }

    pub async fn delete(&self, id: UserId) -> Result<()> {
        self.directory
            .mutate(|state| {
                let (_, event) = state.delete_user(id)?;
                Ok(((), event))
            })
            .await
    }

    pub async fn list(&self) -> Vec<User> {
        self.directory.read(|state| state.list_users()).await
    }
}

/// `usergroups.*` operations.
pub struct UserGroups<'a> {
    directory: &'a Directory,
}

impl UserGroups<'_> {
    pub async fn create(&self, fields: NewUserGroup) -> Result<GroupId> {
        self.directory
            .mutate(|state| {
                let (group, event) = state.create_group(fields)?;
                Ok((group.id, event))
            })
            .await
    }

    pub async fn get(&self, id: GroupId) -> Result<UserGroup> {
        self.directory.read(|state| state.get_group(&id)).await
    }

    pub async fn update(&self, id: GroupId, patch: UserGroupPatch) -> Result<UserGroup> {
        self.directory
            .mutate(|state| state.update_group(id, patch))
            .await
    }

    pub async fn delete(&self, id: GroupId) -> Result<()> {
        self.directory
            .mutate(|state| {
                let (_, event) = state.delete_group(id)?;
                Ok(((), event))
            })
            .await
    }

    pub async fn list(&self) -> Vec<UserGroup> {
        self.directory.read(|state| state.list_groups()).await
    }
}
