//! Safe deletion: strip every reference to an entity, then remove it.
//!
//! Deletion never cascades. Neighbours lose their link to the deleted
//! entity and are otherwise left alone. A group's own relation sets are its
//! adjacency index, so only the groups and users it points at are visited.

use chrono::Utc;
use roster_core::{GroupId, Result, User, UserGroup, UserId};

use crate::relations::{push_unique, remove_id};
use crate::store::{Entity, EntityStore};

/// Neighbours that lost a reference to a deleted entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unlinked {
    pub groups: Vec<GroupId>,
    pub users: Vec<UserId>,
}

/// Delete a group and remove it from its parents' `nestedGroups`, its
/// children's `memberOf` and its members' `memberOf`.
///
/// Fails with `NotFound` before touching anything if the group is absent.
pub fn delete_group(store: &mut EntityStore, id: GroupId) -> Result<(UserGroup, Unlinked)> {
    let group = store.groups.remove(&id)?;
    let now = Utc::now();
    let mut unlinked = Unlinked::default();

    for parent in &group.member_of {
        if let Ok(p) = store.groups.get_mut(parent) {
            if remove_id(&mut p.nested_groups, &id) {
                p.touch(now);
                push_unique(&mut unlinked.groups, *parent);
            }
        }
    }
    for child in &group.nested_groups {
        if let Ok(c) = store.groups.get_mut(child) {
            if remove_id(&mut c.member_of, &id) {
                c.touch(now);
                push_unique(&mut unlinked.groups, *child);
            }
        }
    }
    for member in &group.members {
        if let Ok(u) = store.users.get_mut(member) {
            if remove_id(&mut u.member_of, &id) {
                u.touch(now);
                push_unique(&mut unlinked.users, *member);
            }
        }
    }

    tracing::debug!(
        group_id = %id,
        groups = unlinked.groups.len(),
        users = unlinked.users.len(),
        "usergroup unlinked and removed"
    );
    Ok((group, unlinked))
}

/// Delete a user and remove it from the `members` of every group it
/// belongs to.
pub fn delete_user(store: &mut EntityStore, id: UserId) -> Result<(User, Unlinked)> {
    let user = store.users.remove(&id)?;
    let now = Utc::now();
    let mut unlinked = Unlinked::default();

    for group in &user.member_of {
        if let Ok(g) = store.groups.get_mut(group) {
            if remove_id(&mut g.members, &id) {
                g.touch(now);
                push_unique(&mut unlinked.groups, *group);
            }
        }
    }

    tracing::debug!(
        user_id = %id,
        groups = unlinked.groups.len(),
        "user unlinked and removed"
    );
    Ok((user, unlinked))
}
