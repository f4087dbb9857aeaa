//! Bidirectional membership maintenance.
//!
//! Every relation field in the store has an inverse:
//!
//! ```text
//! group.memberOf      <->  parent.nestedGroups
//! group.nestedGroups  <->  child.memberOf
//! group.members       <->  user.memberOf
//! ```
//!
//! The [`RelationshipMaintainer`] is the only writer of these fields. A write
//! to one side diffs the old and new sets and patches the inverse side of
//! exactly the entities that gained or lost a link, so both copies of every
//! edge change together.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use roster_core::{DirectoryError, EntityKind, GroupId, Result, User, UserGroup, UserId};

use crate::store::{Entity, EntityStore, Table};

/// Relation sets requested for a group. `None` leaves a set unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupLinks {
    pub member_of: Option<Vec<GroupId>>,
    pub nested_groups: Option<Vec<GroupId>>,
    pub members: Option<Vec<UserId>>,
}

impl GroupLinks {
    /// Collapse duplicate ids, keeping the first occurrence.
    fn normalized(self) -> Self {
        Self {
            member_of: self.member_of.map(|ids| dedup(&ids)),
            nested_groups: self.nested_groups.map(|ids| dedup(&ids)),
            members: self.members.map(|ids| dedup(&ids)),
        }
    }
}

/// Neighbours whose relation sets changed as a side effect of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relinked {
    pub groups: Vec<GroupId>,
    pub users: Vec<UserId>,
}

impl Relinked {
    fn add_groups(&mut self, ids: impl IntoIterator<Item = GroupId>) {
        for id in ids {
            push_unique(&mut self.groups, id);
        }
    }

    fn add_users(&mut self, ids: impl IntoIterator<Item = UserId>) {
        for id in ids {
            push_unique(&mut self.users, id);
        }
    }
}

/// Keeps every relation field and its inverse in agreement.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipMaintainer {
    reject_nesting_cycles: bool,
}

impl RelationshipMaintainer {
    pub fn new(reject_nesting_cycles: bool) -> Self {
        Self {
            reject_nesting_cycles,
        }
    }

    pub fn rejects_nesting_cycles(&self) -> bool {
        self.reject_nesting_cycles
    }

    // ── Validation ───────────────────────────────────────────────

    /// Check that a group write is acceptable without modifying anything.
    ///
    /// `group` is `None` for a group that has not been inserted yet. Sets
    /// absent from `links` are taken from the stored record.
    pub fn validate_group_links(
        &self,
        store: &EntityStore,
        group: Option<GroupId>,
        links: &GroupLinks,
    ) -> Result<()> {
        if let Some(ids) = &links.member_of {
            check_groups_exist(store, "memberOf", ids)?;
        }
        if let Some(ids) = &links.nested_groups {
            check_groups_exist(store, "nestedGroups", ids)?;
        }
        if let Some(ids) = &links.members {
            check_users_exist(store, "members", ids)?;
        }

        if links.member_of.is_none() && links.nested_groups.is_none() {
            return Ok(());
        }

        let current = match group {
            Some(id) => Some(store.groups.get(&id)?),
            None => None,
        };
        let member_of = links
            .member_of
            .as_deref()
            .or(current.map(|g| g.member_of.as_slice()))
            .unwrap_or_default();
        let nested_groups = links
            .nested_groups
            .as_deref()
            .or(current.map(|g| g.nested_groups.as_slice()))
            .unwrap_or_default();

        self.check_nesting(store, group, member_of, nested_groups)
    }

    /// Reject nesting that would let `group` reach itself through `memberOf`.
    ///
    /// Only edges incident to `group` change, and the rest of the graph is
    /// acyclic, so a cycle exists exactly when a proposed parent can reach a
    /// proposed child through the unchanged edges.
    pub fn check_nesting(
        &self,
        store: &EntityStore,
        group: Option<GroupId>,
        member_of: &[GroupId],
        nested_groups: &[GroupId],
    ) -> Result<()> {
        if !self.reject_nesting_cycles {
            return Ok(());
        }

        if let Some(id) = group {
            if member_of.contains(&id) || nested_groups.contains(&id) {
                return Err(DirectoryError::SelfNesting(id));
            }
        }
        if nested_groups.is_empty() {
            return Ok(());
        }

        let children: HashSet<GroupId> = nested_groups.iter().copied().collect();
        let mut visited: HashSet<GroupId> = HashSet::new();

        for &parent in member_of {
            let mut queue = VecDeque::from([parent]);
            while let Some(current) = queue.pop_front() {
                if Some(current) == group || !visited.insert(current) {
                    continue;
                }
                if children.contains(&current) {
                    return Err(DirectoryError::NestingCycle {
                        child: group.unwrap_or(current),
                        parent,
                    });
                }
                if let Ok(record) = store.groups.get(&current) {
                    queue.extend(record.member_of.iter().copied());
                }
            }
        }

        Ok(())
    }

    /// Validate the groups a user should belong to.
    pub fn validate_user_groups(&self, store: &EntityStore, groups: &[GroupId]) -> Result<()> {
        check_groups_exist(store, "memberOf", groups)
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Validate and apply every set present in `links` to `group`.
    ///
    /// Sets are applied in the order memberOf, nestedGroups, members.
    /// Nothing is modified if validation fails.
    pub fn apply_group_links(
        &self,
        store: &mut EntityStore,
        group: GroupId,
        links: GroupLinks,
    ) -> Result<Relinked> {
        let links = links.normalized();
        self.validate_group_links(store, Some(group), &links)?;

        let mut relinked = Relinked::default();
        if let Some(ids) = links.member_of {
            relinked.add_groups(self.set_member_of(store, group, ids)?);
        }
        if let Some(ids) = links.nested_groups {
            relinked.add_groups(self.set_nested_groups(store, group, ids)?);
        }
        if let Some(ids) = links.members {
            relinked.add_users(self.set_members(store, group, ids)?);
        }
        Ok(relinked)
    }

    /// Replace the groups `group` is nested within, patching each parent's
    /// `nestedGroups`. Returns the parents that gained or lost the link.
    pub fn set_member_of(
        &self,
        store: &mut EntityStore,
        group: GroupId,
        parents: Vec<GroupId>,
    ) -> Result<Vec<GroupId>> {
        let parents = dedup(&parents);
        check_groups_exist(store, "memberOf", &parents)?;
        let old = store.groups.get(&group)?.member_of.clone();
        let (added, removed) = difference(&old, &parents);

        let now = Utc::now();
        link_inverse(&mut store.groups, &added, &removed, group, nested_groups_of, now);
        replace(store.groups.get_mut(&group)?, member_of_group, parents, now);

        tracing::debug!(
            group_id = %group,
            added = added.len(),
            removed = removed.len(),
            "memberOf updated"
        );
        Ok(concat(added, removed))
    }

    /// Replace the groups nested within `group`, patching each child's
    /// `memberOf`. Returns the children that gained or lost the link.
    pub fn set_nested_groups(
        &self,
        store: &mut EntityStore,
        group: GroupId,
        children: Vec<GroupId>,
    ) -> Result<Vec<GroupId>> {
        let children = dedup(&children);
        check_groups_exist(store, "nestedGroups", &children)?;
        let old = store.groups.get(&group)?.nested_groups.clone();
        let (added, removed) = difference(&old, &children);

        let now = Utc::now();
        link_inverse(&mut store.groups, &added, &removed, group, member_of_group, now);
        replace(store.groups.get_mut(&group)?, nested_groups_of, children, now);

        tracing::debug!(
            group_id = %group,
            added = added.len(),
            removed = removed.len(),
            "nestedGroups updated"
        );
        Ok(concat(added, removed))
    }

    /// Replace the direct user members of `group`, patching each user's
    /// `memberOf`. Returns the users that gained or lost the link.
    pub fn set_members(
        &self,
        store: &mut EntityStore,
        group: GroupId,
        users: Vec<UserId>,
    ) -> Result<Vec<UserId>> {
        let users = dedup(&users);
        check_users_exist(store, "members", &users)?;
        let old = store.groups.get(&group)?.members.clone();
        let (added, removed) = difference(&old, &users);

        let now = Utc::now();
        link_inverse(&mut store.users, &added, &removed, group, member_of_user, now);
        replace(store.groups.get_mut(&group)?, members_of, users, now);

        tracing::debug!(
            group_id = %group,
            added = added.len(),
            removed = removed.len(),
            "members updated"
        );
        Ok(concat(added, removed))
    }

    /// Replace the groups `user` belongs to, patching each group's
    /// `members`. Returns the groups that gained or lost the user.
    pub fn set_user_member_of(
        &self,
        store: &mut EntityStore,
        user: UserId,
        groups: Vec<GroupId>,
    ) -> Result<Vec<GroupId>> {
        let groups = dedup(&groups);
        check_groups_exist(store, "memberOf", &groups)?;
        let old = store.users.get(&user)?.member_of.clone();
        let (added, removed) = difference(&old, &groups);

        let now = Utc::now();
        link_inverse(&mut store.groups, &added, &removed, user, members_of, now);
        replace(store.users.get_mut(&user)?, member_of_user, groups, now);

        tracing::debug!(
            user_id = %user,
            added = added.len(),
            removed = removed.len(),
            "user memberOf updated"
        );
        Ok(concat(added, removed))
    }
}

// ── Field accessors ──────────────────────────────────────────────

fn member_of_group(group: &mut UserGroup) -> &mut Vec<GroupId> {
    &mut group.member_of
}

fn nested_groups_of(group: &mut UserGroup) -> &mut Vec<GroupId> {
    &mut group.nested_groups
}

fn members_of(group: &mut UserGroup) -> &mut Vec<UserId> {
    &mut group.members
}

fn member_of_user(user: &mut User) -> &mut Vec<GroupId> {
    &mut user.member_of
}

// ── Helpers ──────────────────────────────────────────────────────

/// Add `owner` to the inverse set of every `added` target and remove it from
/// every `removed` target. Targets that no longer exist are skipped.
fn link_inverse<T: Entity, X: Copy + PartialEq>(
    targets: &mut Table<T>,
    added: &[T::Id],
    removed: &[T::Id],
    owner: X,
    inverse: fn(&mut T) -> &mut Vec<X>,
    now: DateTime<Utc>,
) {
    for id in added {
        if let Ok(target) = targets.get_mut(id) {
            if push_unique(inverse(target), owner) {
                target.touch(now);
            }
        }
    }
    for id in removed {
        if let Ok(target) = targets.get_mut(id) {
            if remove_id(inverse(target), &owner) {
                target.touch(now);
            }
        }
    }
}

fn replace<T: Entity, X: PartialEq>(
    record: &mut T,
    field: fn(&mut T) -> &mut Vec<X>,
    value: Vec<X>,
    now: DateTime<Utc>,
) {
    let slot = field(record);
    if *slot != value {
        *slot = value;
        record.touch(now);
    }
}

pub(crate) fn check_groups_exist(
    store: &EntityStore,
    field: &'static str,
    ids: &[GroupId],
) -> Result<()> {
    match ids.iter().find(|id| !store.groups.contains(id)) {
        Some(missing) => Err(DirectoryError::UnknownReference {
            field,
            kind: EntityKind::UserGroup,
            id: missing.to_string(),
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_users_exist(
    store: &EntityStore,
    field: &'static str,
    ids: &[UserId],
) -> Result<()> {
    match ids.iter().find(|id| !store.users.contains(id)) {
        Some(missing) => Err(DirectoryError::UnknownReference {
            field,
            kind: EntityKind::User,
            id: missing.to_string(),
        }),
        None => Ok(()),
    }
}

/// Order-preserving set difference: `(new - old, old - new)`.
pub(crate) fn difference<T: Copy + Eq + Hash>(old: &[T], new: &[T]) -> (Vec<T>, Vec<T>) {
    let old_set: HashSet<T> = old.iter().copied().collect();
    let new_set: HashSet<T> = new.iter().copied().collect();
    let added = new.iter().filter(|id| !old_set.contains(id)).copied().collect();
    let removed = old.iter().filter(|id| !new_set.contains(id)).copied().collect();
    (added, removed)
}

pub(crate) fn dedup<T: Copy + Eq + Hash>(ids: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub(crate) fn push_unique<T: Copy + PartialEq>(set: &mut Vec<T>, id: T) -> bool {
    if set.contains(&id) {
        false
    } else {
        set.push(id);
        true
    }
}

pub(crate) fn remove_id<T: PartialEq>(set: &mut Vec<T>, id: &T) -> bool {
    let before = set.len();
    set.retain(|existing| existing != id);
    set.len() != before
}

fn concat<T>(mut first: Vec<T>, second: Vec<T>) -> Vec<T> {
    first.extend(second);
    first
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_group(store: &mut EntityStore, shortname: &str) -> GroupId {
        let (id, numeric_id) = store.groups.allocate();
        store.groups.insert(UserGroup {
            id,
            numeric_id,
            shortname: shortname.to_string(),
            common_name: shortname.to_string(),
            email: None,
            member_of: vec![],
            nested_groups: vec![],
            members: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    fn insert_user(store: &mut EntityStore) -> UserId {
        let (id, numeric_id) = store.users.allocate();
        store.users.insert(User {
            id,
            numeric_id,
            shortname: None,
            principal_name: None,
            email: None,
            given_name: None,
            surname: None,
            full_name: None,
            member_of: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    fn group(store: &EntityStore, id: GroupId) -> &UserGroup {
        store.groups.get(&id).unwrap()
    }

    #[test]
    fn test_difference_preserves_order() {
        let (added, removed) = difference(&[1, 2, 3], &[3, 4, 1, 5]);
        assert_eq!(added, vec![4, 5]);
        assert_eq!(removed, vec![2]);
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        assert_eq!(dedup(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }

    #[test]
    fn test_set_member_of_patches_parents() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let root = insert_group(&mut store, "root");
        let other = insert_group(&mut store, "other");
        let child = insert_group(&mut store, "child");

        maintainer.set_member_of(&mut store, child, vec![root, other]).unwrap();
        assert_eq!(group(&store, root).nested_groups, vec![child]);
        assert_eq!(group(&store, other).nested_groups, vec![child]);

        let touched = maintainer.set_member_of(&mut store, child, vec![other]).unwrap();
        assert_eq!(touched, vec![root]);
        assert!(group(&store, root).nested_groups.is_empty());
        assert_eq!(group(&store, other).nested_groups, vec![child]);
        assert_eq!(group(&store, child).member_of, vec![other]);
    }

    #[test]
    fn test_set_nested_groups_patches_children() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let root = insert_group(&mut store, "root");
        let a = insert_group(&mut store, "a");
        let b = insert_group(&mut store, "b");

        maintainer.set_nested_groups(&mut store, root, vec![a, b]).unwrap();
        assert_eq!(group(&store, a).member_of, vec![root]);
        assert_eq!(group(&store, b).member_of, vec![root]);

        maintainer.set_nested_groups(&mut store, root, vec![b]).unwrap();
        assert!(group(&store, a).member_of.is_empty());
        assert_eq!(group(&store, root).nested_groups, vec![b]);
    }

    #[test]
    fn test_adding_existing_link_is_idempotent() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let root = insert_group(&mut store, "root");
        let child = insert_group(&mut store, "child");

        maintainer.set_nested_groups(&mut store, root, vec![child]).unwrap();
        maintainer.set_member_of(&mut store, child, vec![root, root]).unwrap();

        assert_eq!(group(&store, root).nested_groups, vec![child]);
        assert_eq!(group(&store, child).member_of, vec![root]);
    }

    #[test]
    fn test_members_and_user_view_stay_in_sync() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let staff = insert_group(&mut store, "staff");
        let admins = insert_group(&mut store, "admins");
        let alice = insert_user(&mut store);
        let bob = insert_user(&mut store);

        maintainer.set_members(&mut store, staff, vec![alice, bob]).unwrap();
        assert_eq!(store.users.get(&alice).unwrap().member_of, vec![staff]);

        maintainer
            .set_user_member_of(&mut store, alice, vec![admins])
            .unwrap();
        assert_eq!(group(&store, staff).members, vec![bob]);
        assert_eq!(group(&store, admins).members, vec![alice]);
    }

    #[test]
    fn test_unknown_reference_changes_nothing() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let root = insert_group(&mut store, "root");
        let child = insert_group(&mut store, "child");
        let ghost = GroupId::new();

        let err = maintainer
            .set_member_of(&mut store, child, vec![root, ghost])
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::UnknownReference {
                field: "memberOf",
                ..
            }
        ));
        assert!(group(&store, root).nested_groups.is_empty());
        assert!(group(&store, child).member_of.is_empty());
    }

    #[test]
    fn test_self_nesting_rejected() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let g = insert_group(&mut store, "loop");

        let links = GroupLinks {
            member_of: Some(vec![g]),
            ..Default::default()
        };
        assert_eq!(
            maintainer.apply_group_links(&mut store, g, links),
            Err(DirectoryError::SelfNesting(g))
        );
    }

    #[test]
    fn test_multi_hop_cycle_rejected() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let a = insert_group(&mut store, "a");
        let b = insert_group(&mut store, "b");
        let c = insert_group(&mut store, "c");

        // c ⊂ b ⊂ a
        maintainer.set_member_of(&mut store, b, vec![a]).unwrap();
        maintainer.set_member_of(&mut store, c, vec![b]).unwrap();

        // a ⊂ c would close the loop, from either side of the edge.
        let via_member_of = GroupLinks {
            member_of: Some(vec![c]),
            ..Default::default()
        };
        assert!(matches!(
            maintainer.apply_group_links(&mut store, a, via_member_of),
            Err(DirectoryError::NestingCycle { .. })
        ));

        let via_nested = GroupLinks {
            nested_groups: Some(vec![a]),
            ..Default::default()
        };
        assert!(matches!(
            maintainer.apply_group_links(&mut store, c, via_nested),
            Err(DirectoryError::NestingCycle { .. })
        ));

        assert!(group(&store, a).member_of.is_empty());
        assert!(group(&store, c).nested_groups.is_empty());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let top = insert_group(&mut store, "top");
        let left = insert_group(&mut store, "left");
        let right = insert_group(&mut store, "right");
        let bottom = insert_group(&mut store, "bottom");

        maintainer.set_member_of(&mut store, left, vec![top]).unwrap();
        maintainer.set_member_of(&mut store, right, vec![top]).unwrap();
        let links = GroupLinks {
            member_of: Some(vec![left, right]),
            ..Default::default()
        };
        maintainer.apply_group_links(&mut store, bottom, links).unwrap();

        assert_eq!(group(&store, bottom).member_of, vec![left, right]);
    }

    #[test]
    fn test_cycles_allowed_when_policy_disabled() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(false);
        let g = insert_group(&mut store, "loop");

        let links = GroupLinks {
            member_of: Some(vec![g]),
            ..Default::default()
        };
        maintainer.apply_group_links(&mut store, g, links).unwrap();
        assert_eq!(group(&store, g).member_of, vec![g]);
        assert_eq!(group(&store, g).nested_groups, vec![g]);
    }

    #[test]
    fn test_new_group_with_parent_and_child_in_same_chain() {
        let mut store = EntityStore::new(1, 1);
        let maintainer = RelationshipMaintainer::new(true);
        let a = insert_group(&mut store, "a");
        let b = insert_group(&mut store, "b");
        maintainer.set_member_of(&mut store, b, vec![a]).unwrap();

        // new ⊂ b and a ⊂ new: b ⊂ a ⊂ new ⊂ b.
        let links = GroupLinks {
            member_of: Some(vec![b]),
            nested_groups: Some(vec![a]),
            members: None,
        };
        assert!(matches!(
            maintainer.validate_group_links(&store, None, &links),
            Err(DirectoryError::NestingCycle { .. })
        ));
    }
}
