//! Invariant verification over the whole store or a neighbourhood.
//!
//! Checked invariants:
//! - every relation id refers to an existing entity
//! - `memberOf` / `nestedGroups` are mutual inverses
//! - `UserGroup.members` / `User.memberOf` are mutual inverses
//! - no relation set holds the same id twice
//! - (optionally) no group reaches itself through `memberOf`

use std::collections::{HashMap, HashSet};
use std::fmt;

use roster_core::{EntityKind, GroupId, UserId};
use serde::Serialize;

use crate::store::EntityStore;

/// A broken invariant found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    #[error("{owner_kind} {owner}: {field} references missing {target}")]
    DanglingReference {
        owner_kind: EntityKind,
        owner: String,
        field: &'static str,
        target: String,
    },

    #[error("{owner_kind} {owner}: {field} lists {target}, which does not list it back")]
    MissingInverse {
        owner_kind: EntityKind,
        owner: String,
        field: &'static str,
        target: String,
    },

    #[error("{owner_kind} {owner}: {field} lists {target} more than once")]
    DuplicateReference {
        owner_kind: EntityKind,
        owner: String,
        field: &'static str,
        target: String,
    },

    #[error("usergroup {group} is nested within itself")]
    NestingCycle { group: GroupId },
}

/// Check every entity in the store.
pub fn verify(store: &EntityStore, require_acyclic: bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for group in store.groups.iter() {
        check_group(store, group.id, &mut violations);
    }
    for user in store.users.iter() {
        check_user(store, user.id, &mut violations);
    }
    if require_acyclic {
        violations.extend(
            cyclic_groups(store)
                .into_iter()
                .map(|group| Violation::NestingCycle { group }),
        );
    }
    violations
}

/// Check only the listed entities. Ids no longer in the store are skipped.
pub fn verify_neighbours(
    store: &EntityStore,
    groups: &[GroupId],
    users: &[UserId],
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for &id in groups {
        check_group(store, id, &mut violations);
    }
    for &id in users {
        check_user(store, id, &mut violations);
    }
    violations
}

fn check_group(store: &EntityStore, id: GroupId, out: &mut Vec<Violation>) {
    let Ok(group) = store.groups.get(&id) else {
        return;
    };
    let edge = Edge {
        owner_kind: EntityKind::UserGroup,
        owner: id.to_string(),
    };

    for &parent in &group.member_of {
        match store.groups.get(&parent) {
            Ok(p) if !p.nested_groups.contains(&id) => out.push(edge.missing("memberOf", parent)),
            Ok(_) => {}
            Err(_) => out.push(edge.dangling("memberOf", parent)),
        }
    }
    for &child in &group.nested_groups {
        match store.groups.get(&child) {
            Ok(c) if !c.member_of.contains(&id) => out.push(edge.missing("nestedGroups", child)),
            Ok(_) => {}
            Err(_) => out.push(edge.dangling("nestedGroups", child)),
        }
    }
    for &member in &group.members {
        match store.users.get(&member) {
            Ok(u) if !u.member_of.contains(&id) => out.push(edge.missing("members", member)),
            Ok(_) => {}
            Err(_) => out.push(edge.dangling("members", member)),
        }
    }

    edge.duplicates("memberOf", &group.member_of, out);
    edge.duplicates("nestedGroups", &group.nested_groups, out);
    edge.duplicates("members", &group.members, out);
}

fn check_user(store: &EntityStore, id: UserId, out: &mut Vec<Violation>) {
    let Ok(user) = store.users.get(&id) else {
        return;
    };
    let edge = Edge {
        owner_kind: EntityKind::User,
        owner: id.to_string(),
    };

    for &group in &user.member_of {
        match store.groups.get(&group) {
            Ok(g) if !g.members.contains(&id) => out.push(edge.missing("memberOf", group)),
            Ok(_) => {}
            Err(_) => out.push(edge.dangling("memberOf", group)),
        }
    }
    edge.duplicates("memberOf", &user.member_of, out);
}

struct Edge {
    owner_kind: EntityKind,
    owner: String,
}

impl Edge {
    fn dangling(&self, field: &'static str, target: impl fmt::Display) -> Violation {
        Violation::DanglingReference {
            owner_kind: self.owner_kind,
            owner: self.owner.clone(),
            field,
            target: target.to_string(),
        }
    }

    fn missing(&self, field: &'static str, target: impl fmt::Display) -> Violation {
        Violation::MissingInverse {
            owner_kind: self.owner_kind,
            owner: self.owner.clone(),
            field,
            target: target.to_string(),
        }
    }

    fn duplicates<T>(&self, field: &'static str, ids: &[T], out: &mut Vec<Violation>)
    where
        T: Copy + Eq + std::hash::Hash + fmt::Display,
    {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut reported = HashSet::new();
        for &id in ids {
            if !seen.insert(id) && reported.insert(id) {
                out.push(Violation::DuplicateReference {
                    owner_kind: self.owner_kind,
                    owner: self.owner.clone(),
                    field,
                    target: id.to_string(),
                });
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Groups that close a cycle along `memberOf`, in creation order of the
/// group where the cycle was first detected.
fn cyclic_groups(store: &EntityStore) -> Vec<GroupId> {
    let mut state: HashMap<GroupId, Visit> = HashMap::new();
    let mut found = Vec::new();

    for root in store.groups.iter() {
        if state.contains_key(&root.id) {
            continue;
        }
        // Iterative DFS: (group, index of next parent to visit).
        let mut stack: Vec<(GroupId, usize)> = vec![(root.id, 0)];
        state.insert(root.id, Visit::InProgress);

        while let Some((current, next)) = stack.pop() {
            let parents = store
                .groups
                .get(&current)
                .map(|g| g.member_of.as_slice())
                .unwrap_or_default();

            let Some(&parent) = parents.get(next) else {
                state.insert(current, Visit::Done);
                continue;
            };
            stack.push((current, next + 1));

            match state.get(&parent) {
                Some(Visit::InProgress) => {
                    if !found.contains(&parent) {
                        found.push(parent);
                    }
                }
                Some(Visit::Done) => {}
                None if store.groups.contains(&parent) => {
                    state.insert(parent, Visit::InProgress);
                    stack.push((parent, 0));
                }
                None => {}
            }
        }
    }

    found
}
