//! Entity storage: one creation-ordered table per entity kind.
//!
//! Tables are pure CRUD. They hand out identifiers and numeric IDs and store
//! exactly what they are given; keeping relation fields consistent is the job
//! of [`crate::relations`] and [`crate::unlink`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use roster_core::{DirectoryError, EntityKind, GroupId, Result, User, UserGroup, UserId};

/// A record that can be held in a [`Table`].
pub trait Entity: Clone + fmt::Debug {
    type Id: Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display;

    const KIND: EntityKind;

    fn id(&self) -> Self::Id;

    fn numeric_id(&self) -> u64;

    /// Draw a fresh random identifier.
    fn generate_id() -> Self::Id;

    /// Record that the entity was modified at `at`.
    fn touch(&mut self, at: DateTime<Utc>);
}

impl Entity for User {
    type Id = UserId;

    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> UserId {
        self.id
    }

    fn numeric_id(&self) -> u64 {
        self.numeric_id
    }

    fn generate_id() -> UserId {
        UserId::new()
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

impl Entity for UserGroup {
    type Id = GroupId;

    const KIND: EntityKind = EntityKind::UserGroup;

    fn id(&self) -> GroupId {
        self.id
    }

    fn numeric_id(&self) -> u64 {
        self.numeric_id
    }

    fn generate_id() -> GroupId {
        GroupId::new()
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// Records of one kind, keyed by id and iterable in creation order.
///
/// Identifiers and numeric IDs are never reused, even after deletion.
#[derive(Debug, Clone)]
pub struct Table<E: Entity> {
    records: HashMap<E::Id, E>,
    /// Numeric ID → id. Numeric IDs grow monotonically, so this is creation order.
    order: BTreeMap<u64, E::Id>,
    retired: HashSet<E::Id>,
    next_numeric_id: u64,
}

impl<E: Entity> Table<E> {
    pub fn new(first_numeric_id: u64) -> Self {
        Self {
            records: HashMap::new(),
            order: BTreeMap::new(),
            retired: HashSet::new(),
            next_numeric_id: first_numeric_id,
        }
    }

    /// Reserve an identifier and numeric ID for a record about to be inserted.
    pub fn allocate(&mut self) -> (E::Id, u64) {
        let id = loop {
            let candidate = E::generate_id();
            if !self.records.contains_key(&candidate) && !self.retired.contains(&candidate) {
                break candidate;
            }
        };
        let numeric_id = self.next_numeric_id;
        self.next_numeric_id += 1;
        (id, numeric_id)
    }

    /// Store a record allocated by [`Table::allocate`], replacing any record with the same id.
    pub fn insert(&mut self, record: E) {
        let id = record.id();
        self.order.insert(record.numeric_id(), id);
        self.records.insert(id, record);
    }

    pub fn get(&self, id: &E::Id) -> Result<&E> {
        self.records.get(id).ok_or_else(|| not_found::<E>(id))
    }

    pub fn get_mut(&mut self, id: &E::Id) -> Result<&mut E> {
        self.records.get_mut(id).ok_or_else(|| not_found::<E>(id))
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.records.contains_key(id)
    }

    /// Remove a record and retire its id.
    pub fn remove(&mut self, id: &E::Id) -> Result<E> {
        let record = self.records.remove(id).ok_or_else(|| not_found::<E>(id))?;
        self.order.remove(&record.numeric_id());
        self.retired.insert(*id);
        Ok(record)
    }

    /// All records in creation order.
    pub fn list(&self) -> Vec<E> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.order.values().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn not_found<E: Entity>(id: &E::Id) -> DirectoryError {
    DirectoryError::NotFound {
        kind: E::KIND,
        id: id.to_string(),
    }
}

/// Both entity tables.
#[derive(Debug, Clone)]
pub struct EntityStore {
    pub users: Table<User>,
    pub groups: Table<UserGroup>,
}

impl EntityStore {
    pub fn new(user_numeric_id_start: u64, group_numeric_id_start: u64) -> Self {
        Self {
            users: Table::new(user_numeric_id_start),
            groups: Table::new(group_numeric_id_start),
        }
    }
}
