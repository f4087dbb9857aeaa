//! Change events published by the directory.
//!
//! One event is emitted after every successful mutation so that connected
//! clients can refresh their view. Failed operations emit nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{GroupId, UserId};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// An event emitted by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl DirectoryEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// The event payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event_type")]
pub enum EventPayload {
    // ── User events ───────────────────────────────────────────
    UserCreated {
        user_id: UserId,
    },
    UserUpdated {
        user_id: UserId,
        changed_fields: Vec<String>,
        /// Groups whose `members` changed as a consequence.
        relinked_groups: Vec<GroupId>,
    },
    /// A user was removed; listed groups no longer reference it.
    UserDeleted {
        user_id: UserId,
        unlinked_groups: Vec<GroupId>,
    },

    // ── Group events ──────────────────────────────────────────
    GroupCreated {
        group_id: GroupId,
    },
    GroupUpdated {
        group_id: GroupId,
        changed_fields: Vec<String>,
        /// Groups whose `memberOf` or `nestedGroups` changed as a consequence.
        relinked_groups: Vec<GroupId>,
        /// Users whose `memberOf` changed as a consequence.
        relinked_users: Vec<UserId>,
    },
    /// A group was removed; listed neighbours no longer reference it.
    GroupDeleted {
        group_id: GroupId,
        unlinked_groups: Vec<GroupId>,
        unlinked_users: Vec<UserId>,
    },
}
