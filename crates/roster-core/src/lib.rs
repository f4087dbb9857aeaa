//! roster-core: Shared types, validation, configuration, and error handling for the Roster directory.
//!
//! This crate provides the foundational types used across all Roster components:
//! - Entity types (User, UserGroup) and their identifiers
//! - Create and partial-update request types with wire-compatible field names
//! - Field validation rules (shortname, email, principal name)
//! - Change events published after every successful mutation
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod events;
pub mod types;
pub mod validate;

pub use config::RosterConfig;
pub use error::{DirectoryError, ErrorKind, Result};
pub use events::{DirectoryEvent, EventPayload};
pub use types::{
    EntityKind, GroupId, NewUser, NewUserGroup, User, UserGroup, UserGroupPatch, UserId, UserPatch,
};
