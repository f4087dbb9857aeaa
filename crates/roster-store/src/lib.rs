//! In-memory directory engine for users and user groups.
//!
//! Relations between entities are stored on both ends and kept in agreement
//! by the [`relations::RelationshipMaintainer`]. Deletion strips references
//! instead of cascading. Entry point is [`Directory`].

pub mod consistency;
pub mod directory;
pub mod relations;
pub mod store;
pub mod unlink;

pub use consistency::Violation;
pub use directory::{Directory, DirectoryState, UserGroups, Users};
pub use relations::{GroupLinks, Relinked, RelationshipMaintainer};
pub use store::{Entity, EntityStore, Table};
pub use unlink::Unlinked;
