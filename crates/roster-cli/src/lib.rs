//! roster-cli: scripts an in-memory Roster directory one JSON command per line.

pub mod script;

pub use script::{Command, Response, Session, Summary};
