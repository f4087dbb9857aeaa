use thiserror::Error;

use crate::types::{EntityKind, GroupId};

/// Top-level error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("{field} references unknown {kind} {id}")]
    UnknownReference {
        field: &'static str,
        kind: EntityKind,
        id: String,
    },

    #[error("Group {0} cannot be nested within itself")]
    SelfNesting(GroupId),

    #[error("Nesting {child} within {parent} would create a cycle")]
    NestingCycle { child: GroupId, parent: GroupId },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of a [`DirectoryError`], used by transport bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::Internal => "internal",
        }
    }
}

impl DirectoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::MissingField(_)
            | Self::InvalidField { .. }
            | Self::UnknownReference { .. }
            | Self::SelfNesting(_)
            | Self::NestingCycle { .. } => ErrorKind::InvalidArgument,
            Self::Config(_) => ErrorKind::Internal,
        }
    }

    pub fn user_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: EntityKind::User,
            id: id.to_string(),
        }
    }

    pub fn group_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: EntityKind::UserGroup,
            id: id.to_string(),
        }
    }
}

impl From<config::ConfigError> for DirectoryError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds() {
        assert_eq!(
            DirectoryError::user_not_found("x").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DirectoryError::MissingField("shortname").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            DirectoryError::SelfNesting(GroupId::new()).kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(DirectoryError::Config("bad".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn not_found_message_names_the_kind() {
        let err = DirectoryError::group_not_found("abc");
        assert_eq!(err.to_string(), "usergroup not found: abc");
    }
}
