//! Configuration management for the Roster directory.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`ROSTER_DIRECTORY__` prefix)
//! 2. Config file (`roster.toml`, `[directory]` section)
//! 3. Defaults

use serde::Deserialize;

use crate::error::Result;

/// Directory engine configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RosterConfig {
    /// First numeric ID handed out to users.
    #[serde(default = "default_user_numeric_id_start")]
    pub user_numeric_id_start: u64,

    /// First numeric ID handed out to user groups.
    #[serde(default = "default_group_numeric_id_start")]
    pub group_numeric_id_start: u64,

    /// Reject group nesting that makes a group (transitively) a member of itself.
    #[serde(default = "default_true")]
    pub reject_nesting_cycles: bool,

    /// Buffered change events per subscriber before the oldest are dropped.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_user_numeric_id_start() -> u64 {
    1000
}

fn default_group_numeric_id_start() -> u64 {
    1789
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    256
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            user_numeric_id_start: default_user_numeric_id_start(),
            group_numeric_id_start: default_group_numeric_id_start(),
            reject_nesting_cycles: default_true(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl RosterConfig {
    /// Load configuration from `<file_prefix>.{toml,yaml,json,...}` and the environment.
    ///
    /// A missing file or a missing `[directory]` section yields the defaults;
    /// a present but malformed section is an error.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("ROSTER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match cfg.get::<RosterConfig>("directory") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => {
                tracing::debug!(file_prefix, "No [directory] configuration, using defaults");
                Ok(RosterConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RosterConfig::default();
        assert_eq!(config.user_numeric_id_start, 1000);
        assert_eq!(config.group_numeric_id_start, 1789);
        assert!(config.reject_nesting_cycles);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(
            &path,
            "[directory]\ngroup_numeric_id_start = 5000\nreject_nesting_cycles = false\n",
        )
        .unwrap();

        let prefix = dir.path().join("roster");
        let config = RosterConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.group_numeric_id_start, 5000);
        assert!(!config.reject_nesting_cycles);
        assert_eq!(config.user_numeric_id_start, 1000);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = RosterConfig::load(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config, RosterConfig::default());
    }

    #[test]
    fn test_malformed_section_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("broken.toml"),
            "[directory]\nevent_capacity = \"lots\"\n",
        )
        .unwrap();

        let prefix = dir.path().join("broken");
        assert!(RosterConfig::load(prefix.to_str().unwrap()).is_err());
    }
}
