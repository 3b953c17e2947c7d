//! Runtime configuration for the database handle and logging.
//!
//! # Responsibility
//! - Describe where the store lives and how long SQLite waits on locks.
//! - Load both from `ADDRESSBOOK_*` environment variables.
//!
//! # Invariants
//! - Unset variables fall back to defaults; malformed values are rejected,
//!   never silently replaced.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB: &str = "ADDRESSBOOK_DB";
pub const ENV_BUSY_TIMEOUT_MS: &str = "ADDRESSBOOK_BUSY_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "ADDRESSBOOK_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ADDRESSBOOK_LOG_DIR";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Where the address book is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// Private in-memory database, discarded with the handle.
    Memory,
    /// SQLite database file, created on first open.
    File(PathBuf),
}

/// Settings consumed by `Database::open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub location: DbLocation,
    /// How long a statement waits for another connection's lock.
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            ..Self::default()
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Reads `ADDRESSBOOK_DB` and `ADDRESSBOOK_BUSY_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`] with an injectable variable source.
    ///
    /// `ADDRESSBOOK_DB` accepts `memory`, `:memory:` or a file path.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = non_blank(lookup(ENV_DB)) {
            config.location = match raw.as_str() {
                "memory" | ":memory:" => DbLocation::Memory,
                path => DbLocation::File(PathBuf::from(path)),
            };
        }

        if let Some(raw) = non_blank(lookup(ENV_BUSY_TIMEOUT_MS)) {
            let millis = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: ENV_BUSY_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            config.busy_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

/// Logging settings; file logging is enabled only when `dir` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

impl LogSettings {
    /// Reads `ADDRESSBOOK_LOG_LEVEL` and `ADDRESSBOOK_LOG_DIR`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: non_blank(lookup(ENV_LOG_LEVEL)).unwrap_or(defaults.level),
            dir: non_blank(lookup(ENV_LOG_DIR)).map(PathBuf::from),
        }
    }
}

/// Invalid configuration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value `{value}` for `{key}`")
            }
        }
    }
}

impl Error for ConfigError {}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_in_memory_defaults() {
        let config = DatabaseConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, DatabaseConfig::default());
        assert_eq!(config.location, DbLocation::Memory);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn file_location_and_timeout_are_parsed() {
        let config = DatabaseConfig::from_lookup(lookup_from(&[
            (ENV_DB, " /tmp/address.db "),
            (ENV_BUSY_TIMEOUT_MS, "250"),
        ]))
        .unwrap();
        assert_eq!(
            config.location,
            DbLocation::File(PathBuf::from("/tmp/address.db"))
        );
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }

    #[test]
    fn memory_aliases_are_accepted() {
        for alias in ["memory", ":memory:"] {
            let config = DatabaseConfig::from_lookup(lookup_from(&[(ENV_DB, alias)])).unwrap();
            assert_eq!(config.location, DbLocation::Memory);
        }
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let err = DatabaseConfig::from_lookup(lookup_from(&[(ENV_BUSY_TIMEOUT_MS, "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: ENV_BUSY_TIMEOUT_MS,
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn log_settings_fall_back_to_build_default_level() {
        let settings = LogSettings::from_lookup(lookup_from(&[(ENV_LOG_DIR, "/var/log/ab")]));
        assert_eq!(settings.level, crate::logging::default_log_level());
        assert_eq!(settings.dir, Some(PathBuf::from("/var/log/ab")));

        let settings = LogSettings::from_lookup(lookup_from(&[(ENV_LOG_LEVEL, "warn")]));
        assert_eq!(settings.level, "warn");
        assert_eq!(settings.dir, None);
    }
}
