//! Address book store: connection bootstrap and schema upgrades.
//!
//! A `Database` handle owns exactly one connection produced here. The
//! connection is only handed out once the address, variant and
//! communication tables are at the version this build expects.
//!
//! # Invariants
//! - `PRAGMA user_version` equals the last applied migration.
//! - A store written by a newer build is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, open_with_config};

pub type DbResult<T> = Result<T, DbError>;

/// Failure while opening or upgrading the store.
#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The store was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// A migration script failed; the whole upgrade was rolled back.
    MigrationFailed {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "address book schema {db_version} is newer than this build supports ({latest_supported})"
            ),
            Self::MigrationFailed {
                version,
                name,
                source,
            } => write!(f, "schema migration {version} ({name}) failed: {source}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) | Self::MigrationFailed { source: err, .. } => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
