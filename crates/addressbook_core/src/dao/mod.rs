//! Generic data access layer.
//!
//! # Responsibility
//! - Provide one generic DAO (`Dao<E>`) for every mapped entity type.
//! - Own the session/transaction discipline of a `Database` handle.
//! - Translate SQLite failures into semantic `DaoError` kinds.
//!
//! # Invariants
//! - All DAOs of one handle share one session and one pending transaction.
//! - Every mutating call runs in a savepoint; a failed call leaves no
//!   partial writes behind and earlier pending work untouched.
//! - Nothing here retries; every failure is surfaced to the caller.

use crate::db::DbError;
use crate::schema::EntityMapping;
use rusqlite::types::FromSql;
use rusqlite::{ErrorCode, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod generic;
mod handle;
mod persist;
mod query;
mod session;

pub use generic::Dao;
pub use handle::Database;
pub use query::{QueryParams, QueryRow};
pub use rusqlite::types::Value;
pub use session::{Session, SessionId};

/// Server-assigned surrogate identity.
pub type EntityId = i64;

/// Optimistic concurrency counter; `0` after the first insert.
pub type Version = i64;

pub type DaoResult<T> = Result<T, DaoError>;

/// Errors surfaced by `Database` and `Dao` operations.
#[derive(Debug)]
pub enum DaoError {
    /// Identity absent from the current transactional view (`id` is `None`
    /// for an entity that was never persisted).
    NotFound {
        entity: &'static str,
        id: Option<EntityId>,
    },
    /// In-memory version differs from the stored one; re-fetch and retry.
    StaleVersion {
        entity: &'static str,
        id: EntityId,
        expected: Version,
        actual: Version,
    },
    /// Missing required reference, foreign key or uniqueness failure.
    ConstraintViolation(String),
    /// Pass-through query text could not be prepared.
    QuerySyntax(String),
    /// Named parameters do not line up with the query's placeholders.
    ParameterBinding(String),
    /// The database handle was closed; terminal.
    HandleClosed,
    /// A thread panicked while holding the handle lock.
    LockPoisoned,
    /// The calling thread already holds the handle lock, e.g. a DAO call
    /// made from inside `Database::with_session` or an entity hook.
    ReentrantCall,
    /// Mapping registry misuse or schema mismatch.
    Mapping(String),
    /// Persisted row cannot be turned into an entity.
    InvalidData(String),
    /// Untranslated storage failure.
    Storage(DbError),
}

impl DaoError {
    /// Stable snake_case tag used in log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::StaleVersion { .. } => "stale_version",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::QuerySyntax(_) => "query_syntax",
            Self::ParameterBinding(_) => "parameter_binding",
            Self::HandleClosed => "handle_closed",
            Self::LockPoisoned => "lock_poisoned",
            Self::ReentrantCall => "reentrant_call",
            Self::Mapping(_) => "mapping",
            Self::InvalidData(_) => "invalid_data",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for DaoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id: Some(id) } => write!(f, "{entity} not found: {id}"),
            Self::NotFound { entity, id: None } => {
                write!(f, "{entity} not found: entity was never persisted")
            }
            Self::StaleVersion {
                entity,
                id,
                expected,
                actual,
            } => write!(
                f,
                "stale {entity} {id}: saved from version {expected}, stored version is {actual}"
            ),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::QuerySyntax(message) => write!(f, "malformed query: {message}"),
            Self::ParameterBinding(message) => write!(f, "parameter binding failed: {message}"),
            Self::HandleClosed => write!(f, "database handle is closed"),
            Self::LockPoisoned => write!(f, "database handle lock is poisoned"),
            Self::ReentrantCall => {
                write!(f, "database handle is already in use by this thread")
            }
            Self::Mapping(message) => write!(f, "mapping error: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DaoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DaoError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(message.unwrap_or_else(|| failure.to_string()))
            }
            other => Self::Storage(DbError::Sqlite(other)),
        }
    }
}

impl From<DbError> for DaoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            other => Self::Storage(other),
        }
    }
}

/// A persisted type the generic DAO can store.
///
/// Implementations only describe values; all SQL is derived from the
/// mappings returned by [`Entity::mappings`].
pub trait Entity: Clone {
    /// Registered mappings; the first one is the root mapping, the rest are
    /// variant mappings addressed through `Database::variant_dao`.
    fn mappings() -> &'static [&'static EntityMapping];

    fn id(&self) -> Option<EntityId>;

    fn version(&self) -> Option<Version>;

    /// Called once the entity's row reached the store.
    fn mark_persisted(&mut self, id: EntityId, version: Version);

    /// Values for `table`'s mapped columns in declared order, or `None` when
    /// this entity has no row in that table.
    fn column_values(&self, table: &str) -> Option<Vec<Value>>;

    fn from_row(row: &MappedRow<'_, '_>) -> DaoResult<Self>;

    /// Back-reference of an owned entity.
    fn owner_id(&self) -> Option<EntityId> {
        None
    }

    fn attach_owner(&mut self, _owner: EntityId) {}

    /// Persists owned children after the entity itself was written.
    ///
    /// Runs under the handle lock: use `session`, not a `Dao`, for any
    /// storage access.
    fn save_children(&mut self, _session: &Session<'_>) -> DaoResult<()> {
        Ok(())
    }

    /// Materializes owned children after the entity was read. Same locking
    /// rule as [`Entity::save_children`].
    fn load_children(&mut self, _session: &Session<'_>) -> DaoResult<()> {
        Ok(())
    }
}

/// Row produced by the DAO's mapped `SELECT`, addressed by table and column.
pub struct MappedRow<'r, 's> {
    row: &'r Row<'s>,
    mapping: &'static EntityMapping,
}

impl<'r, 's> MappedRow<'r, 's> {
    pub(crate) fn new(row: &'r Row<'s>, mapping: &'static EntityMapping) -> Self {
        Self { row, mapping }
    }

    pub fn mapping(&self) -> &'static EntityMapping {
        self.mapping
    }

    pub fn id(&self) -> DaoResult<EntityId> {
        self.get(self.mapping.root.name, self.mapping.id_column)
    }

    pub fn version(&self) -> DaoResult<Version> {
        self.get(self.mapping.root.name, self.mapping.version_column)
    }

    pub fn get<T: FromSql>(&self, table: &str, column: &str) -> DaoResult<T> {
        self.row
            .get(column_alias(table, column).as_str())
            .map_err(|err| {
                DaoError::InvalidData(format!(
                    "{}: cannot read `{table}.{column}`: {err}",
                    self.mapping.entity
                ))
            })
    }

    /// Whether the row has a matching row in joined table `table`.
    pub fn has_row(&self, table: &str) -> DaoResult<bool> {
        let id: Option<EntityId> = self.get(table, self.mapping.id_column)?;
        Ok(id.is_some())
    }
}

pub(crate) fn column_alias(table: &str, column: &str) -> String {
    format!("{table}.{column}")
}
