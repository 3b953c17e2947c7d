//! Database handle: one long-lived connection and the session it hands to
//! every DAO created from it.
//!
//! # Invariants
//! - A handle is closed exactly once; afterwards every call on it (or on its
//!   DAOs) fails with `HandleClosed`.
//! - DAO construction validates the mapping against the live schema.

use super::generic::Dao;
use super::session::{self, HandleState, Session, SessionId, SharedState};
use super::{DaoError, DaoResult, Entity};
use crate::config::DatabaseConfig;
use crate::db;
use crate::schema::EntityMapping;
use log::info;
use rusqlite::Connection;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Shared handle to one logical database.
///
/// Cloning shares the same connection, session and pending transaction.
#[derive(Clone)]
pub struct Database {
    state: SharedState,
    handle_id: Uuid,
}

impl Database {
    /// Opens the configured database and applies pending migrations.
    pub fn open(config: &DatabaseConfig) -> DaoResult<Self> {
        let conn = db::open_with_config(config)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> DaoResult<Self> {
        let conn = db::open_db_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps an already bootstrapped connection.
    pub fn from_connection(conn: Connection) -> Self {
        let state = HandleState::new(conn);
        let handle_id = state.handle_id();
        info!("event=handle_open module=dao status=ok handle={handle_id}");
        Self {
            state: Arc::new(Mutex::new(state)),
            handle_id,
        }
    }

    pub fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    /// Acquires the current session, opening one if needed.
    pub fn open_session(&self) -> DaoResult<SessionId> {
        session::lock(&self.state)?.open_session()
    }

    /// Ends the current session; uncommitted work is rolled back.
    pub fn close_session(&self) -> DaoResult<()> {
        session::lock(&self.state)?.close_session()
    }

    /// Closes the handle. Terminal; a second call fails with `HandleClosed`.
    pub fn close_database(&self) -> DaoResult<()> {
        session::lock(&self.state)?.close()
    }

    pub fn is_closed(&self) -> DaoResult<bool> {
        Ok(session::lock(&self.state)?.is_closed())
    }

    pub fn has_pending_transaction(&self) -> DaoResult<bool> {
        session::lock(&self.state)?.has_pending_transaction()
    }

    pub fn commit(&self) -> DaoResult<()> {
        session::lock(&self.state)?.commit()
    }

    pub fn rollback(&self) -> DaoResult<()> {
        session::lock(&self.state)?.rollback()
    }

    /// DAO over the root mapping of `E`.
    pub fn dao<E: Entity>(&self) -> DaoResult<Dao<E>> {
        let mapping = E::mappings().first().copied().ok_or_else(|| {
            DaoError::Mapping(format!(
                "{} registers no mappings",
                std::any::type_name::<E>()
            ))
        })?;
        self.dao_for(mapping)
    }

    /// DAO restricted to the registered `variant` of `E`.
    pub fn variant_dao<E: Entity>(&self, variant: &str) -> DaoResult<Dao<E>> {
        let mapping = E::mappings()
            .iter()
            .copied()
            .find(|mapping| mapping.variant() == Some(variant))
            .ok_or_else(|| {
                DaoError::Mapping(format!(
                    "{} has no registered variant `{variant}`",
                    std::any::type_name::<E>()
                ))
            })?;
        self.dao_for(mapping)
    }

    /// Runs `op` with the open session; reads only.
    ///
    /// `op` runs under the handle lock. Calling back into this `Database` or
    /// any of its DAOs from inside `op` fails with `DaoError::ReentrantCall`.
    pub fn with_session<T>(&self, op: impl FnOnce(&Session<'_>) -> DaoResult<T>) -> DaoResult<T> {
        session::read(&self.state, op)
    }

    fn dao_for<E: Entity>(&self, mapping: &'static EntityMapping) -> DaoResult<Dao<E>> {
        mapping.validate()?;
        {
            let guard = session::lock(&self.state)?;
            mapping.ensure_ready(guard.connection()?)?;
        }
        Ok(Dao::new(self.state.clone(), mapping))
    }
}

impl Display for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match session::lock(&self.state) {
            Ok(guard) if guard.is_closed() => "closed",
            Ok(_) => "open",
            Err(DaoError::ReentrantCall) => "busy",
            Err(_) => "poisoned",
        };
        write!(f, "Database(handle={}, state={state})", self.handle_id)
    }
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("handle_id", &self.handle_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reports_open_and_closed() {
        let database = Database::open_in_memory().unwrap();
        assert!(database.to_string().ends_with("state=open)"));
        database.close_database().unwrap();
        assert!(database.to_string().ends_with("state=closed)"));
    }

    #[test]
    fn nested_calls_fail_instead_of_blocking() {
        let database = Database::open_in_memory().unwrap();
        let (shown, nested) = database
            .with_session(|_| Ok((database.to_string(), database.commit())))
            .unwrap();
        assert!(shown.ends_with("state=busy)"));
        assert!(matches!(nested, Err(DaoError::ReentrantCall)));

        // the lock is usable again once the closure returned
        database.commit().unwrap();
        assert!(database.to_string().ends_with("state=open)"));
    }

    #[test]
    fn sessions_reopen_with_new_ids() {
        let database = Database::open_in_memory().unwrap();
        let first = database.open_session().unwrap();
        assert_eq!(database.open_session().unwrap(), first);
        database.close_session().unwrap();
        let second = database.open_session().unwrap();
        assert!(second > first);
        database.close_database().unwrap();
    }
}
