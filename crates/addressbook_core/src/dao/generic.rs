//! Typed DAO for one registered entity mapping.
//!
//! # Responsibility
//! - CRUD, query-by-example and pass-through queries for one entity type.
//! - Transaction control on the handle's shared transaction.
//!
//! # Invariants
//! - Every DAO of a handle shares one session; commit/rollback here affects
//!   work issued through any DAO of the same handle.
//! - `save` mutates the caller's entity only when the whole save succeeded.
//! - `rollback` never reverts in-memory state.

use super::persist::{self, Select};
use super::query::{self, QueryParams, QueryRow};
use super::session::{self, SharedState};
use super::{DaoResult, Entity, EntityId};
use crate::schema::EntityMapping;
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::time::Instant;

/// Generic DAO bound to one `Database` handle and one entity mapping.
///
/// Obtained from [`crate::dao::Database::dao`] or
/// [`crate::dao::Database::variant_dao`]; cloning is cheap and shares the
/// handle.
pub struct Dao<E: Entity> {
    state: SharedState,
    mapping: &'static EntityMapping,
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Dao<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            mapping: self.mapping,
            entity: PhantomData,
        }
    }
}

impl<E: Entity> Debug for Dao<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao")
            .field("entity", &self.mapping.entity)
            .field("variant", &self.mapping.variant())
            .finish()
    }
}

impl<E: Entity> Dao<E> {
    pub(crate) fn new(state: SharedState, mapping: &'static EntityMapping) -> Self {
        Self {
            state,
            mapping,
            entity: PhantomData,
        }
    }

    pub fn mapping(&self) -> &'static EntityMapping {
        self.mapping
    }

    pub fn entity_name(&self) -> &'static str {
        self.mapping.entity
    }

    /// Inserts a transient entity or updates a persisted one, together with
    /// its cascaded children. Returns the entity's identity.
    ///
    /// # Errors
    /// - `StaleVersion` when `entity` was saved from an outdated version.
    /// - `NotFound` when the identity no longer exists.
    /// - `ConstraintViolation` for a missing or conflicting owner reference.
    pub fn save(&self, entity: &mut E) -> DaoResult<EntityId> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = session::write(&self.state, |session| {
            let mut working = entity.clone();
            let id = persist::save(session, mapping, &mut working)?;
            Ok((id, working))
        });
        let result = result.map(|(id, working)| {
            *entity = working;
            id
        });
        self.log_outcome("save", started_at, &result);
        result
    }

    /// Returns `None` when `id` is not visible in the current transaction.
    pub fn fetch(&self, id: EntityId) -> DaoResult<Option<E>> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = session::read(&self.state, |session| persist::fetch_by_id(session, mapping, id));
        self.log_outcome("fetch", started_at, &result);
        result
    }

    /// All entities of this DAO's type, ordered by identity.
    pub fn fetch_all(&self) -> DaoResult<Vec<E>> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = session::read(&self.state, |session| {
            Select::for_mapping(mapping).fetch(session)
        });
        self.log_outcome("fetch_all", started_at, &result);
        result
    }

    /// Entities whose set fields match `template`, ordered by identity.
    ///
    /// Unset fields (`None`, empty text) are ignored, so a default template
    /// returns every entity of this DAO's type.
    pub fn find_by_example(&self, template: &E) -> DaoResult<Vec<E>> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = persist::example_select(mapping, template)
            .and_then(|select| session::read(&self.state, |session| select.fetch(session)));
        self.log_outcome("find_by_example", started_at, &result);
        result
    }

    pub fn find(&self, query: &str) -> DaoResult<Vec<QueryRow>> {
        self.find_with_params(query, &QueryParams::new())
    }

    /// Runs pass-through SQL with named parameters. Rows are not mapped to
    /// `E`.
    pub fn find_with_params(&self, query: &str, params: &QueryParams) -> DaoResult<Vec<QueryRow>> {
        let started_at = Instant::now();
        let result = query::find(&self.state, query, params);
        self.log_outcome("find", started_at, &result);
        result
    }

    /// Deletes `entity` and everything it owns.
    pub fn delete(&self, entity: &E) -> DaoResult<()> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = session::write(&self.state, |session| persist::delete(session, mapping, entity));
        self.log_outcome("delete", started_at, &result);
        result
    }

    /// Deletes every entity of this DAO's type; returns how many were removed.
    pub fn delete_all(&self) -> DaoResult<usize> {
        let started_at = Instant::now();
        let mapping = self.mapping;
        let result = session::write(&self.state, |session| persist::delete_all(session, mapping));
        self.log_outcome("delete_all", started_at, &result);
        result
    }

    pub fn commit(&self) -> DaoResult<()> {
        session::lock(&self.state)?.commit()
    }

    pub fn rollback(&self) -> DaoResult<()> {
        session::lock(&self.state)?.rollback()
    }

    pub fn close_session(&self) -> DaoResult<()> {
        session::lock(&self.state)?.close_session()
    }

    fn log_outcome<T>(&self, op: &str, started_at: Instant, result: &DaoResult<T>) {
        let duration_ms = started_at.elapsed().as_millis();
        match result {
            Ok(_) => debug!(
                "event=dao_op module=dao status=ok entity={} op={op} duration_ms={duration_ms}",
                self.mapping.entity
            ),
            Err(err) => warn!(
                "event=dao_op module=dao status=error entity={} op={op} duration_ms={duration_ms} error_kind={}",
                self.mapping.entity,
                err.kind()
            ),
        }
    }
}
