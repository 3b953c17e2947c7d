//! Session and transaction state shared by one handle's DAOs.
//!
//! # Invariants
//! - At most one session is open per handle; every DAO of the handle uses it.
//! - SQLite's autocommit flag is the source of truth for "transaction open".
//! - A closed session reopens on the next operation; a closed handle never
//!   does.
//! - Mutating operations run between `SAVEPOINT` and `RELEASE`; the guard
//!   rolls back to the savepoint on every other exit path.
//! - Identities issued inside a rolled back transaction stay reserved in
//!   `sqlite_sequence`; an identity is never handed out twice.
//! - The handle lock is not reentrant: a thread already holding it gets
//!   `ReentrantCall` instead of deadlocking.

use super::persist;
use super::{DaoError, DaoResult, Entity, EntityId};
use crate::schema::Relationship;
use log::{debug, error, info, warn};
use rusqlite::{params, Connection};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use uuid::Uuid;

/// Identifier of one session on a handle; increases with every reopen.
pub type SessionId = u64;

pub(crate) type SharedState = Arc<Mutex<HandleState>>;

const SAVEPOINT_NAME: &str = "dao_operation";

thread_local! {
    /// Handles whose lock the current thread holds.
    static HELD_HANDLES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Locks the handle state; fails instead of deadlocking when the calling
/// thread already holds the same handle.
pub(crate) fn lock(state: &SharedState) -> DaoResult<HandleGuard<'_>> {
    let key = Arc::as_ptr(state) as usize;
    if HELD_HANDLES.with(|held| held.borrow().contains(&key)) {
        return Err(DaoError::ReentrantCall);
    }
    let guard = state.lock().map_err(|_| DaoError::LockPoisoned)?;
    HELD_HANDLES.with(|held| held.borrow_mut().push(key));
    Ok(HandleGuard { guard, key })
}

/// Lock guard that also tracks the holding thread.
pub(crate) struct HandleGuard<'a> {
    guard: MutexGuard<'a, HandleState>,
    key: usize,
}

impl Deref for HandleGuard<'_> {
    type Target = HandleState;

    fn deref(&self) -> &HandleState {
        &self.guard
    }
}

impl DerefMut for HandleGuard<'_> {
    fn deref_mut(&mut self) -> &mut HandleState {
        &mut self.guard
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        HELD_HANDLES.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().position(|key| *key == self.key) {
                held.swap_remove(position);
            }
        });
    }
}

/// Runs a read under the shared session.
pub(crate) fn read<T>(
    state: &SharedState,
    op: impl FnOnce(&Session<'_>) -> DaoResult<T>,
) -> DaoResult<T> {
    let mut guard = lock(state)?;
    let session = guard.session()?;
    op(&session)
}

/// Runs a mutation inside the shared transaction, scoped by a savepoint.
pub(crate) fn write<T>(
    state: &SharedState,
    op: impl FnOnce(&Session<'_>) -> DaoResult<T>,
) -> DaoResult<T> {
    let mut guard = lock(state)?;
    let value = {
        let session = guard.begin()?;
        let scope = OperationScope::begin(session.conn)?;
        let value = op(&session)?;
        scope.release()?;
        value
    };
    guard.record_operation();
    Ok(value)
}

/// Explicit view of the open session, valid while the handle lock is held.
///
/// Entity hooks receive one to load and save their owned children within the
/// same unit of work. While a `Session` is alive, calls back into the owning
/// `Database` or its DAOs on the same thread fail with `ReentrantCall`.
pub struct Session<'c> {
    conn: &'c Connection,
    id: SessionId,
}

impl<'c> Session<'c> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn conn(&self) -> &'c Connection {
        self.conn
    }

    /// Loads the children `relationship` attaches to `owner`, ordered by id.
    pub fn load_owned<C: Entity>(
        &self,
        relationship: &Relationship,
        owner: EntityId,
    ) -> DaoResult<Vec<C>> {
        persist::load_owned(self, relationship, owner)
    }

    /// Saves `children` as the complete owned set of `owner`.
    pub fn save_owned<C: Entity>(
        &self,
        relationship: &Relationship,
        owner: EntityId,
        children: &mut [C],
    ) -> DaoResult<()> {
        persist::save_owned(self, relationship, owner, children)
    }
}

struct SessionState {
    id: SessionId,
    opened_at: Instant,
    tx_started_at: Option<Instant>,
    operations: u32,
}

/// Connection plus session bookkeeping behind a handle's lock.
pub(crate) struct HandleState {
    handle_id: Uuid,
    conn: Option<Connection>,
    session: Option<SessionState>,
    last_session_id: SessionId,
}

impl HandleState {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            handle_id: Uuid::new_v4(),
            conn: Some(conn),
            session: None,
            last_session_id: 0,
        }
    }

    pub(crate) fn handle_id(&self) -> Uuid {
        self.handle_id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub(crate) fn connection(&self) -> DaoResult<&Connection> {
        self.conn.as_ref().ok_or(DaoError::HandleClosed)
    }

    pub(crate) fn has_pending_transaction(&self) -> DaoResult<bool> {
        Ok(!self.connection()?.is_autocommit())
    }

    /// Returns the current session id, opening a session if none is active.
    pub(crate) fn open_session(&mut self) -> DaoResult<SessionId> {
        if self.is_closed() {
            return Err(DaoError::HandleClosed);
        }
        if let Some(session) = &self.session {
            return Ok(session.id);
        }

        self.last_session_id += 1;
        let id = self.last_session_id;
        self.session = Some(SessionState {
            id,
            opened_at: Instant::now(),
            tx_started_at: None,
            operations: 0,
        });
        info!(
            "event=session_open module=dao status=ok handle={} session={id}",
            self.handle_id
        );
        Ok(id)
    }

    pub(crate) fn session(&mut self) -> DaoResult<Session<'_>> {
        let id = self.open_session()?;
        Ok(Session {
            conn: self.connection()?,
            id,
        })
    }

    /// Like [`HandleState::session`], with a write transaction guaranteed open.
    fn begin(&mut self) -> DaoResult<Session<'_>> {
        let id = self.open_session()?;
        if self.connection()?.is_autocommit() {
            self.connection()?.execute_batch("BEGIN IMMEDIATE;")?;
            if let Some(session) = self.session.as_mut() {
                session.tx_started_at = Some(Instant::now());
                session.operations = 0;
            }
            debug!(
                "event=tx_begin module=dao status=ok handle={} session={id}",
                self.handle_id
            );
        }
        Ok(Session {
            conn: self.connection()?,
            id,
        })
    }

    fn record_operation(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.operations += 1;
        }
    }

    /// Commits pending work; no-op without a transaction. On failure the
    /// transaction stays pending unless SQLite already abandoned it.
    pub(crate) fn commit(&mut self) -> DaoResult<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            debug!(
                "event=tx_commit module=dao status=skipped handle={} reason=nothing_pending",
                self.handle_id
            );
            return Ok(());
        }

        let started_at = Instant::now();
        let issued = issued_sequences(conn)?;
        if let Err(err) = conn.execute_batch("COMMIT;") {
            let still_pending = !conn.is_autocommit();
            error!(
                "event=tx_commit module=dao status=error handle={} still_pending={still_pending} error={err}",
                self.handle_id
            );
            if !still_pending {
                self.end_transaction();
                reserve_sequences(self.connection()?, &issued)?;
            }
            return Err(err.into());
        }

        let (operations, tx_ms) = self.end_transaction();
        info!(
            "event=tx_commit module=dao status=ok handle={} operations={operations} tx_ms={tx_ms} duration_ms={}",
            self.handle_id,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Discards pending work; no-op without a transaction.
    pub(crate) fn rollback(&mut self) -> DaoResult<()> {
        let conn = self.connection()?;
        if conn.is_autocommit() {
            debug!(
                "event=tx_rollback module=dao status=skipped handle={} reason=nothing_pending",
                self.handle_id
            );
            return Ok(());
        }

        let issued = issued_sequences(conn)?;
        if let Err(err) = conn.execute_batch("ROLLBACK;") {
            error!(
                "event=tx_rollback module=dao status=error handle={} error={err}",
                self.handle_id
            );
            return Err(err.into());
        }

        let (operations, tx_ms) = self.end_transaction();
        let reserved = reserve_sequences(self.connection()?, &issued).map_err(|err| {
            error!(
                "event=tx_rollback module=dao status=error handle={} error_kind=sequence_reserve error={err}",
                self.handle_id
            );
            err
        })?;
        info!(
            "event=tx_rollback module=dao status=ok handle={} operations={operations} tx_ms={tx_ms} reserved_sequences={reserved}",
            self.handle_id
        );
        Ok(())
    }

    /// Ends the session; pending work is rolled back, not flushed.
    pub(crate) fn close_session(&mut self) -> DaoResult<()> {
        let conn = self.connection()?;
        let Some(session_id) = self.session.as_ref().map(|session| session.id) else {
            return Ok(());
        };

        let discarded = !conn.is_autocommit();
        if discarded {
            warn!(
                "event=session_close module=dao status=rollback handle={} session={session_id} reason=uncommitted_work",
                self.handle_id
            );
            self.rollback()?;
        }

        if let Ok(conn) = self.connection() {
            conn.flush_prepared_statement_cache();
        }
        let open_ms = self
            .session
            .take()
            .map_or(0, |session| session.opened_at.elapsed().as_millis());
        info!(
            "event=session_close module=dao status=ok handle={} session={session_id} discarded_work={discarded} open_ms={open_ms}",
            self.handle_id
        );
        Ok(())
    }

    /// Closes session and connection; terminal.
    pub(crate) fn close(&mut self) -> DaoResult<()> {
        self.close_session()?;
        let conn = self.conn.take().ok_or(DaoError::HandleClosed)?;
        if let Err((conn, err)) = conn.close() {
            error!(
                "event=db_close module=dao status=error handle={} error={err}",
                self.handle_id
            );
            self.conn = Some(conn);
            return Err(err.into());
        }
        info!(
            "event=db_close module=dao status=ok handle={} sessions_opened={}",
            self.handle_id, self.last_session_id
        );
        Ok(())
    }

    fn end_transaction(&mut self) -> (u32, u128) {
        match self.session.as_mut() {
            Some(session) => {
                let tx_ms = session
                    .tx_started_at
                    .take()
                    .map_or(0, |started| started.elapsed().as_millis());
                (std::mem::take(&mut session.operations), tx_ms)
            }
            None => (0, 0),
        }
    }
}

impl Drop for HandleState {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(
                "event=db_close module=dao status=unclosed handle={} reason=dropped_without_close",
                self.handle_id
            );
        }
    }
}

/// Highest identity issued per `AUTOINCREMENT` table, as seen by `conn`.
fn issued_sequences(conn: &Connection) -> DaoResult<BTreeMap<String, EntityId>> {
    let mut stmt = conn.prepare_cached("SELECT name, seq FROM sqlite_sequence;")?;
    let mut rows = stmt.query([])?;
    let mut issued = BTreeMap::new();
    while let Some(row) = rows.next()? {
        issued.insert(row.get::<_, String>(0)?, row.get::<_, EntityId>(1)?);
    }
    Ok(issued)
}

/// Raises `sqlite_sequence` back to `issued` after SQLite discarded it with
/// the transaction. Returns how many tables needed it.
fn reserve_sequences(conn: &Connection, issued: &BTreeMap<String, EntityId>) -> DaoResult<usize> {
    let current = issued_sequences(conn)?;
    let behind: Vec<(&String, &EntityId)> = issued
        .iter()
        .filter(|(name, seq)| current.get(*name).map_or(true, |stored| stored < *seq))
        .collect();
    if behind.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    for (name, seq) in &behind {
        let updated = tx.execute(
            "UPDATE sqlite_sequence SET seq = max(seq, ?1) WHERE name = ?2;",
            params![seq, name],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?2, ?1);",
                params![seq, name],
            )?;
        }
    }
    tx.commit()?;
    Ok(behind.len())
}

/// Savepoint guard for one mutating DAO call.
struct OperationScope<'c> {
    conn: &'c Connection,
    released: bool,
}

impl<'c> OperationScope<'c> {
    fn begin(conn: &'c Connection) -> DaoResult<Self> {
        conn.execute_batch(&format!("SAVEPOINT {SAVEPOINT_NAME};"))?;
        Ok(Self {
            conn,
            released: false,
        })
    }

    fn release(mut self) -> DaoResult<()> {
        self.conn
            .execute_batch(&format!("RELEASE {SAVEPOINT_NAME};"))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for OperationScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let undo = format!("ROLLBACK TO {SAVEPOINT_NAME}; RELEASE {SAVEPOINT_NAME};");
        match self.conn.execute_batch(&undo) {
            Ok(()) => debug!("event=savepoint_rollback module=dao status=ok"),
            Err(err) => error!("event=savepoint_rollback module=dao status=error error={err}"),
        }
    }
}
