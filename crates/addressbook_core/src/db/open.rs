//! Connection bootstrap for the address book store.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::{DatabaseConfig, DbLocation};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (or creates) a database file and applies pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_and_bootstrap("file", DEFAULT_BUSY_TIMEOUT, || {
        Connection::open(path.as_ref())
    })
}

/// Opens a private in-memory database and applies all migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_and_bootstrap("memory", DEFAULT_BUSY_TIMEOUT, Connection::open_in_memory)
}

/// Opens the database described by `config`.
///
/// # Side effects
/// - Emits `db_open` events with mode, duration and status.
pub fn open_with_config(config: &DatabaseConfig) -> DbResult<Connection> {
    match &config.location {
        DbLocation::Memory => {
            open_and_bootstrap("memory", config.busy_timeout, Connection::open_in_memory)
        }
        DbLocation::File(path) => open_and_bootstrap("file", config.busy_timeout, || {
            Connection::open(path)
        }),
    }
}

fn open_and_bootstrap(
    mode: &'static str,
    busy_timeout: Duration,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = connect().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        err
    })?;

    if let Err(err) = bootstrap_connection(&mut conn, busy_timeout) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
            started_at.elapsed().as_millis()
        );
        return Err(err);
    }

    info!(
        "event=db_open module=db status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    apply_migrations(conn)?;
    Ok(())
}
