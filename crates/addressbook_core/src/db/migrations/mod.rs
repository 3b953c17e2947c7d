//! Ordered schema scripts for the address book tables.
//!
//! Versions start at 1 and grow by one. Pending scripts run together in a
//! single transaction, so a store is either fully upgraded or untouched.

use crate::db::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "address_book",
        sql: include_str!("0001_address_book.sql"),
    },
    Migration {
        version: 2,
        name: "lookup_indexes",
        sql: include_str!("0002_lookup_indexes.sql"),
    },
];

/// Schema version this build creates and understands.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Schema version recorded in the store.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Brings the store up to [`latest_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    upgrade(conn, MIGRATIONS)
}

fn upgrade(conn: &mut Connection, migrations: &[Migration]) -> DbResult<()> {
    let from = schema_version(conn)?;
    let latest = migrations.last().map_or(0, |migration| migration.version);
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|migration| migration.version > from)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in pending {
        let applied = tx
            .execute_batch(migration.sql)
            .and_then(|()| tx.pragma_update(None, "user_version", migration.version));
        if let Err(source) = applied {
            error!(
                "event=db_migrate module=db status=error version={} name={} error={source}",
                migration.version, migration.name
            );
            return Err(DbError::MigrationFailed {
                version: migration.version,
                name: migration.name,
                source,
            });
        }
        info!(
            "event=db_migrate module=db status=applied version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={from} to_version={latest}");
    Ok(())
}
