//! Database migrations.
//!
//! Migrations are run in order and tracked in the `migrations` table.

use crate::{DatabaseError, DatabaseResult};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version > CURRENT_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current_version, CURRENT_VERSION
        )));
    }

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_outbound_batches(conn)?;
    }
    if current_version < 2 {
        migrate_v2_event_type_index(conn)?;
    }
    if current_version < 3 {
        migrate_v3_quarantined_batches(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: queued batches, delivered in ascending id order.
fn migrate_v1_outbound_batches(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: outbound batches");

    // AUTOINCREMENT keeps ids from being reused after the tail is deleted
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbound_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_type TEXT NOT NULL,
            txn_id TEXT NOT NULL UNIQUE,
            items_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    record_migration(conn, 1, "outbound_batches")?;
    Ok(())
}

/// V2: per event type backlog lookups for status reporting.
fn migrate_v2_event_type_index(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: event type index");

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_outbound_batches_event_type
            ON outbound_batches(event_type);
        ",
    )?;

    record_migration(conn, 2, "outbound_batches_event_type_index")?;
    Ok(())
}

/// V3: rows whose items can no longer be decoded, moved out of the queue.
fn migrate_v3_quarantined_batches(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v3: quarantined batches");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS quarantined_batches (
            id INTEGER PRIMARY KEY,
            event_type TEXT NOT NULL,
            txn_id TEXT NOT NULL,
            items_json TEXT NOT NULL,
            reason TEXT NOT NULL,
            quarantined_at TEXT NOT NULL
        );
        ",
    )?;

    record_migration(conn, 3, "quarantined_batches")?;
    Ok(())
}
