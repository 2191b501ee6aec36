//! Database connection and queue operations.

use crate::{migrations, DatabaseError, DatabaseResult};
use chrono::Utc;
use parking_lot::Mutex;
use relay_outbox::{
    Batch, EntryId, EntryStore, OutboundItem, QueueEntry, StoreResult,
};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, error};

/// Move one queued row into `quarantined_batches`.
fn quarantine(conn: &mut Connection, id: i64, reason: &str) -> DatabaseResult<()> {
    let tx = conn.transaction()?;
    let moved = tx.execute(
        "INSERT INTO quarantined_batches (id, event_type, txn_id, items_json, reason, quarantined_at)
         SELECT id, event_type, txn_id, items_json, ?2, ?3 FROM outbound_batches WHERE id = ?1",
        params![id, reason, Utc::now().to_rfc3339()],
    )?;
    if moved != 1 {
        return Err(DatabaseError::InvalidData(format!(
            "batch {} vanished while quarantining",
            id
        )));
    }
    tx.execute("DELETE FROM outbound_batches WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(())
}

/// SQLite-backed queue storage.
///
/// All access goes through one connection behind a mutex, so store
/// operations are serialized.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path, running migrations if needed.
    pub fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        migrations::run_migrations(&conn)?;
        debug!(path = %path.display(), "Opened outbox database");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        // Note: WAL mode doesn't apply to in-memory databases
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append batches at the tail in a single transaction.
    pub fn insert_batches(&self, batches: &[Batch]) -> DatabaseResult<()> {
        if batches.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO outbound_batches (event_type, txn_id, items_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for batch in batches {
                let items_json = serde_json::to_string(&batch.items)?;
                stmt.execute(params![batch.event_type, batch.txn_id, items_json, now])?;
            }
        }
        tx.commit()?;

        debug!(count = batches.len(), "Inserted outbound batches");
        Ok(())
    }

    /// The entry with the lowest id, if any.
    ///
    /// Rows whose items cannot be decoded are moved to `quarantined_batches`
    /// and skipped, so they never block the entries behind them.
    pub fn get_oldest_batch(&self) -> DatabaseResult<Option<QueueEntry>> {
        let mut conn = self.conn.lock();

        loop {
            let result = conn.query_row(
                "SELECT id, event_type, txn_id, items_json
                 FROM outbound_batches ORDER BY id ASC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            );

            let (id, event_type, txn_id, items_json) = match result {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            match serde_json::from_str::<Vec<OutboundItem>>(&items_json) {
                Ok(items) => {
                    return Ok(Some(QueueEntry {
                        id: EntryId(id),
                        batch: Batch {
                            event_type,
                            txn_id,
                            items,
                        },
                    }));
                }
                Err(e) => {
                    error!(
                        entry_id = id,
                        txn_id = %txn_id,
                        error = %e,
                        "Unreadable batch items, quarantining row"
                    );
                    quarantine(&mut conn, id, &e.to_string())?;
                }
            }
        }
    }

    /// Number of rows moved out of the queue as unreadable.
    pub fn count_quarantined(&self) -> DatabaseResult<usize> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM quarantined_batches", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete an entry by id. Returns whether a row was removed.
    pub fn delete_batch(&self, id: EntryId) -> DatabaseResult<bool> {
        let count = self
            .conn
            .lock()
            .execute("DELETE FROM outbound_batches WHERE id = ?1", params![id.0])?;
        Ok(count > 0)
    }

    /// Number of queued entries.
    pub fn count_batches(&self) -> DatabaseResult<usize> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM outbound_batches",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Queued entry counts grouped by event type, ordered by event type.
    pub fn count_batches_by_event_type(&self) -> DatabaseResult<Vec<(String, usize)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_type, COUNT(*) FROM outbound_batches
             GROUP BY event_type ORDER BY event_type",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }
}

impl EntryStore for Database {
    fn append_entries(&self, batches: &[Batch]) -> StoreResult<()> {
        Ok(self.insert_batches(batches)?)
    }

    fn oldest_entry(&self) -> StoreResult<Option<QueueEntry>> {
        Ok(self.get_oldest_batch()?)
    }

    fn remove_entry(&self, id: EntryId) -> StoreResult<()> {
        self.delete_batch(id)?;
        Ok(())
    }

    fn pending_count(&self) -> StoreResult<usize> {
        Ok(self.count_batches()?)
    }
}
