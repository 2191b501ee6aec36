//! SQLite-backed durable store for the relay outbox.
//!
//! `Database` implements [`relay_outbox::EntryStore`] on a single WAL-mode
//! connection. Entries live in the `outbound_batches` table; the
//! autoincrement row id is the delivery order.
//!
//! ```ignore
//! let db = Arc::new(Database::open(&paths.database_file())?);
//! let queue = DeliveryQueue::spawn(db, transport);
//! ```

mod db;
mod error;
mod migrations;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
