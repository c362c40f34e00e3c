//! Schema and migrations for the per-run SQLite event database (spec §4.6).

use crate::errors::CoreError;
use rusqlite::Connection;

refinery::embed_migrations!("migrations");

/// Applies the schema to a freshly created database file. Idempotent — safe
/// to call on a connection that's already at the latest migration.
pub fn migrate(conn: &mut Connection) -> Result<(), CoreError> {
    migrations::runner().run(conn)?;
    Ok(())
}
