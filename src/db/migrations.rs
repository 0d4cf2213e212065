// Database migrations
use anyhow::Result;
use rusqlite::Connection;

/// Bumped whenever a statement below changes shape
pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    // Create extension_settings table: one JSON blob per extension id
    conn.execute(
        "CREATE TABLE IF NOT EXISTS extension_settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            date_modified INTEGER NOT NULL
        )",
        [],
    )?;

    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
    }

    Ok(())
}
