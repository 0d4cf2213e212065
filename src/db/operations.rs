use rusqlite::{params, OptionalExtension};

use crate::db::connection::DatabaseConnection;

/// Key/value operations on the settings table
pub struct DbOperations;

impl DbOperations {
    /// Read the raw JSON blob stored under `key`
    pub fn get_settings_blob(
        db: &DatabaseConnection,
        key: &str,
    ) -> Result<Option<String>, anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();

        let value = conn
            .query_row(
                "SELECT value FROM extension_settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Insert or replace the JSON blob stored under `key`
    pub fn put_settings_blob(
        db: &DatabaseConnection,
        key: &str,
        value: &str,
    ) -> Result<(), anyhow::Error> {
        let conn = db.get_connection();
        let conn = conn.lock();
        let now = chrono::Utc::now().timestamp();

        conn.execute(
            "INSERT INTO extension_settings (key, value, date_modified) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, date_modified = excluded.date_modified",
            params![key, value, now],
        )?;

        Ok(())
    }
}
