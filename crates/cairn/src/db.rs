//! Site database.
//!
//! Uses SQLite to hold role membership, stored headers, resource metadata and
//! chunk references. Each table is written by exactly one component.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::error::Error;

/// Database handle for a site.
pub struct SiteDb {
    conn: Connection,
}

impl SiteDb {
    /// Open or create the site database.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), Error> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            -- Permission registry
            CREATE TABLE IF NOT EXISTS role_members (
                role BLOB NOT NULL,
                principal TEXT NOT NULL,
                PRIMARY KEY (role, principal)
            );
            CREATE INDEX IF NOT EXISTS idx_role_members_principal ON role_members(principal);

            -- Roles administered by whichever role is currently SITE_ADMIN
            CREATE TABLE IF NOT EXISTS resource_roles (
                role BLOB PRIMARY KEY
            );

            -- Resource store
            CREATE TABLE IF NOT EXISTS headers (
                address BLOB PRIMARY KEY,
                encoded BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS resources (
                path TEXT PRIMARY KEY,
                properties BLOB NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL DEFAULT 0,
                header BLOB NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS chunks (
                path TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                address BLOB NOT NULL,
                size INTEGER NOT NULL CHECK(size > 0),
                PRIMARY KEY (path, chunk_index)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_address ON chunks(address);
            "#,
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start the transaction an invocation runs in.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, Error> {
        Ok(self.conn.transaction()?)
    }
}

/// Read a site-wide setting.
pub(crate) fn get_setting(conn: &Connection, key: &str) -> Result<Option<Vec<u8>>, Error> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Write a site-wide setting.
pub(crate) fn put_setting(conn: &Connection, key: &str, value: &[u8]) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let db = SiteDb::open_in_memory().unwrap();
        let conn = db.connection();

        assert_eq!(get_setting(conn, "missing").unwrap(), None);

        put_setting(conn, "k", b"one").unwrap();
        put_setting(conn, "k", b"two").unwrap();
        assert_eq!(get_setting(conn, "k").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut db = SiteDb::open_in_memory().unwrap();
        {
            let tx = db.transaction().unwrap();
            put_setting(&tx, "k", b"v").unwrap();
        }
        assert_eq!(get_setting(db.connection(), "k").unwrap(), None);

        let tx = db.transaction().unwrap();
        put_setting(&tx, "k", b"v").unwrap();
        tx.commit().unwrap();
        assert_eq!(get_setting(db.connection(), "k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn open_on_disk_is_reentrant() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("site.db");
        {
            let db = SiteDb::open(&path).unwrap();
            put_setting(db.connection(), "k", b"v").unwrap();
        }
        let db = SiteDb::open(&path).unwrap();
        assert_eq!(get_setting(db.connection(), "k").unwrap(), Some(b"v".to_vec()));
    }
}
