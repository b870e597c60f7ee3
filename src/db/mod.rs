pub mod models;
pub mod queries;

use models::UniqueField;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current schema version, mirrored into `PRAGMA user_version` and `catalog_meta`.
pub const SCHEMA_VERSION: i32 = 2;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Constraint violation: {field} '{value}' already cataloged")]
    ConstraintViolation { field: UniqueField, value: String },
    #[error("Entry {0} not found")]
    NotFound(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// How to open the catalog file.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Delete an existing catalog before opening.
    pub overwrite: bool,
    /// Log every executed SQL statement at trace level.
    pub trace: bool,
}

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with(path: &Path, options: OpenOptions) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        if options.overwrite {
            remove_catalog_files(path)?;
        }
        let mut conn = Connection::open(path)?;
        if options.trace {
            conn.trace(Some(log_sql));
        }
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Required for remote_aliases cascade on entry deletion
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "catalog schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }
        if version < 2 {
            self.migrate_v2()?;
        }

        self.conn.execute(
            "UPDATE catalog_meta SET schema_version = ?1 WHERE id = 1",
            [SCHEMA_VERSION],
        )?;
        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: entries + singleton metadata record
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint     TEXT NOT NULL UNIQUE,
                content_hash    TEXT NOT NULL UNIQUE,
                remote_id       TEXT UNIQUE,
                filepath        TEXT NOT NULL UNIQUE,
                duration        REAL NOT NULL,
                rating          REAL CHECK (rating IS NULL OR (rating >= 0.0 AND rating <= 1.0)),

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_entries_duration ON entries(duration);

            CREATE TABLE IF NOT EXISTS catalog_meta (
                id              INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
                schema_version  INTEGER NOT NULL,
                playlist_id     TEXT
            );

            INSERT OR IGNORE INTO catalog_meta (id, schema_version) VALUES (1, 1);
            ",
        )?;
        Ok(())
    }

    /// V2: remote ids that resolved to an entry already linked elsewhere
    fn migrate_v2(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS remote_aliases (
                remote_id   TEXT PRIMARY KEY NOT NULL,
                entry_id    INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_aliases_entry ON remote_aliases(entry_id);
            ",
        )?;
        Ok(())
    }
}

/// Remove a catalog file and its WAL/SHM side files, if present.
fn remove_catalog_files(path: &Path) -> Result<()> {
    let mut removed = false;
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let file = PathBuf::from(name);
        match std::fs::remove_file(&file) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if removed {
        log::info!("Overwrite requested, deleted existing catalog {}", path.display());
    }
    Ok(())
}

/// Log target for statements traced with `OpenOptions::trace`.
pub const SQL_LOG_TARGET: &str = "mpsync::sql";

fn log_sql(sql: &str) {
    log::trace!(target: SQL_LOG_TARGET, "{sql}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_schema_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let meta_version: i32 = db
            .conn
            .query_row("SELECT schema_version FROM catalog_meta WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(meta_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_reopen_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let db = Database::open(&path).unwrap();
            db.set_playlist_id("PL123").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.playlist_id().unwrap().as_deref(), Some("PL123"));
    }

    #[test]
    fn test_overwrite_discards_existing_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        {
            let db = Database::open(&path).unwrap();
            db.set_playlist_id("PL123").unwrap();
        }
        let options = OpenOptions { overwrite: true, trace: false };
        let db = Database::open_with(&path, options).unwrap();
        assert_eq!(db.playlist_id().unwrap(), None);
    }

    #[test]
    fn test_meta_is_singleton() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .conn
            .execute("INSERT INTO catalog_meta (id, schema_version) VALUES (2, 1)", []);
        assert!(err.is_err());
    }
}
