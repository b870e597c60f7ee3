use super::models::{CatalogStats, Entry, EntryFilter, EntryUpdate, NewEntry, UniqueField};
use super::{Database, DbError, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const ENTRY_COLUMNS: &str = "id, fingerprint, content_hash, remote_id, filepath, duration, rating";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        content_hash: row.get(2)?,
        remote_id: row.get(3)?,
        filepath: row.get(4)?,
        duration: row.get(5)?,
        rating: row.get(6)?,
    })
}

impl Database {
    /// Look up a single entry by one of its unique fields.
    pub fn lookup_by(&self, field: UniqueField, value: &str) -> Result<Option<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE {} = ?1",
            field.column()
        );
        let entry = self
            .conn
            .query_row(&sql, params![value], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    pub fn lookup_by_filepath(&self, filepath: &str) -> Result<Option<Entry>> {
        self.lookup_by(UniqueField::Filepath, filepath)
    }

    pub fn lookup_by_remote_id(&self, remote_id: &str) -> Result<Option<Entry>> {
        self.lookup_by(UniqueField::RemoteId, remote_id)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<Entry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
                params![id],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// List entries matching every set field of `filter`, ordered by (duration, id).
    pub fn list(&self, filter: &EntryFilter) -> Result<Vec<Entry>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut push = |column: &str, value: Value| {
            values.push(value);
            clauses.push(format!("{column} = ?{}", values.len()));
        };
        if let Some(id) = filter.id {
            push("id", Value::Integer(id));
        }
        if let Some(fp) = &filter.fingerprint {
            push("fingerprint", Value::Text(fp.clone()));
        }
        if let Some(hash) = &filter.content_hash {
            push("content_hash", Value::Text(hash.clone()));
        }
        if let Some(remote_id) = &filter.remote_id {
            push("remote_id", Value::Text(remote_id.clone()));
        }
        if let Some(path) = &filter.filepath {
            push("filepath", Value::Text(path.clone()));
        }
        if let Some(duration) = filter.duration {
            push("duration", Value::Real(duration));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries{where_clause} ORDER BY duration, id");

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entries with `lo <= duration <= hi`, ordered by (duration, id).
    pub fn list_duration_window(&self, lo: f64, hi: f64) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE duration >= ?1 AND duration <= ?2
             ORDER BY duration, id"
        ))?;
        let entries = stmt
            .query_map(params![lo, hi], entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// First unique field of `entry` that collides with an existing row.
    pub fn find_conflict(&self, entry: &NewEntry) -> Result<Option<UniqueField>> {
        find_conflict_in(&self.conn, entry)
    }

    /// Fail with [`DbError::ConstraintViolation`] if `entry` collides with an existing row.
    pub fn check_unique(&self, entry: &NewEntry) -> Result<()> {
        match self.find_conflict(entry)? {
            Some(field) => Err(violation(field, entry)),
            None => Ok(()),
        }
    }

    /// Insert and commit a new entry.
    ///
    /// Fails with [`DbError::ConstraintViolation`] when a unique field collides;
    /// callers treat that as "already present".
    pub fn insert(&self, entry: &NewEntry) -> Result<Entry> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = Self::insert_row(&tx, entry)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Insert an entry on `conn` without committing (used within a transaction).
    pub fn insert_row(conn: &Connection, entry: &NewEntry) -> Result<Entry> {
        if let Some(field) = find_conflict_in(conn, entry)? {
            return Err(violation(field, entry));
        }

        conn.execute(
            "INSERT INTO entries (fingerprint, content_hash, remote_id, filepath, duration, rating)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.fingerprint,
                entry.content_hash,
                entry.remote_id,
                entry.filepath,
                entry.duration,
                entry.rating,
            ],
        )
        .map_err(|e| map_unique_error(e, entry))?;

        Ok(Entry {
            id: conn.last_insert_rowid(),
            fingerprint: entry.fingerprint.clone(),
            content_hash: entry.content_hash.clone(),
            remote_id: entry.remote_id.clone(),
            filepath: entry.filepath.clone(),
            duration: entry.duration,
            rating: entry.rating,
        })
    }

    /// Partial update of rating, duration and remote_id.
    pub fn update(&self, id: i64, update: &EntryUpdate) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(rating) = update.rating {
            values.push(rating.map(Value::Real).unwrap_or(Value::Null));
            sets.push(format!("rating = ?{}", values.len()));
        }
        if let Some(duration) = update.duration {
            values.push(Value::Real(duration));
            sets.push(format!("duration = ?{}", values.len()));
        }
        if let Some(remote_id) = &update.remote_id {
            values.push(Value::Text(remote_id.clone()));
            sets.push(format!("remote_id = ?{}", values.len()));
        }

        if sets.is_empty() {
            return match self.get_entry(id)? {
                Some(_) => Ok(()),
                None => Err(DbError::NotFound(id)),
            };
        }

        values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE entries SET {}, updated_at = datetime('now') WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );

        let tx = self.conn.unchecked_transaction()?;
        let changed = tx
            .execute(&sql, params_from_iter(values.iter()))
            .map_err(|e| match (&update.remote_id, unique_column(&e)) {
                (Some(remote_id), Some(UniqueField::RemoteId)) => DbError::ConstraintViolation {
                    field: UniqueField::RemoteId,
                    value: remote_id.clone(),
                },
                _ => DbError::from(e),
            })?;
        if changed == 0 {
            return Err(DbError::NotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete an entry. Returns whether a row was removed; absent ids are not an error.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM entries WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Record a remote item as another source of an already-linked entry.
    pub fn add_remote_alias(&self, remote_id: &str, entry_id: i64) -> Result<()> {
        if self.get_entry(entry_id)?.is_none() {
            return Err(DbError::NotFound(entry_id));
        }
        self.conn.execute(
            "INSERT OR IGNORE INTO remote_aliases (remote_id, entry_id) VALUES (?1, ?2)",
            params![remote_id, entry_id],
        )?;
        Ok(())
    }

    /// Whether a remote item is linked to an entry, directly or through an alias.
    pub fn remote_id_known(&self, remote_id: &str) -> Result<bool> {
        let known: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM entries WHERE remote_id = ?1)
                 OR EXISTS (SELECT 1 FROM remote_aliases WHERE remote_id = ?1)",
            params![remote_id],
            |row| row.get(0),
        )?;
        Ok(known)
    }

    pub fn filepath_taken(&self, filepath: &str) -> Result<bool> {
        Ok(self.lookup_by_filepath(filepath)?.is_some())
    }

    pub fn count_entries(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count)
    }

    /// The remote playlist identifier stored in the metadata record.
    pub fn playlist_id(&self) -> Result<Option<String>> {
        let id: Option<String> = self.conn.query_row(
            "SELECT playlist_id FROM catalog_meta WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn set_playlist_id(&self, playlist_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE catalog_meta SET playlist_id = ?1 WHERE id = 1",
            params![playlist_id],
        )?;
        Ok(())
    }

    /// Get catalog statistics.
    pub fn stats(&self) -> Result<CatalogStats> {
        let (total_entries, linked_entries, rated_entries, total_duration_hours): (i64, i64, i64, f64) =
            self.conn.query_row(
                "SELECT COUNT(*),
                        COUNT(remote_id),
                        COUNT(rating),
                        COALESCE(SUM(duration), 0.0) / 3600.0
                 FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let remote_aliases: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM remote_aliases", [], |row| row.get(0))?;

        Ok(CatalogStats {
            total_entries,
            linked_entries,
            rated_entries,
            remote_aliases,
            total_duration_hours,
        })
    }
}

fn find_conflict_in(conn: &Connection, entry: &NewEntry) -> Result<Option<UniqueField>> {
    for field in UniqueField::CHECK_ORDER {
        let Some(value) = field.value_of(entry) else {
            continue;
        };
        let taken: bool = conn.query_row(
            &format!(
                "SELECT EXISTS (SELECT 1 FROM entries WHERE {} = ?1)",
                field.column()
            ),
            params![value],
            |row| row.get(0),
        )?;
        if taken {
            return Ok(Some(field));
        }
    }
    Ok(None)
}

fn violation(field: UniqueField, entry: &NewEntry) -> DbError {
    DbError::ConstraintViolation {
        field,
        value: field.value_of(entry).unwrap_or_default().to_string(),
    }
}

/// The entries column named by a SQLite UNIQUE failure, if `err` is one.
fn unique_column(err: &rusqlite::Error) -> Option<UniqueField> {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg))
            if e.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
        {
            msg.strip_prefix("UNIQUE constraint failed: entries.")
                .and_then(UniqueField::from_column)
        }
        _ => None,
    }
}

fn map_unique_error(err: rusqlite::Error, entry: &NewEntry) -> DbError {
    match unique_column(&err) {
        Some(field) => violation(field, entry),
        None => err.into(),
    }
}
