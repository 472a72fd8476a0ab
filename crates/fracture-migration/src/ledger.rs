//! The ledger of applied revisions.
//!
//! One row per applied revision, keyed by the integer form of its id. A row
//! is inserted when an upgrade step commits and deleted when the matching
//! downgrade step commits.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::revision;
use crate::{Error, Result};

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Longest name stored in the `name` column.
pub const MAX_NAME_LEN: usize = 256;

/// Display layout of the `migrated` column.
pub const MIGRATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    /// Auto-increment id
    pub id: i64,

    /// Revision id as an integer
    pub version_num: i64,

    /// Revision message
    pub name: String,

    /// Seconds the step took
    pub duration: f64,

    /// Unix timestamp of application
    pub migrated: Option<i64>,
}

impl LedgerRow {
    /// Application time.
    pub fn migrated_at(&self) -> Option<DateTime<Utc>> {
        self.migrated.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// Application time as `YYYY-MM-DD HH:MM:SS` (UTC), empty when unset.
    pub fn migrated_display(&self) -> String {
        self.migrated_at()
            .map(|dt| dt.format(MIGRATED_FORMAT).to_string())
            .unwrap_or_default()
    }
}

/// Values written for a completed upgrade step.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub version_num: i64,
    pub name: String,
    pub duration: f64,
    pub migrated: i64,
}

impl LedgerEntry {
    /// Entry stamped with the current time. The name is cut to
    /// [`MAX_NAME_LEN`] characters.
    pub fn now(version_num: i64, name: &str, duration: f64) -> Self {
        Self {
            version_num,
            name: name.chars().take(MAX_NAME_LEN).collect(),
            duration,
            migrated: Utc::now().timestamp(),
        }
    }
}

/// A ledger mutation produced by one migration step.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerChange {
    Insert(LedgerEntry),
    Remove(i64),
}

/// Handle on the ledger table.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_TABLE)
    }
}

impl Ledger {
    /// Ledger stored in `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the ledger.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version_num BIGINT,
    name VARCHAR(256),
    duration REAL,
    migrated INTEGER
)",
            quote_ident(&self.table)
        )
    }

    /// Creates the table if missing, optionally clearing it.
    pub fn ensure(&self, conn: &Connection, purge: bool) -> Result<()> {
        conn.execute_batch(&self.create_sql())?;
        if purge {
            debug!(table = %self.table, "purging ledger");
            conn.execute(&format!("DELETE FROM {}", quote_ident(&self.table)), [])?;
        }
        Ok(())
    }

    /// Drops the table if present.
    pub fn drop_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.table)))?;
        Ok(())
    }

    /// Whether the table exists yet.
    pub fn exists(&self, conn: &Connection) -> Result<bool> {
        table_exists(conn, &self.table)
    }

    /// Row recorded for `version`, if any.
    pub fn find(&self, conn: &Connection, version: i64) -> Result<Option<LedgerRow>> {
        let sql = format!(
            "SELECT id, version_num, name, duration, migrated FROM {} WHERE version_num = ?1",
            quote_ident(&self.table)
        );
        let row = conn
            .query_row(&sql, params![version], read_row)
            .optional()?;
        Ok(row)
    }

    /// Every row, oldest insert first.
    pub fn rows(&self, conn: &Connection) -> Result<Vec<LedgerRow>> {
        let sql = format!(
            "SELECT id, version_num, name, duration, migrated FROM {} ORDER BY id",
            quote_ident(&self.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The `limit` highest versions (all when `None`), descending.
    pub fn versions_desc(&self, conn: &Connection, limit: Option<u32>) -> Result<Vec<i64>> {
        let limit = limit.map_or(-1, i64::from);
        let sql = format!(
            "SELECT version_num FROM {} ORDER BY version_num DESC LIMIT ?1",
            quote_ident(&self.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;

        debug!(count = versions.len(), ?limit, "selected ledger versions");
        Ok(versions)
    }

    /// Versions strictly greater than `version`, descending.
    pub fn versions_above(&self, conn: &Connection, version: i64) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT version_num FROM {} WHERE version_num > ?1 ORDER BY version_num DESC",
            quote_ident(&self.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let versions = stmt
            .query_map(params![version], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;

        debug!(count = versions.len(), version, "selected ledger versions above");
        Ok(versions)
    }

    /// Highest recorded version strictly below `revision`.
    ///
    /// This is the down revision in fractured history: the static chain
    /// is never consulted.
    pub fn down_revision(&self, conn: &Connection, revision: &str) -> Result<Option<String>> {
        let version = revision::version_num(revision)
            .ok_or_else(|| Error::InvalidRevision(revision.to_string()))?;
        let sql = format!(
            "SELECT version_num FROM {} WHERE version_num < ?1 ORDER BY version_num DESC LIMIT 1",
            quote_ident(&self.table)
        );
        let down: Option<i64> = conn
            .query_row(&sql, params![version], |row| row.get(0))
            .optional()?;

        debug!(revision, ?down, "resolved down revision");
        Ok(down.map(|v| v.to_string()))
    }

    /// Applies a change on `conn`.
    pub fn apply(&self, conn: &Connection, change: &LedgerChange) -> Result<()> {
        match change {
            LedgerChange::Insert(entry) => {
                debug!(
                    version = entry.version_num,
                    name = %entry.name,
                    duration = entry.duration,
                    "insert into ledger"
                );
                conn.execute(
                    &format!(
                        "INSERT INTO {} (version_num, name, duration, migrated) VALUES (?1, ?2, ?3, ?4)",
                        quote_ident(&self.table)
                    ),
                    params![entry.version_num, entry.name, entry.duration, entry.migrated],
                )?;
            }
            LedgerChange::Remove(version) => {
                debug!(version, "remove from ledger");
                conn.execute(
                    &format!(
                        "DELETE FROM {} WHERE version_num = ?1",
                        quote_ident(&self.table)
                    ),
                    params![version],
                )?;
            }
        }
        Ok(())
    }

    /// Renders a change as a literal SQL statement.
    pub fn render(&self, change: &LedgerChange) -> String {
        match change {
            LedgerChange::Insert(entry) => format!(
                "INSERT INTO {} (version_num, name, duration, migrated) VALUES ({}, {}, {}, {});",
                quote_ident(&self.table),
                entry.version_num,
                quote_literal(&entry.name),
                entry.duration,
                entry.migrated
            ),
            LedgerChange::Remove(version) => format!(
                "DELETE FROM {} WHERE version_num = {version};",
                quote_ident(&self.table)
            ),
        }
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerRow> {
    Ok(LedgerRow {
        id: row.get(0)?,
        version_num: row.get(1)?,
        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        duration: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
        migrated: row.get(4)?,
    })
}

/// Double-quotes an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quotes an SQL string literal.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether `name` is a table in the main schema.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(versions: &[i64]) -> (Connection, Ledger) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        ledger.ensure(&conn, false).unwrap();
        for v in versions {
            ledger
                .apply(&conn, &LedgerChange::Insert(LedgerEntry::now(*v, "step", 0.5)))
                .unwrap();
        }
        (conn, ledger)
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let (conn, ledger) = ledger_with(&[20_240_101_000_000]);
        ledger.ensure(&conn, false).unwrap();
        assert_eq!(ledger.rows(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_purge_clears_rows() {
        let (conn, ledger) = ledger_with(&[20_240_101_000_000, 20_240_102_000_000]);
        ledger.ensure(&conn, true).unwrap();
        assert!(ledger.rows(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_find() {
        let (conn, ledger) = ledger_with(&[20_240_101_000_000]);

        let row = ledger.find(&conn, 20_240_101_000_000).unwrap().unwrap();
        assert_eq!(row.version_num, 20_240_101_000_000);
        assert_eq!(row.name, "step");
        assert!(row.migrated.is_some());
        assert!((row.duration - 0.5).abs() < f64::EPSILON);

        assert!(ledger.find(&conn, 20_240_102_000_000).unwrap().is_none());
    }

    #[test]
    fn test_find_on_missing_table_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        assert!(!ledger.exists(&conn).unwrap());
        assert!(matches!(ledger.find(&conn, 1), Err(Error::Database(_))));
    }

    #[test]
    fn test_remove() {
        let (conn, ledger) = ledger_with(&[20_240_101_000_000, 20_240_102_000_000]);
        ledger
            .apply(&conn, &LedgerChange::Remove(20_240_101_000_000))
            .unwrap();

        let rows = ledger.rows(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version_num, 20_240_102_000_000);
    }

    #[test]
    fn test_versions_desc_with_limit() {
        let (conn, ledger) =
            ledger_with(&[20_240_102_000_000, 20_240_101_000_000, 20_240_103_000_000]);

        assert_eq!(
            ledger.versions_desc(&conn, Some(2)).unwrap(),
            vec![20_240_103_000_000, 20_240_102_000_000]
        );
        assert_eq!(ledger.versions_desc(&conn, Some(10)).unwrap().len(), 3);
        assert_eq!(ledger.versions_desc(&conn, None).unwrap().len(), 3);
        assert!(ledger.versions_desc(&conn, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_versions_above() {
        let (conn, ledger) =
            ledger_with(&[20_240_101_000_000, 20_240_102_000_000, 20_240_103_000_000]);

        assert_eq!(
            ledger.versions_above(&conn, 20_240_101_000_000).unwrap(),
            vec![20_240_103_000_000, 20_240_102_000_000]
        );
        assert!(ledger
            .versions_above(&conn, 20_240_103_000_000)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_down_revision() {
        let (conn, ledger) = ledger_with(&[20_240_101_000_000, 20_240_103_000_000]);

        assert_eq!(
            ledger.down_revision(&conn, "20240103000000").unwrap().as_deref(),
            Some("20240101000000")
        );
        assert_eq!(
            ledger.down_revision(&conn, "20240102000000").unwrap().as_deref(),
            Some("20240101000000")
        );
        assert_eq!(ledger.down_revision(&conn, "20240101000000").unwrap(), None);
        assert!(matches!(
            ledger.down_revision(&conn, "abc123"),
            Err(Error::InvalidRevision(_))
        ));
    }

    #[test]
    fn test_name_is_truncated() {
        let entry = LedgerEntry::now(1, &"x".repeat(400), 0.0);
        assert_eq!(entry.name.len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_render_escapes_name() {
        let ledger = Ledger::default();
        let entry = LedgerEntry {
            version_num: 20_240_101_000_000,
            name: "it's".to_string(),
            duration: 1.5,
            migrated: 1_700_000_000,
        };

        assert_eq!(
            ledger.render(&LedgerChange::Insert(entry)),
            "INSERT INTO \"schema_migrations\" (version_num, name, duration, migrated) \
             VALUES (20240101000000, 'it''s', 1.5, 1700000000);"
        );
        assert_eq!(
            ledger.render(&LedgerChange::Remove(20_240_101_000_000)),
            "DELETE FROM \"schema_migrations\" WHERE version_num = 20240101000000;"
        );
    }

    #[test]
    fn test_migrated_display() {
        let row = LedgerRow {
            id: 1,
            version_num: 20_240_101_000_000,
            name: "x".to_string(),
            duration: 0.0,
            migrated: Some(0),
        };
        assert_eq!(row.migrated_display(), "1970-01-01 00:00:00");
    }
}
