//! Head tracking.
//!
//! The version table holds the current head. [`HeadMaintainer`] decides how
//! each migration step moves it; the resulting [`HeadChange`] is then either
//! executed or rendered as SQL.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::ledger::{quote_ident, quote_literal, table_exists};
use crate::planner::{Direction, MigrationStep};
use crate::revision::{is_timestamp, revision_gt};
use crate::{Error, Result};

/// Default head table name.
pub const DEFAULT_VERSION_TABLE: &str = "schema_version";

/// A head movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadChange {
    Insert(String),
    Update { from: String, to: String },
    Delete(String),
}

/// Handle on the head table.
#[derive(Debug, Clone)]
pub struct VersionTable {
    table: String,
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new(DEFAULT_VERSION_TABLE)
    }
}

impl VersionTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (version_num VARCHAR(32) NOT NULL PRIMARY KEY)",
            quote_ident(&self.table)
        )
    }

    /// Creates the table if missing, optionally clearing it.
    pub fn ensure(&self, conn: &Connection, purge: bool) -> Result<()> {
        conn.execute_batch(&self.create_sql())?;
        if purge {
            conn.execute(&format!("DELETE FROM {}", quote_ident(&self.table)), [])?;
        }
        Ok(())
    }

    pub fn drop_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.table)))?;
        Ok(())
    }

    /// Current heads; empty when the table does not exist yet.
    pub fn heads(&self, conn: &Connection) -> Result<Vec<String>> {
        if !table_exists(conn, &self.table)? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT version_num FROM {} ORDER BY version_num",
            quote_ident(&self.table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let heads = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(heads)
    }

    pub fn apply(&self, conn: &Connection, change: &HeadChange) -> Result<()> {
        let table = quote_ident(&self.table);
        match change {
            HeadChange::Insert(rev) => {
                conn.execute(
                    &format!("INSERT INTO {table} (version_num) VALUES (?1)"),
                    params![rev],
                )?;
            }
            HeadChange::Update { from, to } => {
                conn.execute(
                    &format!("UPDATE {table} SET version_num = ?1 WHERE version_num = ?2"),
                    params![to, from],
                )?;
            }
            HeadChange::Delete(rev) => {
                conn.execute(
                    &format!("DELETE FROM {table} WHERE version_num = ?1"),
                    params![rev],
                )?;
            }
        }
        Ok(())
    }

    pub fn render(&self, change: &HeadChange) -> String {
        let table = quote_ident(&self.table);
        match change {
            HeadChange::Insert(rev) => format!(
                "INSERT INTO {table} (version_num) VALUES ({});",
                quote_literal(rev)
            ),
            HeadChange::Update { from, to } => format!(
                "UPDATE {table} SET version_num = {} WHERE version_num = {};",
                quote_literal(to),
                quote_literal(from)
            ),
            HeadChange::Delete(rev) => format!(
                "DELETE FROM {table} WHERE version_num = {};",
                quote_literal(rev)
            ),
        }
    }
}

/// Moves the head across a batch of steps.
#[derive(Debug, Clone, Default)]
pub struct HeadMaintainer {
    heads: Vec<String>,
}

impl HeadMaintainer {
    pub fn new(heads: Vec<String>) -> Self {
        Self { heads }
    }

    pub fn heads(&self) -> &[String] {
        &self.heads
    }

    pub fn into_heads(self) -> Vec<String> {
        self.heads
    }

    /// Computes the head movement for `step`.
    ///
    /// `down_revision` resolves the highest tracked revision below a given
    /// one; it is only called for downgrades.
    ///
    /// A legacy head can only be replaced in sync mode; anything else would
    /// need the old chain to interpret it.
    pub fn update_to_step<F>(
        &mut self,
        step: &MigrationStep,
        is_sync: bool,
        down_revision: F,
    ) -> Result<Option<HeadChange>>
    where
        F: FnOnce(&str) -> Result<Option<String>>,
    {
        let revision = step.revision.clone();

        let Some(head) = self.heads.first().cloned() else {
            debug!(head = %revision, "no current head");
            self.heads = vec![revision.clone()];
            return Ok(Some(HeadChange::Insert(revision)));
        };

        if !is_timestamp(&head) {
            if is_sync {
                return Ok(Some(self.replace(head, revision)));
            }
            return Err(Error::InvalidRevision(head));
        }

        match step.direction {
            Direction::Upgrade => {
                if revision_gt(&revision, &head) {
                    return Ok(Some(self.replace(head, revision)));
                }
                Ok(None)
            }
            Direction::Downgrade => match down_revision(&revision)? {
                None => {
                    debug!(from = %head, "head update to None");
                    self.heads.retain(|h| *h != head);
                    Ok(Some(HeadChange::Delete(head)))
                }
                Some(down) if revision_gt(&head, &down) => Ok(Some(self.replace(head, down))),
                Some(_) => Ok(None),
            },
        }
    }

    fn replace(&mut self, from: String, to: String) -> HeadChange {
        debug!(%from, %to, "head update");
        for head in &mut self.heads {
            if *head == from {
                head.clone_from(&to);
            }
        }
        HeadChange::Update { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(revision: &str, direction: Direction) -> MigrationStep {
        MigrationStep {
            revision: revision.to_string(),
            message: String::new(),
            direction,
            sql: String::new(),
            date: None,
        }
    }

    fn no_lookup(_: &str) -> Result<Option<String>> {
        panic!("down revision lookup not expected")
    }

    #[test]
    fn test_empty_head_takes_step_revision() {
        let mut heads = HeadMaintainer::default();
        let change = heads
            .update_to_step(&step("20240101000000", Direction::Upgrade), false, no_lookup)
            .unwrap();

        assert_eq!(change, Some(HeadChange::Insert("20240101000000".to_string())));
        assert_eq!(heads.heads(), ["20240101000000"]);
    }

    #[test]
    fn test_upgrade_advances_only_forward() {
        let mut heads = HeadMaintainer::new(vec!["20240102000000".to_string()]);

        let older = heads
            .update_to_step(&step("20240101000000", Direction::Upgrade), false, no_lookup)
            .unwrap();
        assert_eq!(older, None);
        assert_eq!(heads.heads(), ["20240102000000"]);

        let newer = heads
            .update_to_step(&step("20240103000000", Direction::Upgrade), false, no_lookup)
            .unwrap();
        assert_eq!(
            newer,
            Some(HeadChange::Update {
                from: "20240102000000".to_string(),
                to: "20240103000000".to_string(),
            })
        );
        assert_eq!(heads.heads(), ["20240103000000"]);
    }

    #[test]
    fn test_downgrade_moves_to_down_revision() {
        let mut heads = HeadMaintainer::new(vec!["20240102000000".to_string()]);
        let change = heads
            .update_to_step(&step("20240102000000", Direction::Downgrade), false, |rev| {
                assert_eq!(rev, "20240102000000");
                Ok(Some("20240101000000".to_string()))
            })
            .unwrap();

        assert!(matches!(change, Some(HeadChange::Update { .. })));
        assert_eq!(heads.heads(), ["20240101000000"]);
    }

    #[test]
    fn test_downgrade_without_down_revision_clears_head() {
        let mut heads = HeadMaintainer::new(vec!["20240101000000".to_string()]);
        let change = heads
            .update_to_step(&step("20240101000000", Direction::Downgrade), false, |_| Ok(None))
            .unwrap();

        assert_eq!(change, Some(HeadChange::Delete("20240101000000".to_string())));
        assert!(heads.heads().is_empty());
    }

    #[test]
    fn test_downgrade_keeps_head_when_down_revision_is_not_older() {
        let mut heads = HeadMaintainer::new(vec!["20240101000000".to_string()]);
        let change = heads
            .update_to_step(&step("20240105000000", Direction::Downgrade), false, |_| {
                Ok(Some("20240103000000".to_string()))
            })
            .unwrap();

        assert_eq!(change, None);
        assert_eq!(heads.heads(), ["20240101000000"]);
    }

    #[test]
    fn test_legacy_head_is_fatal_outside_sync() {
        let mut heads = HeadMaintainer::new(vec!["abc123".to_string()]);
        let result =
            heads.update_to_step(&step("20240101000000", Direction::Upgrade), false, no_lookup);

        assert!(matches!(result, Err(Error::InvalidRevision(head)) if head == "abc123"));
    }

    #[test]
    fn test_legacy_head_is_replaced_in_sync() {
        let mut heads = HeadMaintainer::new(vec!["abc123".to_string()]);
        let change = heads
            .update_to_step(&step("def456", Direction::Upgrade), true, no_lookup)
            .unwrap();

        assert_eq!(
            change,
            Some(HeadChange::Update {
                from: "abc123".to_string(),
                to: "def456".to_string(),
            })
        );
        assert_eq!(heads.heads(), ["def456"]);
    }

    #[test]
    fn test_version_table_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        let table = VersionTable::default();

        assert!(table.heads(&conn).unwrap().is_empty());

        table.ensure(&conn, false).unwrap();
        table
            .apply(&conn, &HeadChange::Insert("20240101000000".to_string()))
            .unwrap();
        table
            .apply(
                &conn,
                &HeadChange::Update {
                    from: "20240101000000".to_string(),
                    to: "20240102000000".to_string(),
                },
            )
            .unwrap();
        assert_eq!(table.heads(&conn).unwrap(), vec!["20240102000000"]);

        table
            .apply(&conn, &HeadChange::Delete("20240102000000".to_string()))
            .unwrap();
        assert!(table.heads(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_render_update() {
        let table = VersionTable::default();
        assert_eq!(
            table.render(&HeadChange::Update {
                from: "a".to_string(),
                to: "b".to_string(),
            }),
            "UPDATE \"schema_version\" SET version_num = 'b' WHERE version_num = 'a';"
        );
    }
}
