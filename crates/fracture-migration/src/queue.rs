//! The queue of revisions present on disk but not in the ledger.

use rusqlite::Connection;
use tracing::debug;

use crate::ledger::Ledger;
use crate::revision::RevisionId;
use crate::script::{Script, ScriptDirectory};

/// A missing revision: the script and its parsed id.
#[derive(Debug, Clone, Copy)]
pub struct MissingRevision<'a> {
    pub id: RevisionId,
    pub script: &'a Script,
}

/// Timestamp scripts that have not been applied, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MissingQueue<'a> {
    entries: Vec<MissingRevision<'a>>,
}

impl<'a> MissingQueue<'a> {
    /// Scans `scripts` against the ledger.
    ///
    /// A ledger lookup that fails (for instance because the table does not
    /// exist yet) counts as "not applied".
    pub fn build(scripts: &'a ScriptDirectory, ledger: &Ledger, conn: &Connection) -> Self {
        Self::from_scripts(scripts.scripts(), |version| {
            match ledger.find(conn, version) {
                Ok(row) => row.is_some_and(|r| r.migrated.is_some()),
                Err(e) => {
                    debug!(version, error = %e, "ledger lookup failed, treating as missing");
                    false
                }
            }
        })
    }

    /// Builds the queue with a custom "already applied" predicate.
    pub fn from_scripts<F>(scripts: &'a [Script], mut applied: F) -> Self
    where
        F: FnMut(i64) -> bool,
    {
        let mut entries = Vec::new();

        for script in scripts {
            let Some(id) = script.revision_id() else {
                debug!(revision = %script.revision, "skipping non timestamp revision");
                continue;
            };

            if applied(id.as_i64()) {
                continue;
            }

            debug!(revision = %script.revision, "revision missing from ledger");
            entries.push(MissingRevision { id, script });
        }

        entries.sort_by_key(|entry| entry.id);
        Self { entries }
    }

    pub fn entries(&self) -> &[MissingRevision<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MissingRevision<'a>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerChange, LedgerEntry};
    use proptest::prelude::*;
    use std::path::Path;

    fn script(revision: &str) -> Script {
        Script::parse(
            &format!("-- Revision: {revision}\nSELECT 1;"),
            Path::new(&format!("{revision}.sql")),
        )
        .unwrap()
    }

    fn revisions(queue: &MissingQueue<'_>) -> Vec<String> {
        queue.iter().map(|e| e.script.revision.clone()).collect()
    }

    #[test]
    fn test_skips_legacy_and_sorts() {
        let scripts = vec![
            script("20240103000000"),
            script("abc123"),
            script("20240101000000"),
            script("0002"),
        ];

        let queue = MissingQueue::from_scripts(&scripts, |_| false);
        assert_eq!(revisions(&queue), vec!["20240101000000", "20240103000000"]);
    }

    #[test]
    fn test_build_without_ledger_table_lists_everything() {
        let conn = Connection::open_in_memory().unwrap();
        let dir = ScriptDirectory::from_scripts(
            "versions",
            vec![script("20240102000000"), script("20240101000000")],
        )
        .unwrap();

        let queue = MissingQueue::build(&dir, &Ledger::default(), &conn);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_build_excludes_applied() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        ledger.ensure(&conn, false).unwrap();
        ledger
            .apply(
                &conn,
                &LedgerChange::Insert(LedgerEntry::now(20_240_101_000_000, "a", 0.1)),
            )
            .unwrap();

        let dir = ScriptDirectory::from_scripts(
            "versions",
            vec![script("20240101000000"), script("20240102000000")],
        )
        .unwrap();

        let queue = MissingQueue::build(&dir, &ledger, &conn);
        assert_eq!(revisions(&queue), vec!["20240102000000"]);
    }

    #[test]
    fn test_row_without_migrated_time_is_missing() {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::default();
        ledger.ensure(&conn, false).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version_num, name) VALUES (20240101000000, 'a')",
            [],
        )
        .unwrap();

        let dir =
            ScriptDirectory::from_scripts("versions", vec![script("20240101000000")]).unwrap();

        let queue = MissingQueue::build(&dir, &ledger, &conn);
        assert_eq!(queue.len(), 1);
    }

    fn timestamp() -> impl Strategy<Value = String> {
        (2000u32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60, 0u32..60).prop_map(
            |(y, mo, d, h, mi, s)| format!("{y:04}{mo:02}{d:02}{h:02}{mi:02}{s:02}"),
        )
    }

    proptest! {
        #[test]
        fn queue_is_sorted_for_any_discovery_order(
            revs in prop::collection::hash_set(timestamp(), 0..20),
            legacy in prop::collection::vec("[a-f]{6}", 0..5),
        ) {
            let mut scripts: Vec<Script> = revs.iter().map(|r| script(r)).collect();
            scripts.extend(legacy.iter().map(|r| script(r)));

            let queue = MissingQueue::from_scripts(&scripts, |_| false);
            let ids: Vec<i64> = queue.iter().map(|e| e.id.as_i64()).collect();

            prop_assert_eq!(ids.len(), revs.len());
            prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(queue.iter().all(|e| e.script.is_timestamp()));
        }
    }
}
