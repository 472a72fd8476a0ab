//! Revision scripts and the directory that holds them.
//!
//! A revision script is a `.sql` file under `<migrations>/versions/`:
//!
//! ```sql
//! -- Revision: 20240810131949
//! -- Message: add users table
//! -- Created: 2024-08-10 13:19:49
//!
//! -- Up Migration
//! CREATE TABLE users (id INTEGER PRIMARY KEY);
//!
//! -- Down Migration
//! DROP TABLE users;
//! ```
//!
//! Legacy scripts additionally carry `-- Down-Revision: <id>`, which links
//! them into the old single chain. Timestamp scripts never depend on each
//! other.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::revision::{self, RevisionId};
use crate::{Error, Result};

/// Layout of the `Created` header.
pub const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Marker line separating upgrade from downgrade SQL.
pub const DOWN_MARKER: &str = "-- Down Migration";

const UP_MARKER: &str = "-- Up Migration";

/// File name of the revision template inside the migrations directory.
pub const TEMPLATE_FILE: &str = "script.sql.tmpl";

const SLUG_LENGTH: usize = 40;

/// Built-in revision template. `${...}` placeholders are substituted on
/// `revision`.
pub const DEFAULT_TEMPLATE: &str = "-- Revision: ${revision}
-- Message: ${message}
-- Created: ${created}

-- Up Migration
${upgrade}

-- Down Migration
${downgrade}
";

/// A single revision script.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// Revision id, timestamp-shaped or legacy.
    pub revision: String,

    /// Parent in the legacy chain. Ignored for timestamp revisions.
    pub down_revision: Option<String>,

    /// Human-readable description.
    pub message: String,

    /// `Created` header, if present.
    pub created: Option<NaiveDateTime>,

    /// SQL run on upgrade.
    pub upgrade_sql: String,

    /// SQL run on downgrade.
    pub downgrade_sql: Option<String>,

    /// File the script was read from.
    pub path: PathBuf,
}

impl Script {
    /// Reads and parses a script file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// Parses script content. `path` supplies fallbacks for the revision id
    /// and message.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut revision: Option<String> = None;
        let mut down_revision: Option<String> = None;
        let mut message: Option<String> = None;
        let mut created: Option<NaiveDateTime> = None;
        let mut up_lines = Vec::new();
        let mut down_lines = Vec::new();
        let mut in_header = true;
        let mut in_down = false;

        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.starts_with(DOWN_MARKER) {
                in_header = false;
                in_down = true;
                continue;
            }
            if trimmed.starts_with(UP_MARKER) {
                continue;
            }

            if in_header {
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(comment) = trimmed.strip_prefix("--") {
                    let comment = comment.trim();
                    if let Some(rest) = comment.strip_prefix("Revision:") {
                        revision = non_empty(rest);
                    } else if let Some(rest) = comment.strip_prefix("Down-Revision:") {
                        down_revision = non_empty(rest).filter(|r| r != "None");
                    } else if let Some(rest) = comment.strip_prefix("Message:") {
                        message = Some(rest.trim().to_string());
                    } else if let Some(rest) = comment.strip_prefix("Created:") {
                        created = NaiveDateTime::parse_from_str(rest.trim(), CREATED_FORMAT).ok();
                    }
                    continue;
                }
                in_header = false;
            }

            if in_down {
                down_lines.push(line);
            } else {
                up_lines.push(line);
            }
        }

        let stem = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::ParseError {
                path: path.to_path_buf(),
                reason: "Invalid filename".to_string(),
            })?;
        let (stem_revision, stem_slug) = match stem.split_once('_') {
            Some((rev, slug)) => (rev, slug),
            None => (stem, ""),
        };

        let revision = match revision {
            Some(rev) => rev,
            None if !stem_revision.is_empty() => stem_revision.to_string(),
            None => {
                return Err(Error::ParseError {
                    path: path.to_path_buf(),
                    reason: "Missing revision id".to_string(),
                });
            }
        };

        let message = message.unwrap_or_else(|| stem_slug.replace('_', " "));
        let downgrade_sql = Some(down_lines.join("\n").trim().to_string()).filter(|s| !s.is_empty());

        Ok(Self {
            revision,
            down_revision,
            message,
            created,
            upgrade_sql: up_lines.join("\n").trim().to_string(),
            downgrade_sql,
            path: path.to_path_buf(),
        })
    }

    /// Typed id, `None` for legacy scripts.
    pub fn revision_id(&self) -> Option<RevisionId> {
        RevisionId::parse(&self.revision)
    }

    /// Whether the script takes part in fractured tracking.
    pub fn is_timestamp(&self) -> bool {
        self.revision_id().is_some()
    }

    /// Integer value of the id, as written to the ledger.
    pub fn version_num(&self) -> Option<i64> {
        revision::version_num(&self.revision)
    }

    /// Creation date: the timestamp id itself, else the `Created` header.
    pub fn date(&self) -> Option<NaiveDateTime> {
        self.revision_id()
            .map(|rev| rev.datetime())
            .or(self.created)
    }
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

/// SQL bodies for a new revision.
#[derive(Debug, Clone, Default)]
pub struct ScriptBody {
    pub upgrade: Option<String>,
    pub downgrade: Option<String>,
}

/// All revision scripts of a migrations directory.
#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    dir: PathBuf,
    scripts: Vec<Script>,
}

impl ScriptDirectory {
    /// Loads every `.sql` file in `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut scripts = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("sql") {
                scripts.push(Script::load(&path)?);
            }
        }

        debug!(dir = %dir.display(), count = scripts.len(), "loaded revision scripts");

        Self::from_scripts(dir, scripts)
    }

    /// Builds a directory from already parsed scripts.
    pub fn from_scripts(dir: impl Into<PathBuf>, scripts: Vec<Script>) -> Result<Self> {
        let mut seen: HashMap<&str, &Path> = HashMap::new();
        for script in &scripts {
            if let Some(first) = seen.insert(script.revision.as_str(), script.path.as_path()) {
                return Err(Error::DuplicateRevision {
                    revision: script.revision.clone(),
                    first: first.to_path_buf(),
                    second: script.path.clone(),
                });
            }
        }

        Ok(Self {
            dir: dir.into(),
            scripts,
        })
    }

    /// Directory the scripts live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scripts in discovery order.
    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    /// Looks up a script by revision id.
    pub fn get(&self, revision: &str) -> Result<&Script> {
        self.scripts
            .iter()
            .find(|s| s.revision == revision)
            .ok_or_else(|| Error::RevisionNotFound(revision.to_string()))
    }

    /// Looks up a script by the integer stored in the ledger.
    pub fn by_version(&self, version: i64) -> Result<&Script> {
        self.scripts
            .iter()
            .find(|s| s.version_num() == Some(version))
            .ok_or_else(|| Error::RevisionNotFound(version.to_string()))
    }

    /// Walks the legacy chain from `from` (exclusive, `None` = base) to its
    /// tip. Timestamp scripts are not part of the chain.
    pub fn legacy_upgrade_path(&self, from: Option<&str>) -> Result<Vec<&Script>> {
        if let Some(rev) = from {
            self.get(rev)?;
        }

        let legacy: Vec<&Script> = self.scripts.iter().filter(|s| !s.is_timestamp()).collect();
        let mut path: Vec<&Script> = Vec::new();
        let mut current = from.map(str::to_string);

        loop {
            let children: Vec<&Script> = legacy
                .iter()
                .copied()
                .filter(|s| s.down_revision.as_deref() == current.as_deref())
                .collect();

            match children.as_slice() {
                [] => break,
                [next] => {
                    path.push(*next);
                    current = Some(next.revision.clone());
                }
                _ => {
                    return Err(Error::MultipleHeads(
                        children.iter().map(|s| s.revision.clone()).collect(),
                    ));
                }
            }

            if path.len() > legacy.len() {
                return Err(Error::InvalidRevision(format!(
                    "legacy chain loops through {}",
                    current.unwrap_or_default()
                )));
            }
        }

        Ok(path)
    }

    /// Writes a new revision script and returns it parsed.
    ///
    /// Uses `template` (see [`DEFAULT_TEMPLATE`]) for the file layout.
    pub fn create_revision(
        &self,
        revision: &str,
        message: &str,
        created: NaiveDateTime,
        body: &ScriptBody,
        template: &str,
    ) -> Result<Script> {
        if message.chars().any(char::is_control) {
            return Err(Error::InvalidName(message.to_string()));
        }

        if let Ok(existing) = self.get(revision) {
            return Err(Error::DuplicateRevision {
                revision: revision.to_string(),
                first: existing.path.clone(),
                second: self.dir.join(file_name(revision, message)),
            });
        }

        let content = template
            .replace("${revision}", revision)
            .replace("${message}", message)
            .replace("${created}", &created.format(CREATED_FORMAT).to_string())
            .replace(
                "${upgrade}",
                body.upgrade.as_deref().unwrap_or("-- Add upgrade SQL here"),
            )
            .replace(
                "${downgrade}",
                body.downgrade
                    .as_deref()
                    .unwrap_or("-- Add downgrade SQL here"),
            );

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file_name(revision, message));
        fs::write(&path, content)?;

        Script::load(&path)
    }
}

/// `<revision>_<slug>.sql`, slug truncated to a fixed length.
pub fn file_name(revision: &str, message: &str) -> String {
    let slug: String = message
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let slug: String = slug
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(SLUG_LENGTH)
        .collect();

    if slug.is_empty() {
        format!("{revision}.sql")
    } else {
        format!("{revision}_{slug}.sql")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_script_with_headers() {
        let content = "-- Revision: 20240810131949
-- Message: add users table
-- Created: 2024-08-10 13:19:49

-- Up Migration
CREATE TABLE users (id INTEGER PRIMARY KEY);

-- Down Migration
DROP TABLE users;
";
        let script = Script::parse(content, Path::new("20240810131949_add_users.sql")).unwrap();

        assert_eq!(script.revision, "20240810131949");
        assert_eq!(script.message, "add users table");
        assert_eq!(script.upgrade_sql, "CREATE TABLE users (id INTEGER PRIMARY KEY);");
        assert_eq!(script.downgrade_sql.as_deref(), Some("DROP TABLE users;"));
        assert!(script.is_timestamp());
        assert_eq!(script.down_revision, None);
    }

    #[test]
    fn test_parse_falls_back_to_filename() {
        let script = Script::parse(
            "CREATE TABLE t (id INTEGER);",
            Path::new("20240101000000_create_t.sql"),
        )
        .unwrap();

        assert_eq!(script.revision, "20240101000000");
        assert_eq!(script.message, "create t");
        assert_eq!(script.downgrade_sql, None);
    }

    #[test]
    fn test_parse_legacy_script() {
        let content = "-- Revision: def456
-- Down-Revision: abc123
-- Message: second legacy
-- Created: 2023-05-01 10:00:00
ALTER TABLE t ADD COLUMN name TEXT;
";
        let script = Script::parse(content, Path::new("def456_second_legacy.sql")).unwrap();

        assert_eq!(script.revision, "def456");
        assert_eq!(script.down_revision.as_deref(), Some("abc123"));
        assert!(!script.is_timestamp());
        assert_eq!(
            script.date().unwrap().format(CREATED_FORMAT).to_string(),
            "2023-05-01 10:00:00"
        );
    }

    #[test]
    fn test_down_revision_none_literal() {
        let script = Script::parse(
            "-- Revision: abc123\n-- Down-Revision: None\nSELECT 1;",
            Path::new("abc123.sql"),
        )
        .unwrap();

        assert_eq!(script.down_revision, None);
        assert_eq!(script.message, "");
    }

    #[test]
    fn test_load_directory_rejects_duplicates() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "20240101000000_a.sql", "SELECT 1;");
        write(
            temp.path(),
            "other.sql",
            "-- Revision: 20240101000000\nSELECT 2;",
        );

        let result = ScriptDirectory::load(temp.path());
        assert!(matches!(result, Err(Error::DuplicateRevision { .. })));
    }

    #[test]
    fn test_load_missing_directory() {
        let temp = TempDir::new().unwrap();
        let result = ScriptDirectory::load(temp.path().join("nope"));
        assert!(matches!(result, Err(Error::DirectoryNotFound(_))));
    }

    #[test]
    fn test_load_ignores_non_sql_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "20240101000000_a.sql", "SELECT 1;");
        write(temp.path(), "README.md", "docs");

        let dir = ScriptDirectory::load(temp.path()).unwrap();
        assert_eq!(dir.scripts().len(), 1);
    }

    #[test]
    fn test_by_version_matches_integer_value() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "0001_first.sql", "-- Revision: 0001\nSELECT 1;");

        let dir = ScriptDirectory::load(temp.path()).unwrap();
        assert_eq!(dir.by_version(1).unwrap().revision, "0001");
        assert!(matches!(dir.by_version(2), Err(Error::RevisionNotFound(_))));
    }

    #[test]
    fn test_legacy_upgrade_path() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.sql", "-- Revision: aaa111\nSELECT 1;");
        write(
            temp.path(),
            "b.sql",
            "-- Revision: bbb222\n-- Down-Revision: aaa111\nSELECT 2;",
        );
        write(
            temp.path(),
            "c.sql",
            "-- Revision: ccc333\n-- Down-Revision: bbb222\nSELECT 3;",
        );
        write(
            temp.path(),
            "20240101000000_new.sql",
            "-- Down-Revision: ccc333\nSELECT 4;",
        );

        let dir = ScriptDirectory::load(temp.path()).unwrap();

        let from_base: Vec<_> = dir
            .legacy_upgrade_path(None)
            .unwrap()
            .iter()
            .map(|s| s.revision.as_str())
            .collect();
        assert_eq!(from_base, vec!["aaa111", "bbb222", "ccc333"]);

        let from_middle: Vec<_> = dir
            .legacy_upgrade_path(Some("bbb222"))
            .unwrap()
            .iter()
            .map(|s| s.revision.as_str())
            .collect();
        assert_eq!(from_middle, vec!["ccc333"]);

        assert!(dir.legacy_upgrade_path(Some("ccc333")).unwrap().is_empty());
        assert!(matches!(
            dir.legacy_upgrade_path(Some("zzz999")),
            Err(Error::RevisionNotFound(_))
        ));
    }

    #[test]
    fn test_legacy_branch_is_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.sql", "-- Revision: aaa111\nSELECT 1;");
        write(
            temp.path(),
            "b.sql",
            "-- Revision: bbb222\n-- Down-Revision: aaa111\nSELECT 2;",
        );
        write(
            temp.path(),
            "c.sql",
            "-- Revision: ccc333\n-- Down-Revision: aaa111\nSELECT 3;",
        );

        let dir = ScriptDirectory::load(temp.path()).unwrap();
        assert!(matches!(
            dir.legacy_upgrade_path(None),
            Err(Error::MultipleHeads(_))
        ));
    }

    #[test]
    fn test_create_revision_round_trips_through_parser() {
        let temp = TempDir::new().unwrap();
        let dir = ScriptDirectory::load(temp.path()).unwrap();
        let created =
            NaiveDateTime::parse_from_str("2024-08-10 13:19:49", CREATED_FORMAT).unwrap();

        let script = dir
            .create_revision(
                "20240810131949",
                "Add users table",
                created,
                &ScriptBody {
                    upgrade: Some("CREATE TABLE users (id INTEGER);".to_string()),
                    downgrade: Some("DROP TABLE users;".to_string()),
                },
                DEFAULT_TEMPLATE,
            )
            .unwrap();

        assert_eq!(
            script.path.file_name().unwrap(),
            "20240810131949_add_users_table.sql"
        );
        assert_eq!(script.revision, "20240810131949");
        assert_eq!(script.message, "Add users table");
        assert_eq!(script.created, Some(created));
        assert_eq!(script.upgrade_sql, "CREATE TABLE users (id INTEGER);");
        assert_eq!(script.downgrade_sql.as_deref(), Some("DROP TABLE users;"));
    }

    #[test]
    fn test_create_revision_placeholder_bodies_are_empty() {
        let temp = TempDir::new().unwrap();
        let dir = ScriptDirectory::load(temp.path()).unwrap();
        let created = RevisionId::generate().datetime();

        let script = dir
            .create_revision(
                "20240101000000",
                "empty",
                created,
                &ScriptBody::default(),
                DEFAULT_TEMPLATE,
            )
            .unwrap();

        assert!(script.upgrade_sql.is_empty());
        assert_eq!(script.downgrade_sql.as_deref(), Some("-- Add downgrade SQL here"));
    }

    #[test]
    fn test_create_revision_rejects_control_characters() {
        let temp = TempDir::new().unwrap();
        let dir = ScriptDirectory::load(temp.path()).unwrap();

        let result = dir.create_revision(
            "20240101000000",
            "bad\nmessage",
            RevisionId::generate().datetime(),
            &ScriptBody::default(),
            DEFAULT_TEMPLATE,
        );
        assert!(matches!(result, Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_file_name_slug() {
        assert_eq!(
            file_name("20240101000000", "Add users, roles & grants!"),
            "20240101000000_add_users_roles_grants.sql"
        );
        assert_eq!(file_name("20240101000000", ""), "20240101000000.sql");
    }
}
