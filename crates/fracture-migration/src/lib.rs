//! Fractured SQL migrations for SQLite.
//!
//! Provides revision tracking where timestamp revisions are independent of
//! each other:
//! - Timestamp revision ids (`YYYYMMDDHHMMSS`) ordered by their integer value
//! - A ledger table recording every applied revision
//! - A head table for compatibility with single-chain history
//! - Lookback-limited upgrade planning and ledger-driven downgrades
//! - Sync of legacy chains before switching to fractured tracking

pub mod context;
pub mod error;
pub mod heads;
pub mod ledger;
pub mod planner;
pub mod queue;
pub mod revision;
pub mod schema;
pub mod script;
pub mod sync;

pub use context::{ContextOptions, ContextState, MigrationContext, RunReport};
pub use error::{Error, Result};
pub use heads::{HeadChange, HeadMaintainer, VersionTable};
pub use ledger::{Ledger, LedgerRow};
pub use planner::{Direction, MigrationStep};
pub use queue::MissingQueue;
pub use revision::{DowngradeTarget, RevisionId, RevisionRange, UpgradeTarget};
pub use schema::{OperationRow, SchemaDiff};
pub use script::{Script, ScriptDirectory};

use chrono::{NaiveDateTime, TimeDelta, Utc};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default lookback window of `upgrade` and `check`, in days.
pub const DEFAULT_MAX_LOOKBACK_DAYS: i64 = 30;

/// Configuration for the migration system.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Migrations directory (default: "migrations/"). Scripts live in its
    /// `versions/` subdirectory.
    pub directory: PathBuf,

    /// SQLite database file
    pub database: PathBuf,

    /// Schema file compared against the database by `migrate`
    pub schema_file: Option<PathBuf>,

    /// Ledger table name
    pub ledger_table: String,

    /// Head table name
    pub version_table: String,

    /// Default lookback window; negative disables it
    pub max_lookback_days: i64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            database: PathBuf::from("fracture.db"),
            schema_file: None,
            ledger_table: ledger::DEFAULT_LEDGER_TABLE.to_string(),
            version_table: heads::DEFAULT_VERSION_TABLE.to_string(),
            max_lookback_days: DEFAULT_MAX_LOOKBACK_DAYS,
        }
    }
}

impl MigrationConfig {
    /// Creates config with custom migrations directory and database.
    pub fn new(directory: impl Into<PathBuf>, database: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Returns path to the revision scripts.
    pub fn versions_dir(&self) -> PathBuf {
        self.directory.join("versions")
    }

    /// Returns path to the revision template.
    pub fn template_path(&self) -> PathBuf {
        self.directory.join(script::TEMPLATE_FILE)
    }
}

/// Arguments of [`Migrator::upgrade`].
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// `head`, a revision id, or `start:dest` with `sql`.
    pub revision: String,
    /// Overrides the configured lookback window.
    pub max_lookback_days: Option<i64>,
    pub sync: bool,
    pub sql: bool,
    pub purge: bool,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            revision: "head".to_string(),
            max_lookback_days: None,
            sync: false,
            sql: false,
            purge: false,
        }
    }
}

/// Arguments of [`Migrator::downgrade`].
#[derive(Debug, Clone)]
pub struct DowngradeOptions {
    /// `-N`, a revision id, `base`, or `start:dest` with `sql`.
    pub revision: String,
    pub sql: bool,
}

impl Default for DowngradeOptions {
    fn default() -> Self {
        Self {
            revision: "-1".to_string(),
            sql: false,
        }
    }
}

/// A pending revision reported by [`Migrator::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct CheckRow {
    pub revision: String,
    pub name: String,
    pub date: Option<NaiveDateTime>,
    pub age: String,
}

/// What [`Migrator::drop_all`] removed.
#[derive(Debug, Clone, Default)]
pub struct DropReport {
    pub tables: Vec<String>,
    pub removed_directory: bool,
}

/// Migration manager coordinates scripts, the database and bookkeeping.
pub struct Migrator {
    config: MigrationConfig,
}

impl Migrator {
    /// Creates a new migrator.
    pub fn new(config: MigrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn open(&self) -> Result<Connection> {
        Ok(Connection::open(&self.config.database)?)
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(&self.config.ledger_table)
    }

    fn versions(&self) -> VersionTable {
        VersionTable::new(&self.config.version_table)
    }

    /// Loads the revision scripts.
    pub fn scripts(&self) -> Result<ScriptDirectory> {
        ScriptDirectory::load(self.config.versions_dir())
    }

    /// Creates the migrations directory with its template.
    pub fn init(&self) -> Result<PathBuf> {
        let dir = &self.config.directory;
        if dir.is_dir() && fs::read_dir(dir)?.next().is_some() {
            return Err(Error::DirectoryNotEmpty(dir.clone()));
        }

        fs::create_dir_all(self.config.versions_dir())?;
        fs::write(self.config.template_path(), script::DEFAULT_TEMPLATE)?;

        info!(dir = %dir.display(), "initialized migrations directory");
        Ok(dir.clone())
    }

    fn template(&self) -> Result<String> {
        let path = self.config.template_path();
        if path.is_file() {
            Ok(fs::read_to_string(path)?)
        } else {
            Ok(script::DEFAULT_TEMPLATE.to_string())
        }
    }

    /// Writes an empty revision script.
    pub fn revision(&self, message: &str, rev_id: Option<&str>) -> Result<Script> {
        self.write_revision(message, rev_id, &script::ScriptBody::default())
    }

    fn write_revision(
        &self,
        message: &str,
        rev_id: Option<&str>,
        body: &script::ScriptBody,
    ) -> Result<Script> {
        let generated = RevisionId::generate();
        let revision = match rev_id.map(str::trim) {
            Some("") => return Err(Error::InvalidRevisionArgument(String::new())),
            Some(rev) => rev.to_string(),
            None => generated.to_string(),
        };

        let scripts = self.scripts()?;
        let script = scripts.create_revision(
            &revision,
            message,
            generated.datetime(),
            body,
            &self.template()?,
        )?;

        info!(revision = %script.revision, path = %script.path.display(), "generated revision");
        Ok(script)
    }

    /// Autogenerates a revision from the configured schema file.
    ///
    /// Returns `None` when the database already matches.
    pub fn migrate(&self, message: &str) -> Result<Option<Script>> {
        let schema_file = self
            .config
            .schema_file
            .as_deref()
            .ok_or_else(|| Error::Schema("no schema file configured".to_string()))?;
        let schema_sql = fs::read_to_string(schema_file)?;

        let declared = schema::declared_tables(&schema_sql)?;
        let conn = self.open()?;
        let existing = schema::database_tables(
            &conn,
            &[
                self.config.ledger_table.as_str(),
                self.config.version_table.as_str(),
            ],
        )?;

        let diff = SchemaDiff::compute(&declared, &existing);
        if diff.is_empty() {
            warn!("No changes in schema detected.");
            return Ok(None);
        }

        let body = script::ScriptBody {
            upgrade: Some(diff.upgrade_sql()),
            downgrade: Some(diff.downgrade_sql()),
        };
        self.write_revision(message, None, &body).map(Some)
    }

    /// Applies missing revisions.
    pub fn upgrade(&self, options: &UpgradeOptions) -> Result<RunReport> {
        let range = RevisionRange::parse(&options.revision, options.sql)?;
        let target: UpgradeTarget = range.destination.parse()?;
        let lookback = options
            .max_lookback_days
            .unwrap_or(self.config.max_lookback_days);
        let scripts = self.scripts()?;
        let ledger = self.ledger();

        let mut conn = self.open()?;
        let mut ctx = MigrationContext::new(
            &mut conn,
            self.ledger(),
            self.versions(),
            ContextOptions {
                is_sync: options.sync,
                purge: options.purge,
                as_sql: options.sql,
                starting_rev: range.start,
            },
        );
        ctx.configure()?;
        ctx.run_migrations(|heads, conn| {
            upgrade_steps(&scripts, &ledger, conn, heads, target, lookback, options.sync)
        })
    }

    /// Reverts applied revisions.
    pub fn downgrade(&self, options: &DowngradeOptions) -> Result<RunReport> {
        let range = RevisionRange::parse(&options.revision, options.sql)?;
        let target: DowngradeTarget = range.destination.parse()?;
        let scripts = self.scripts()?;
        let ledger = self.ledger();

        let mut conn = self.open()?;
        let mut ctx = MigrationContext::new(
            &mut conn,
            self.ledger(),
            self.versions(),
            ContextOptions {
                as_sql: options.sql,
                starting_rev: range.start,
                ..ContextOptions::default()
            },
        );
        ctx.configure()?;
        ctx.run_migrations(|_, conn| planner::plan_downgrade(&scripts, &ledger, conn, target))
    }

    /// Revisions an upgrade to `head` would apply, without applying them.
    pub fn check(&self, max_lookback_days: Option<i64>, sync: bool) -> Result<Vec<CheckRow>> {
        let lookback = max_lookback_days.unwrap_or(self.config.max_lookback_days);
        let scripts = self.scripts()?;
        let ledger = self.ledger();
        let conn = self.open()?;
        let heads = self.versions().heads(&conn)?;

        let steps = upgrade_steps(
            &scripts,
            &ledger,
            &conn,
            &heads,
            UpgradeTarget::Head,
            lookback,
            sync,
        )?;

        let now = Utc::now().naive_utc();
        Ok(steps
            .into_iter()
            .map(|step| CheckRow {
                age: step
                    .date
                    .map(|date| humanize_age(now - date))
                    .unwrap_or_default(),
                revision: step.revision,
                name: step.message,
                date: step.date,
            })
            .collect())
    }

    /// Statements of one revision's upgrade SQL.
    pub fn check_revision(&self, revision: &str) -> Result<Vec<OperationRow>> {
        let scripts = self.scripts()?;
        let script = scripts.get(revision)?;
        Ok(schema::describe_operations(&script.upgrade_sql))
    }

    /// Drops every table, including bookkeeping, and deletes the
    /// migrations directory.
    pub fn drop_all(&self) -> Result<DropReport> {
        let conn = self.open()?;
        let tables: Vec<String> = schema::database_tables(&conn, &[])?
            .into_iter()
            .map(|t| t.name)
            .collect();

        for table in &tables {
            info!(table = %table, "dropping table");
            conn.execute_batch(&format!(
                "DROP TABLE IF EXISTS {}",
                ledger::quote_ident(table)
            ))?;
        }
        self.versions().drop_table(&conn)?;
        self.ledger().drop_table(&conn)?;

        let removed_directory = remove_dir(&self.config.directory)?;
        Ok(DropReport {
            tables,
            removed_directory,
        })
    }

    /// Ledger rows, oldest first.
    pub fn history(&self) -> Result<Vec<LedgerRow>> {
        let conn = self.open()?;
        let ledger = self.ledger();
        if !ledger.exists(&conn)? {
            return Ok(Vec::new());
        }
        ledger.rows(&conn)
    }

    /// Current heads.
    pub fn heads(&self) -> Result<Vec<String>> {
        let conn = self.open()?;
        self.versions().heads(&conn)
    }
}

/// Upgrade plan, with the legacy sync steps first when syncing.
///
/// A sync plan ignores the heads for the timestamp part: the head still
/// points into the legacy chain at that point.
fn upgrade_steps(
    scripts: &ScriptDirectory,
    ledger: &Ledger,
    conn: &Connection,
    heads: &[String],
    target: UpgradeTarget,
    lookback: i64,
    sync: bool,
) -> Result<Vec<MigrationStep>> {
    let queue = MissingQueue::build(scripts, ledger, conn);
    if sync {
        let mut steps = sync::sync_steps(scripts, heads)?;
        steps.extend(planner::plan_upgrade(&queue, target, &[], lookback));
        Ok(steps)
    } else {
        Ok(planner::plan_upgrade(&queue, target, heads, lookback))
    }
}

fn remove_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir)?;
    info!(dir = %dir.display(), "removed migrations directory");
    Ok(true)
}

/// Age in its largest whole unit, e.g. `3 days`.
pub fn humanize_age(age: TimeDelta) -> String {
    let secs = age.num_seconds().max(0);
    let (value, unit) = if secs >= 86_400 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 {
        (secs / 3_600, "hour")
    } else if secs >= 60 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if value == 1 {
        format!("{value} {unit}")
    } else {
        format!("{value} {unit}s")
    }
}
