//! Step execution with head and ledger bookkeeping.
//!
//! [`MigrationContext`] owns one connection for the duration of a command.
//! Every step runs in its own transaction together with its head movement
//! and ledger write, so a failed step leaves earlier steps committed.

use rusqlite::Connection;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::heads::{HeadMaintainer, VersionTable};
use crate::ledger::{Ledger, LedgerChange, LedgerEntry};
use crate::planner::{Direction, MigrationStep};
use crate::{Error, Result};

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    Configuring,
    Running,
}

/// How a context runs its steps.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Legacy heads may be replaced and non-integer ids skip the ledger.
    pub is_sync: bool,
    /// Clear the head table and ledger before running.
    pub purge: bool,
    /// Render SQL instead of executing it.
    pub as_sql: bool,
    /// Head to assume in offline mode, from a `start:dest` argument.
    pub starting_rev: Option<String>,
}

/// Outcome of [`MigrationContext::run_migrations`].
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Steps that were committed (or rendered), in order.
    pub applied: Vec<MigrationStep>,
    /// Heads after the last step.
    pub heads: Vec<String>,
    /// Rendered script in offline mode.
    pub sql: Option<String>,
}

pub struct MigrationContext<'c> {
    conn: &'c mut Connection,
    ledger: Ledger,
    versions: VersionTable,
    options: ContextOptions,
    state: ContextState,
    buffer: String,
}

impl<'c> MigrationContext<'c> {
    pub fn new(
        conn: &'c mut Connection,
        ledger: Ledger,
        versions: VersionTable,
        options: ContextOptions,
    ) -> Self {
        Self {
            conn,
            ledger,
            versions,
            options,
            state: ContextState::Idle,
            buffer: String::new(),
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Prepares the bookkeeping tables.
    ///
    /// Online this creates the head table and ledger when missing and
    /// purges them on request. Offline the `CREATE` statements are rendered
    /// instead.
    pub fn configure(&mut self) -> Result<()> {
        if self.state != ContextState::Idle {
            return Err(Error::NotConfigured);
        }
        if self.options.purge && self.options.as_sql {
            return Err(Error::PurgeWithSql);
        }

        if self.options.as_sql {
            self.emit(&format!("{};", self.versions.create_sql()));
            self.emit(&format!("{};", self.ledger.create_sql()));
        } else {
            self.versions.ensure(&*self.conn, self.options.purge)?;
            self.ledger.ensure(&*self.conn, self.options.purge)?;
        }

        debug!(
            ledger = self.ledger.table(),
            versions = self.versions.table(),
            as_sql = self.options.as_sql,
            "migration context configured"
        );
        self.state = ContextState::Configuring;
        Ok(())
    }

    /// Heads the next run starts from.
    pub fn current_heads(&self) -> Result<Vec<String>> {
        if self.options.as_sql {
            if let Some(start) = &self.options.starting_rev {
                return Ok(vec![start.clone()]);
            }
        }
        self.versions.heads(&*self.conn)
    }

    /// Plans and executes a batch.
    ///
    /// `plan` receives the current heads and the connection and returns the
    /// steps to run.
    pub fn run_migrations<F>(&mut self, plan: F) -> Result<RunReport>
    where
        F: FnOnce(&[String], &Connection) -> Result<Vec<MigrationStep>>,
    {
        if self.state != ContextState::Configuring {
            return Err(Error::NotConfigured);
        }

        self.state = ContextState::Running;
        let result = self.run_inner(plan);
        self.state = ContextState::Idle;
        result
    }

    fn run_inner<F>(&mut self, plan: F) -> Result<RunReport>
    where
        F: FnOnce(&[String], &Connection) -> Result<Vec<MigrationStep>>,
    {
        let heads = self.current_heads()?;
        let steps = plan(&heads, &*self.conn)?;
        debug!(?heads, count = steps.len(), "running migration batch");

        let mut maintainer = HeadMaintainer::new(heads);
        let mut applied = Vec::with_capacity(steps.len());

        for step in steps {
            if self.options.as_sql {
                self.render_step(&step, &mut maintainer)?;
            } else {
                self.execute_step(&step, &mut maintainer)?;
            }
            applied.push(step);
        }

        let sql = self
            .options
            .as_sql
            .then(|| std::mem::take(&mut self.buffer));

        Ok(RunReport {
            applied,
            heads: maintainer.into_heads(),
            sql,
        })
    }

    fn execute_step(&mut self, step: &MigrationStep, heads: &mut HeadMaintainer) -> Result<()> {
        info!("Running {step}");
        let started = Instant::now();

        let tx = self.conn.transaction()?;
        if !step.sql.trim().is_empty() {
            tx.execute_batch(&step.sql)?;
        }

        let ledger = &self.ledger;
        let head_change = heads.update_to_step(step, self.options.is_sync, |rev| {
            ledger.down_revision(&tx, rev)
        })?;
        if let Some(change) = &head_change {
            self.versions.apply(&tx, change)?;
        }

        let duration = started.elapsed().as_secs_f64();
        if let Some(change) = ledger_change(step, duration, self.options.is_sync)? {
            self.ledger.apply(&tx, &change)?;
        }

        tx.commit()?;
        debug!(revision = %step.revision, duration, "step committed");
        Ok(())
    }

    fn render_step(&mut self, step: &MigrationStep, heads: &mut HeadMaintainer) -> Result<()> {
        info!("Rendering {step}");
        self.emit(&format!("\n-- Running {step}\n"));
        if !step.sql.trim().is_empty() {
            self.emit(step.sql.trim());
        }

        let ledger = &self.ledger;
        let conn = &*self.conn;
        let head_change = heads.update_to_step(step, self.options.is_sync, |rev| {
            Ok(ledger.down_revision(conn, rev).unwrap_or_else(|e| {
                debug!(revision = rev, error = %e, "down revision unavailable offline");
                None
            }))
        })?;
        if let Some(change) = &head_change {
            let sql = self.versions.render(change);
            self.emit(&sql);
        }

        if let Some(change) = ledger_change(step, 0.0, self.options.is_sync)? {
            let sql = self.ledger.render(&change);
            self.emit(&sql);
        }
        Ok(())
    }

    fn emit(&mut self, sql: &str) {
        self.buffer.push_str(sql);
        if !sql.ends_with('\n') {
            self.buffer.push('\n');
        }
    }
}

/// Ledger bookkeeping for a finished step.
///
/// A revision without an integer value cannot be recorded. That only
/// happens for legacy chains, so it is tolerated while syncing.
fn ledger_change(
    step: &MigrationStep,
    duration: f64,
    is_sync: bool,
) -> Result<Option<LedgerChange>> {
    let Some(version) = step.version_num() else {
        if is_sync {
            warn!(revision = %step.revision, "revision has no integer value, not recorded in ledger");
            return Ok(None);
        }
        return Err(Error::InvalidRevision(step.revision.clone()));
    };

    let change = match step.direction {
        Direction::Upgrade => {
            LedgerChange::Insert(LedgerEntry::now(version, &step.message, duration))
        }
        Direction::Downgrade => LedgerChange::Remove(version),
    };
    Ok(Some(change))
}
