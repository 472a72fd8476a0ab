//! Upgrade and downgrade planning.
//!
//! Planning never touches the script bodies beyond copying the SQL into the
//! resulting [`MigrationStep`]s. Upgrades are driven by the missing queue;
//! downgrades by the ledger.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::fmt;
use tracing::debug;

use crate::ledger::Ledger;
use crate::queue::MissingQueue;
use crate::revision::{DowngradeTarget, RevisionId, UpgradeTarget};
use crate::script::{Script, ScriptDirectory};
use crate::Result;

/// Lookback value that disables the cutoff.
pub const NO_LOOKBACK: i64 = -1;

/// Direction of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgrade => f.write_str("upgrade"),
            Self::Downgrade => f.write_str("downgrade"),
        }
    }
}

/// One unit of work for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStep {
    pub revision: String,
    pub message: String,
    pub direction: Direction,
    /// SQL to run; may be empty, in which case only bookkeeping happens.
    pub sql: String,
    pub date: Option<NaiveDateTime>,
}

impl MigrationStep {
    pub fn upgrade(script: &Script) -> Self {
        Self {
            revision: script.revision.clone(),
            message: script.message.clone(),
            direction: Direction::Upgrade,
            sql: script.upgrade_sql.clone(),
            date: script.date(),
        }
    }

    pub fn downgrade(script: &Script) -> Self {
        Self {
            revision: script.revision.clone(),
            message: script.message.clone(),
            direction: Direction::Downgrade,
            sql: script.downgrade_sql.clone().unwrap_or_default(),
            date: script.date(),
        }
    }

    pub fn is_upgrade(&self) -> bool {
        self.direction == Direction::Upgrade
    }

    /// Integer form of the revision, `None` for non-numeric legacy ids.
    pub fn version_num(&self) -> Option<i64> {
        crate::revision::version_num(&self.revision)
    }
}

impl fmt::Display for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Upgrade => "->",
            Direction::Downgrade => "<-",
        };
        write!(f, "{arrow} {}", self.revision)?;
        if !self.message.is_empty() {
            write!(f, ", {}", self.message)?;
        }
        Ok(())
    }
}

/// Oldest revision an upgrade may still apply.
///
/// `None` when lookback is disabled (negative), there is no head, or the
/// head is a legacy id.
pub fn oldest_allowed_revision(heads: &[String], max_lookback_days: i64) -> Option<RevisionId> {
    if max_lookback_days < 0 {
        return None;
    }

    let head = RevisionId::parse(heads.first()?)?;
    head.days_before(max_lookback_days)
}

/// Turns the missing queue into upgrade steps.
pub fn plan_upgrade(
    queue: &MissingQueue<'_>,
    target: UpgradeTarget,
    heads: &[String],
    max_lookback_days: i64,
) -> Vec<MigrationStep> {
    let oldest_allowed = oldest_allowed_revision(heads, max_lookback_days);
    debug!(%target, ?oldest_allowed, queued = queue.len(), "planning upgrade");

    queue
        .iter()
        .filter(|entry| match target {
            UpgradeTarget::Head => true,
            UpgradeTarget::Revision(dest) => {
                let keep = entry.id.as_i64() <= dest;
                if !keep {
                    debug!(revision = %entry.id, dest, "beyond destination, skipping");
                }
                keep
            }
        })
        .filter(|entry| match oldest_allowed {
            Some(oldest) if entry.id < oldest => {
                debug!(revision = %entry.id, %oldest, "older than lookback window, skipping");
                false
            }
            _ => true,
        })
        .map(|entry| MigrationStep::upgrade(entry.script))
        .collect()
}

/// Ledger versions a downgrade to `target` removes, newest first.
pub fn downgrade_versions(
    ledger: &Ledger,
    conn: &Connection,
    target: DowngradeTarget,
) -> Result<Vec<i64>> {
    match target {
        DowngradeTarget::Steps(n) => ledger.versions_desc(conn, Some(n)),
        DowngradeTarget::Revision(rev) => ledger.versions_above(conn, rev),
        DowngradeTarget::Base => ledger.versions_desc(conn, None),
    }
}

/// Resolves the versions of a downgrade back to their scripts.
pub fn plan_downgrade(
    scripts: &ScriptDirectory,
    ledger: &Ledger,
    conn: &Connection,
    target: DowngradeTarget,
) -> Result<Vec<MigrationStep>> {
    let versions = downgrade_versions(ledger, conn, target)?;
    debug!(%target, count = versions.len(), "planning downgrade");

    versions
        .into_iter()
        .map(|version| scripts.by_version(version).map(MigrationStep::downgrade))
        .collect()
}
