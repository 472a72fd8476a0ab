//! Catching a legacy database up with its single-chain history.
//!
//! A database still tracked by a legacy head can be brought to the tip of
//! the legacy chain before fractured tracking takes over. Once the head is a
//! timestamp revision there is nothing left to reconcile.

use tracing::{debug, info};

use crate::planner::MigrationStep;
use crate::revision::is_timestamp;
use crate::script::ScriptDirectory;
use crate::{Error, Result};

/// Legacy upgrade steps from the current head to the tip of the chain.
pub fn sync_steps(scripts: &ScriptDirectory, heads: &[String]) -> Result<Vec<MigrationStep>> {
    let head = heads.first().map(String::as_str);

    if let Some(head) = head {
        if is_timestamp(head) {
            return Err(Error::SyncNotAllowed(head.to_string()));
        }
    }

    let path = scripts.legacy_upgrade_path(head)?;
    let steps: Vec<MigrationStep> = path
        .into_iter()
        .filter(|script| !script.is_timestamp())
        .map(MigrationStep::upgrade)
        .collect();

    if steps.is_empty() {
        debug!(?head, "legacy chain already at tip");
    } else {
        info!(?head, count = steps.len(), "syncing legacy revisions");
    }

    Ok(steps)
}
