//! Upgrade and downgrade commands.

use std::path::Path;

use anyhow::{Context, Result};
use fracture_migration::{DowngradeOptions, RunReport, UpgradeOptions};

use super::migrator;
use crate::style::{
    colors::SemanticStyle, create_spinner, finish_error, finish_success, print_labeled,
    print_spacer, print_success,
};

/// Apply missing revisions.
pub fn upgrade(config_file: Option<&Path>, options: UpgradeOptions) -> Result<()> {
    let migrator = migrator(config_file)?;

    if options.sql {
        let report = migrator
            .upgrade(&options)
            .context("Failed to render upgrade")?;
        print!("{}", report.sql.unwrap_or_default());
        return Ok(());
    }

    let sp = create_spinner(&format!("Upgrading to {}...", options.revision));
    match migrator.upgrade(&options) {
        Ok(report) => {
            finish_success(&sp, "Upgrade finished");
            summarize(&report, "Already up to date");
            Ok(())
        }
        Err(e) => {
            finish_error(&sp, "Upgrade failed");
            Err(e).context("Failed to upgrade")
        }
    }
}

/// Revert applied revisions.
pub fn downgrade(config_file: Option<&Path>, options: DowngradeOptions) -> Result<()> {
    let migrator = migrator(config_file)?;

    if options.sql {
        let report = migrator
            .downgrade(&options)
            .context("Failed to render downgrade")?;
        print!("{}", report.sql.unwrap_or_default());
        return Ok(());
    }

    let sp = create_spinner(&format!("Downgrading to {}...", options.revision));
    match migrator.downgrade(&options) {
        Ok(report) => {
            finish_success(&sp, "Downgrade finished");
            summarize(&report, "Nothing to downgrade");
            Ok(())
        }
        Err(e) => {
            finish_error(&sp, "Downgrade failed");
            Err(e).context("Failed to downgrade")
        }
    }
}

fn summarize(report: &RunReport, nothing: &str) {
    if report.applied.is_empty() {
        print_success(nothing);
    } else {
        print_spacer();
        for step in &report.applied {
            println!("  {}", step.to_string().code());
        }
        print_spacer();
        print_success(&format!("Ran {} revision(s)", report.applied.len()));
    }

    let head = if report.heads.is_empty() {
        "None".muted()
    } else {
        report.heads.join(", ").code()
    };
    print_labeled("Head", &head);
}
