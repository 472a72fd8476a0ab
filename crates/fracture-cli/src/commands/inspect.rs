//! Read-only commands: check and history.

use std::path::Path;

use anyhow::{Context, Result};
use fracture_migration::script::CREATED_FORMAT;

use super::migrator;
use crate::style::{colors::SemanticStyle, print_data_table, print_success};

/// List the revisions an upgrade to head would apply.
pub fn check(config_file: Option<&Path>, max_lookback_days: Option<i64>, sync: bool) -> Result<()> {
    let migrator = migrator(config_file)?;
    let rows = migrator
        .check(max_lookback_days, sync)
        .context("Failed to check pending revisions")?;

    if rows.is_empty() {
        print_success("Database is up to date");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = rows
        .into_iter()
        .map(|row| {
            vec![
                row.revision,
                row.name,
                row.date
                    .map(|d| d.format(CREATED_FORMAT).to_string())
                    .unwrap_or_default(),
                row.age,
            ]
        })
        .collect();
    print_data_table(&["rev", "name", "date", "age"], &rows);
    Ok(())
}

/// List the operations of one revision.
pub fn check_revision(config_file: Option<&Path>, revision: &str) -> Result<()> {
    let migrator = migrator(config_file)?;
    let operations = migrator
        .check_revision(revision)
        .with_context(|| format!("Failed to inspect revision {revision}"))?;

    println!("Revision {}", revision.code());
    let rows: Vec<Vec<String>> = operations
        .into_iter()
        .map(|op| vec![op.operation, op.statement])
        .collect();
    print_data_table(&["operation", "statement"], &rows);
    Ok(())
}

/// Show the ledger.
pub fn history(config_file: Option<&Path>) -> Result<()> {
    let migrator = migrator(config_file)?;
    let rows = migrator.history().context("Failed to read history")?;

    if rows.is_empty() {
        println!("{}", "No revisions applied yet.".muted());
        return Ok(());
    }

    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            vec![
                row.id.to_string(),
                row.version_num.to_string(),
                row.name.clone(),
                format!("{:.3}s", row.duration),
                row.migrated_display(),
            ]
        })
        .collect();
    print_data_table(&["id", "version", "name", "duration", "migrated"], &rows);
    Ok(())
}
