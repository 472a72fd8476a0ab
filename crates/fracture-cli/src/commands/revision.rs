//! Revision authoring commands.

use std::path::Path;

use anyhow::{Context, Result};
use fracture_migration::Script;

use super::migrator;
use crate::style::{colors::SemanticStyle, print_hint, print_labeled, print_success, print_warn};

/// Create an empty revision script.
pub fn create(config_file: Option<&Path>, message: &str, rev_id: Option<&str>) -> Result<()> {
    let migrator = migrator(config_file)?;
    let script = migrator
        .revision(message, rev_id)
        .with_context(|| format!("Failed to create revision '{message}'"))?;

    report(&script);
    print_hint("Edit the file to add your SQL, then run: fracture upgrade");
    Ok(())
}

/// Generate a revision from the schema file.
pub fn autogenerate(config_file: Option<&Path>, message: &str) -> Result<()> {
    let migrator = migrator(config_file)?;
    let Some(script) = migrator
        .migrate(message)
        .context("Failed to autogenerate revision")?
    else {
        print_warn("No changes in schema detected.");
        return Ok(());
    };

    report(&script);
    print_hint("Review the generated SQL before running: fracture upgrade");
    Ok(())
}

fn report(script: &Script) {
    print_success(&format!("Generated revision {}", script.revision.code()));
    print_labeled("File", &script.path.display().to_string().code());
    if !script.message.is_empty() {
        print_labeled("Message", &script.message);
    }
}
