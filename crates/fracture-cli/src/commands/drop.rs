//! Drop command - removes every table and the migrations directory.

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::migrator;
use crate::style::{colors::SemanticStyle, print_labeled, print_success, print_warn};

pub fn run(config_file: Option<&Path>, yes: bool) -> Result<()> {
    let migrator = migrator(config_file)?;
    let config = migrator.config();

    print_warn(&format!(
        "This drops every table in {} and deletes {}",
        config.database.display().to_string().code(),
        config.directory.display().to_string().code()
    ));

    // Confirmation prompt unless --yes
    if !yes {
        print!("Are you sure? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let report = migrator.drop_all().context("Failed to drop database")?;

    print_success(&format!("Dropped {} table(s)", report.tables.len()));
    if !report.tables.is_empty() {
        print_labeled("Tables", &report.tables.join(", "));
    }
    if report.removed_directory {
        print_labeled("Removed", &config.directory.display().to_string());
    }
    Ok(())
}
