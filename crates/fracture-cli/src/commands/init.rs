//! Initialize command - creates the migrations directory and fracture.toml.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fracture_config::{FractureConfig, Paths, PROJECT_CONFIG_FILE};
use fracture_migration::Migrator;

use super::{load_config, migration_config};
use crate::style::{
    colors::SemanticStyle, create_spinner, finish_success, print_code_example, print_hint,
    print_labeled, print_spacer,
};

pub fn run(config_file: Option<&Path>, directory: Option<PathBuf>) -> Result<()> {
    let (mut config, project_dir) = load_config(config_file)?;
    if let Some(dir) = &directory {
        config.migrations.directory = project_dir.join(dir);
    }

    print_spacer();
    println!("{}", "Initializing fracture project...".header());
    print_spacer();

    // Step 1: fracture.toml, unless one is already in place
    if config_file.is_none() && !Paths::is_initialized(&project_dir) {
        let sp = create_spinner("Writing configuration...");
        let mut project_config = FractureConfig::default();
        if let Some(dir) = directory {
            project_config.migrations.directory = dir;
        }
        let content = project_config
            .to_toml()
            .context("Failed to serialize configuration")?;
        fs::write(Paths::project_config_file(&project_dir), content)
            .with_context(|| format!("Failed to write {PROJECT_CONFIG_FILE}"))?;
        finish_success(&sp, &format!("Wrote {PROJECT_CONFIG_FILE}"));
    }

    // Step 2: migrations directory with its template
    let sp = create_spinner("Creating migrations directory...");
    let migrator = Migrator::new(migration_config(&config));
    let dir = migrator.init().with_context(|| {
        format!(
            "Failed to initialize {}",
            config.migrations.directory.display()
        )
    })?;
    finish_success(&sp, "Created migrations directory");

    print_spacer();
    print_labeled("Migrations", &dir.display().to_string().code());
    print_labeled("Database", &config.database.path.display().to_string().code());
    print_spacer();
    print_hint("Create your first revision with:");
    print_code_example("fracture revision -m \"create users table\"");

    Ok(())
}
