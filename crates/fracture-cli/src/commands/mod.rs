//! CLI command implementations.

pub mod drop;
pub mod init;
pub mod inspect;
pub mod migration;
pub mod revision;
pub mod version;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fracture_config::{ConfigLoader, FractureConfig};
use fracture_migration::{MigrationConfig, Migrator};

/// Loads the layered configuration, from `config_file` when given.
///
/// Also returns the project directory relative paths were resolved against.
pub fn load_config(config_file: Option<&Path>) -> Result<(FractureConfig, PathBuf)> {
    let loader = match config_file {
        Some(file) => ConfigLoader::new().with_config_file(file),
        None => ConfigLoader::new(),
    };
    let project_dir = loader.project_dir().to_path_buf();

    let config = loader.load().context("Failed to load configuration")?;
    Ok((config, project_dir))
}

/// Engine settings for a loaded configuration.
pub fn migration_config(config: &FractureConfig) -> MigrationConfig {
    MigrationConfig {
        directory: config.migrations.directory.clone(),
        database: config.database.path.clone(),
        schema_file: config.migrations.schema_file.clone(),
        ledger_table: config.migrations.ledger_table.clone(),
        version_table: config.migrations.version_table.clone(),
        max_lookback_days: config.migrations.max_lookback_days,
    }
}

/// Builds a migrator from the layered configuration.
pub fn migrator(config_file: Option<&Path>) -> Result<Migrator> {
    let (config, _) = load_config(config_file)?;
    Ok(Migrator::new(migration_config(&config)))
}
