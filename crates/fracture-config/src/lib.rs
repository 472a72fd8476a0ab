//! Configuration management for fracture
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the caller)
//! 2. Environment variables (`FRACTURE_*`, `__` between section and key)
//! 3. fracture.local.toml (local overrides)
//! 4. fracture.toml (project config)
//! 5. ~/.config/fracture/config.toml (user defaults)
//! 6. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{Paths, LOCAL_CONFIG_FILE, PROJECT_CONFIG_FILE};

/// Main fracture configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractureConfig {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fracture.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_file: Option<PathBuf>,
    /// Negative disables the lookback window
    pub max_lookback_days: i64,
    pub ledger_table: String,
    pub version_table: String,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            schema_file: None,
            max_lookback_days: 30,
            ledger_table: "schema_migrations".to_string(),
            version_table: "schema_version".to_string(),
        }
    }
}

impl FractureConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.database.path.is_relative() {
            self.database.path = base.join(&self.database.path);
        }

        if self.migrations.directory.is_relative() {
            self.migrations.directory = base.join(&self.migrations.directory);
        }

        if let Some(schema_file) = &mut self.migrations.schema_file {
            if schema_file.is_relative() {
                *schema_file = base.join(&*schema_file);
            }
        }
    }

    /// Checks values the loader cannot type-check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tables = [
            ("ledger_table", &self.migrations.ledger_table),
            ("version_table", &self.migrations.version_table),
        ];
        for (key, table) in tables {
            if table.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "migrations.{key} must not be empty"
                )));
            }
        }

        if self
            .migrations
            .ledger_table
            .eq_ignore_ascii_case(&self.migrations.version_table)
        {
            return Err(ConfigError::ValidationError(
                "migrations.ledger_table and migrations.version_table must differ".to_string(),
            ));
        }

        Ok(())
    }

    /// Project config file content for these settings.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FractureConfig::default();
        assert_eq!(config.database.path, PathBuf::from("fracture.db"));
        assert_eq!(config.migrations.max_lookback_days, 30);
        assert_eq!(config.migrations.ledger_table, "schema_migrations");
        assert_eq!(config.migrations.version_table, "schema_version");
        assert!(config.migrations.schema_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = FractureConfig::default();
        config.migrations.schema_file = Some(PathBuf::from("db/schema.sql"));
        config.resolve_paths("/home/user/project");

        assert_eq!(
            config.database.path,
            PathBuf::from("/home/user/project/fracture.db")
        );
        assert_eq!(
            config.migrations.directory,
            PathBuf::from("/home/user/project/migrations")
        );
        assert_eq!(
            config.migrations.schema_file,
            Some(PathBuf::from("/home/user/project/db/schema.sql"))
        );
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let mut config = FractureConfig::default();
        config.database.path = PathBuf::from("/var/lib/app.db");
        config.resolve_paths("/home/user/project");
        assert_eq!(config.database.path, PathBuf::from("/var/lib/app.db"));
    }

    #[test]
    fn test_validation() {
        let mut config = FractureConfig::default();
        config.migrations.version_table = "SCHEMA_MIGRATIONS".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.migrations.version_table = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = FractureConfig::default();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[migrations]"));
        assert!(!text.contains("schema_file"));

        let parsed: FractureConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
