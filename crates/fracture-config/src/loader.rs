//! Configuration loader with multi-source merging

use crate::{ConfigError, FractureConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    config_file: Option<PathBuf>,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            env_prefix: "FRACTURE".to_string(),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Use an explicit project config file. It must exist; its directory
    /// becomes the project directory.
    pub fn with_config_file(mut self, file: impl AsRef<Path>) -> Self {
        let file = file.as_ref();
        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.project_dir = parent.to_path_buf();
        }
        self.config_file = Some(file.to_path_buf());
        self
    }

    /// Set the environment variable prefix (default: "FRACTURE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/fracture/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Project directory relative paths resolve against.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<FractureConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = FractureConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/fracture/config.toml)
        if self.user_config {
            if let Ok(user_config_file) = Paths::new().user_config_file() {
                if user_config_file.exists() {
                    builder = builder.add_source(
                        config::File::from(user_config_file)
                            .required(false)
                            .format(config::FileFormat::Toml),
                    );
                }
            }
        }

        // 3. Project config (fracture.toml, or the explicit file)
        let project_config_file = match &self.config_file {
            Some(file) if !file.exists() => return Err(ConfigError::NotFound(file.clone()).into()),
            Some(file) => file.clone(),
            None => Paths::project_config_file(&self.project_dir),
        };
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (fracture.local.toml)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (FRACTURE_MIGRATIONS__MAX_LOOKBACK_DAYS=7)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut fracture_config: FractureConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        fracture_config.resolve_paths(&self.project_dir);
        fracture_config.validate()?;

        Ok(fracture_config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
