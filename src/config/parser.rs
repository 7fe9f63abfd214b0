//! Configuration parser for loading configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ApplyKitError, ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::ApplyKitConfig;

/// Environment variable overriding `cluster.server`.
pub const ENV_SERVER: &str = "APPLYKIT_SERVER";
/// Environment variable overriding `cluster.token`.
pub const ENV_TOKEN: &str = "APPLYKIT_TOKEN";
/// Environment variable overriding `cluster.namespace`.
pub const ENV_NAMESPACE: &str = "APPLYKIT_NAMESPACE";
/// Environment variable overriding `apply.tracker_name`.
pub const ENV_TRACKER: &str = "APPLYKIT_TRACKER";

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ApplyKitConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ApplyKitError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ApplyKitError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a value is out of range.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ApplyKitConfig> {
        debug!("Parsing YAML configuration");

        let config: ApplyKitConfig = if content.trim().is_empty() {
            ApplyKitConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                let location = source.map(|p| p.display().to_string());
                ApplyKitError::Config(ConfigError::ParseError {
                    message: format!("YAML parse error: {e}"),
                    location,
                })
            })?
        };

        config.validate()?;
        debug!("Configuration targets server {}", config.cluster.server);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// A missing file yields the defaults, so the environment alone can
    /// configure the tool.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed or the result
    /// is invalid.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<ApplyKitConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => ApplyKitConfig::default(),
        };

        Self::apply_env_overrides_with(&mut config, |key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_env_overrides_with<F>(config: &mut ApplyKitConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER) {
            debug!("Overriding cluster.server from environment");
            config.cluster.server = server;
        }

        if let Some(token) = lookup(ENV_TOKEN) {
            debug!("Overriding cluster.token from environment");
            config.cluster.token = Some(token);
        }

        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            debug!("Overriding cluster.namespace from environment");
            config.patcher.default_namespace.clone_from(&namespace);
            config.cluster.namespace = namespace;
        }

        if let Some(tracker) = lookup(ENV_TRACKER) {
            debug!("Overriding apply.tracker_name from environment");
            config.apply.tracker_name = tracker;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ApplyKitError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["applykit.yaml", "applykit.yml", ".applykit.yaml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ApplyKitError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

/// Returns the per-user configuration file, if it exists.
///
/// Lives at `<config dir>/applykit/config.yaml`, for example
/// `~/.config/applykit/config.yaml` on Linux.
#[must_use]
pub fn user_config_file() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("applykit").join("config.yaml");
    path.exists().then_some(path)
}
