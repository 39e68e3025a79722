//! Configuration Loader
//!
//! Layers built-in defaults, an optional configuration file and environment
//! overrides into a validated [`RunnerConfig`].

use super::error::{ConfigResult, ConfigurationError};
use super::RunnerConfig;
use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Prefix of environment overrides, e.g. `BASIN_RUNNER__ORCHESTRATION__MAX_PENDING_JOBS=4`
pub const ENV_PREFIX: &str = "BASIN_RUNNER";
pub const ENV_SEPARATOR: &str = "__";

pub struct ConfigManager {
    config: RunnerConfig,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration from defaults, `path` (when given) and the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_env(path, None)
    }

    /// Load configuration with an explicit set of environment variables.
    /// This is useful for testing without modifying global environment variables
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let defaults = Config::try_from(&RunnerConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config: RunnerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            cluster_name = %config.scheduler.cluster_name,
            max_pending_jobs = config.orchestration.max_pending_jobs,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            config_file: path.map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(config: RunnerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            config_file: None,
        }))
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }
}
