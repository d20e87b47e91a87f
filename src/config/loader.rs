//! Configuration Loader
//!
//! Environment-aware layered loading built on the `config` crate:
//!
//! 1. an optional base file (`pubsub.toml`, `.yaml` or `.json`)
//! 2. an optional environment override next to it (`pubsub.production.toml`)
//! 3. `PUBSUB__*` environment variables (`PUBSUB__CONSUMER_ID=orders`)
//!
//! Later layers win. The merged result is validated before it is returned.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::PubSubConfig;

const DEFAULT_ENV_PREFIX: &str = "PUBSUB";
const ENV_SEPARATOR: &str = "__";

/// Builder for loading [`PubSubConfig`]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: Option<String>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            environment: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Base configuration file; must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Explicit environment name instead of detecting it
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Prefix for environment variable overrides
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Detect the current environment from `PUBSUB_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("PUBSUB_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Load, merge and validate
    pub fn load(&self) -> ConfigResult<PubSubConfig> {
        let environment = self
            .environment
            .clone()
            .unwrap_or_else(Self::detect_environment);

        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!(
                path = %path.display(),
                environment = %environment,
                "Loading pubsub configuration file"
            );
            builder = builder.add_source(File::from(path.as_path()).required(true));

            if let Some(override_path) = Self::environment_override_path(path, &environment) {
                builder = builder.add_source(File::from(override_path.as_path()).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let merged = builder.build().map_err(|e| {
            let source_name = self
                .file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("{}{}*", self.env_prefix, ENV_SEPARATOR));
            ConfigurationError::load_error(source_name, e)
        })?;

        let config: PubSubConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::parse_error)?;

        config.validate()?;

        info!(
            environment = %environment,
            consumer_id = %config.consumer_id,
            timeout_in_sec = config.timeout_in_sec,
            lock_renewal_in_sec = config.lock_renewal_in_sec,
            "✅ PubSub configuration loaded"
        );

        Ok(config)
    }

    /// `dir/pubsub.toml` + `production` -> `dir/pubsub.production.toml`
    fn environment_override_path(base: &Path, environment: &str) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let extension = base.extension()?.to_str()?;
        Some(base.with_file_name(format!("{stem}.{environment}.{extension}")))
    }
}
