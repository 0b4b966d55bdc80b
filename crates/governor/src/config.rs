//! Daemon configuration

use anyhow::{Context, Result};
use governor_lib::GovernorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "GOVERNOR_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// API server port for health/status/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Interval between status log lines in seconds
    #[serde(default = "default_status_log_interval")]
    pub status_log_interval_secs: u64,

    /// Settings for the resource manager
    #[serde(default)]
    pub governor: GovernorConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_status_log_interval() -> u64 {
    30
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            status_log_interval_secs: default_status_log_interval(),
            governor: GovernorConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the optional config file and the environment
    ///
    /// Environment keys use the `GOVERNOR` prefix and `__` as separator,
    /// e.g. `GOVERNOR__GOVERNOR__MAX_THREADS=4`.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_with(path.as_deref(), environment())
    }

    pub(crate) fn load_with(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(env)
            .build()
            .context("failed to read governor configuration")?;

        config
            .try_deserialize()
            .context("invalid governor configuration")
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs.max(1))
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("GOVERNOR")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
