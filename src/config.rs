/// Configuration Module
///
/// Loads the TOML configuration that selects the database, the batch defaults
/// and the log level, and turns it into connection options.
use crate::core::db::{ConnectionOptions, ConnectionTarget, ExecutionErrorPolicy, TransactionBehavior};
use crate::core::{DbError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings.
#[derive(Debug, Default, Deserialize)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: Option<String>,
    pub read_only: Option<bool>,
    pub busy_timeout_ms: Option<u64>,
    /// Pragmas applied on open, in addition to `foreign_keys = ON`.
    #[serde(default)]
    pub pragmas: BTreeMap<String, toml::Value>,
}

/// Batch behavior.
#[derive(Debug, Default, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub transaction_behavior: TransactionBehavior,
    #[serde(default)]
    pub on_execution_error: ExecutionErrorPolicy,
}

/// Logging settings.
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    /// The configured level as a `tracing` level.
    pub fn tracing_level(&self) -> Result<tracing::Level> {
        self.level
            .parse()
            .map_err(|_| DbError::Config(format!("unknown log level `{}`", self.level)))
    }
}

impl DatabaseConfig {
    /// Builds connection options, using `path_override` instead of the
    /// configured path when given.
    pub fn connection_options(&self, path_override: Option<&str>) -> Result<ConnectionOptions> {
        let path = path_override
            .or(self.path.as_deref())
            .ok_or_else(|| DbError::Config("no database path configured".to_string()))?;

        let mut options = ConnectionOptions::new(ConnectionTarget::parse(path))
            .read_only(self.read_only.unwrap_or(false));
        if let Some(ms) = self.busy_timeout_ms {
            options = options.busy_timeout(Duration::from_millis(ms));
        }
        for (name, value) in &self.pragmas {
            options = options.pragma(name.as_str(), pragma_value(name, value)?);
        }
        Ok(options)
    }
}

fn pragma_value(name: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Boolean(b) => Ok(if *b { "ON" } else { "OFF" }.to_string()),
        other => Err(DbError::Config(format!(
            "pragma `{}` has unsupported value {}",
            name, other
        ))),
    }
}

/// Where the configuration lives when no path is given.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlbatch").join("config.toml"))
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// use sqlbatch::config::load_config;
///
/// let config = load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Loads the file at the default location, or the defaults if there is none.
pub fn load_default_config() -> Result<Config> {
    match default_config_path() {
        Some(path) if path.exists() => load_config(path),
        _ => Ok(Config::default()),
    }
}
