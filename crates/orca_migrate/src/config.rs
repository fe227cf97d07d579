use std::env;
use std::time::Duration;

use figment::{Figment, providers::{Env, Toml, Format}};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::Level;

use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Figment(#[from] figment::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("the [destination] section with a `project_id` is required for this command")]
    MissingDestination,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SourceConfig {
    /// Azure subscription to enumerate. Resolved from the logged in `az` account when not set.
    pub subscription_id: Option<String>,
    #[serde(default = "default_registry_suffix")]
    pub registry_suffix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            subscription_id: None,
            registry_suffix: default_registry_suffix(),
        }
    }
}

fn default_registry_suffix() -> String {
    "azurecr.io".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct DestinationConfig {
    pub project_id: String,
    /// Region used in the registry host, `<region>-docker.pkg.dev`.
    #[serde(default = "default_region")]
    pub region: String,
    /// Location repositories are created in, defaults to the region.
    pub location: Option<String>,
}

impl DestinationConfig {
    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or(&self.region)
    }
}

fn default_region() -> String {
    "us".to_string()
}

#[derive(Deserialize, Clone, Debug)]
pub struct MigrationConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Log the transfer tool into each source registry with its admin credentials.
    #[serde(default)]
    pub login_with_registry_credentials: bool,
    /// Exit with a nonzero status when any item failed.
    #[serde(default)]
    pub fail_on_item_errors: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            retry_limit: default_retry_limit(),
            retry_delay_secs: default_retry_delay_secs(),
            login_with_registry_credentials: false,
            fail_on_item_errors: false,
        }
    }
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

#[derive(Deserialize, Clone, Debug)]
pub struct SqliteDbConfig {
    pub path: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    Sqlite(SqliteDbConfig),
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Sqlite(SqliteDbConfig {
            path: "processed.db".to_string(),
        })
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct SnapshotConfig {
    #[serde(default = "default_source_file")]
    pub source_file: String,
    #[serde(default = "default_destination_file")]
    pub destination_file: String,
    #[serde(default = "default_difference_file")]
    pub difference_file: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            source_file: default_source_file(),
            destination_file: default_destination_file(),
            difference_file: default_difference_file(),
        }
    }
}

fn default_source_file() -> String {
    "source_all_images.txt".to_string()
}

fn default_destination_file() -> String {
    "destination_all_images.txt".to_string()
}

fn default_difference_file() -> String {
    "difference_images.txt".to_string()
}

/// Executables the providers shell out to.
#[derive(Deserialize, Clone, Debug)]
pub struct ToolsConfig {
    #[serde(default = "default_az")]
    pub az: String,
    #[serde(default = "default_gcloud")]
    pub gcloud: String,
    #[serde(default = "default_gcrane")]
    pub gcrane: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            az: default_az(),
            gcloud: default_gcloud(),
            gcrane: default_gcrane(),
        }
    }
}

fn default_az() -> String {
    "az".to_string()
}

fn default_gcloud() -> String {
    "gcloud".to_string()
}

fn default_gcrane() -> String {
    "gcrane".to_string()
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollPeriod {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogConfig {
    /// The minimum level of logging
    #[serde(deserialize_with = "deserialize_log_level", default = "default_log_level")]
    pub level: Level,
    /// The directory of the logging files
    #[serde(default = "default_log_path")]
    pub path: String,
    /// The format of the produced logs
    #[serde(default)]
    pub format: LogFormat,
    /// The roll period of the file
    #[serde(default)]
    pub roll_period: RollPeriod,
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: default_log_path(),
            format: LogFormat::default(),
            roll_period: RollPeriod::default(),
            env_filter: None,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    pub destination: Option<DestinationConfig>,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load the config from the toml file and `ORCA_MIGRATE_` environment variables.
    ///
    /// The file is `path` if given, otherwise `ORCA_MIGRATE_CONFIG` or `config.toml`.
    /// Environment variables take precedence over the file, nested keys are separated
    /// with `__`, e.g. `ORCA_MIGRATE_MIGRATION__RETRY_LIMIT=5`.
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_string(),
            None => match env::var("ORCA_MIGRATE_CONFIG") {
                Ok(path) => path,
                Err(_) => "config.toml".to_string(),
            }
        };

        // Merge the config files
        let figment = Figment::new()
            .join(Env::prefixed("ORCA_MIGRATE_").split("__"))
            .join(Toml::file(path));

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.migration.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("migration.max_concurrent_jobs must be at least 1".to_string()));
        }

        if self.migration.retry_limit == 0 {
            return Err(ConfigError::Invalid("migration.retry_limit must be at least 1".to_string()));
        }

        if let Some(dest) = &self.destination {
            if dest.project_id.trim().is_empty() {
                return Err(ConfigError::MissingDestination);
            }
        }

        Ok(())
    }

    pub fn destination(&self) -> Result<&DestinationConfig, ConfigError> {
        self.destination.as_ref().ok_or(ConfigError::MissingDestination)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.migration.retry_limit, Duration::from_secs(self.migration.retry_delay_secs))
    }

    pub fn sqlite(&self) -> &SqliteDbConfig {
        match &self.database {
            DatabaseConfig::Sqlite(sqlite) => sqlite,
        }
    }
}

fn default_log_level() -> Level {
    Level::INFO
}

fn default_log_path() -> String {
    "logs".to_string()
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where D: Deserializer<'de> {
    let s = String::deserialize(deserializer)?.to_lowercase();
    let s = s.as_str();

    match s {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(serde::de::Error::custom(format!("Unknown log level: '{}'", s))),
    }
}
