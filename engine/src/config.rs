use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::MonitorSettings;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub workspace: WorkspaceConfig,
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
    pub rollup: RollupConfig,
    pub agents: AgentsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkspaceConfig {
    /// Root directory the agent/task tree lives under
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Optional database URL. If not provided, a per-user default is used
    pub url: Option<String>,
    /// Maximum number of database connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Seconds between maintenance ticks
    pub interval_secs: u64,
    /// Completed tasks older than this many days are archived
    pub archive_after_days: i64,
    /// Archived tasks completed longer ago than this are compacted
    pub compress_after_days: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RollupConfig {
    /// Bounded retry budget for optimistic rollup conflicts
    pub max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentsConfig {
    /// Seconds a cached agent profile stays fresh
    pub preference_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl EngineConfig {
    /// Load configuration from environment variables and config files
    pub fn from_env() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Start with default configuration
        builder = builder.add_source(File::from_str(
            include_str!("../config/default.toml"),
            FileFormat::Toml,
        ));

        // Add config file if specified
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(
                File::with_name(&config_file)
                    .required(false)
                    .format(FileFormat::Toml),
            );
        }

        // Add environment variable overrides with CADRE_ prefix
        builder = builder.add_source(
            Environment::with_prefix("CADRE")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut result: EngineConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Handle standard environment variables (DATABASE_URL, WORKSPACE_ROOT, LOG_LEVEL)
        Self::apply_standard_env_vars(&mut result);

        Ok(result)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("CADRE")
                    .separator("_")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")
    }

    /// Apply standard environment variables for common deployment patterns
    fn apply_standard_env_vars(config: &mut EngineConfig) {
        if let Ok(database_url) = env::var("DATABASE_URL") {
            config.database.url = Some(database_url);
        }

        if let Ok(root) = env::var("WORKSPACE_ROOT") {
            config.workspace.root = PathBuf::from(root);
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.logging.level = log_level;
        }
    }

    /// Get the database URL with a per-user default fallback
    pub fn database_url(&self) -> String {
        match &self.database.url {
            Some(url) => url.clone(),
            None => Self::default_database_url(),
        }
    }

    /// Default database URL; prefers XDG data dirs for containers
    pub fn default_database_url() -> String {
        if let Ok(xdg_data) = env::var("XDG_DATA_HOME") {
            return format!("sqlite://{xdg_data}/cadre/cadre.sqlite");
        }

        let home = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        format!("sqlite://{home}/cadre.sqlite")
    }

    /// Monitor settings in the form the monitor consumes
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.monitor.interval_secs),
            archive_after_days: self.monitor.archive_after_days,
            compress_after_days: self.monitor.compress_after_days,
        }
    }

    /// TTL for cached agent profiles
    pub fn preference_ttl(&self) -> Duration {
        Duration::from_secs(self.agents.preference_ttl_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ));
            }
        }

        let database_url = self.database_url();
        if !database_url.starts_with("sqlite://") && !database_url.starts_with(":memory:") {
            return Err(anyhow::anyhow!(
                "Only SQLite databases are supported. URL must start with 'sqlite://'. Got: {}",
                database_url
            ));
        }

        if self.workspace.root.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Workspace root cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!(
                "Database max_connections must be greater than 0"
            ));
        }

        if self.monitor.interval_secs == 0 {
            return Err(anyhow::anyhow!("Monitor interval must be greater than 0"));
        }

        if self.monitor.archive_after_days < 0 || self.monitor.compress_after_days < 0 {
            return Err(anyhow::anyhow!("Sweep thresholds cannot be negative"));
        }

        if self.rollup.max_attempts == 0 {
            return Err(anyhow::anyhow!("Rollup max_attempts must be greater than 0"));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig {
                root: PathBuf::from("./workspace"),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                connection_timeout: 30,
            },
            monitor: MonitorConfig {
                interval_secs: 300,
                archive_after_days: 7,
                compress_after_days: 90,
            },
            rollup: RollupConfig { max_attempts: 8 },
            agents: AgentsConfig {
                preference_ttl_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
