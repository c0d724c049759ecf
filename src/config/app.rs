//! Application configuration structures.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collection::CollectionSettings;
use crate::gateway::DestinationConfig;
use crate::scheduler::{Schedule, ScheduleConfig};
use crate::storage::InstrumentRecord;

use super::instruments::{InstrumentEntry, load_instruments_from_dir, validate_instruments};
use super::validation::{ConfigError, expand_env_vars};

// =============================================================================
// Constants
// =============================================================================

/// Default log filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/nrt.db?mode=rwc";

// =============================================================================
// Logging Configuration
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `nrt_collector=debug`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL or plain file path.
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Where files are delivered.
    pub destination: DestinationConfig,

    #[serde(default)]
    pub collection: CollectionSettings,

    /// Absent or empty means a single cycle per invocation.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Instruments inserted into the directory on startup if absent.
    #[serde(default)]
    pub instruments: Vec<InstrumentEntry>,

    /// Directory with additional instrument YAML files.
    #[serde(default)]
    pub instrument_path: Option<String>,
}

impl AppConfig {
    /// Minimal configuration delivering to a directory.
    pub fn new(destination: DestinationConfig) -> Self {
        Self {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            destination,
            collection: CollectionSettings::default(),
            schedule: ScheduleConfig::default(),
            instruments: Vec::new(),
            instrument_path: None,
        }
    }

    /// Load configuration from a YAML file, expanding `${VAR}` references.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration including the `instrument_path` directory.
    pub fn load_with_instrument_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;

        if let Some(ref dir) = config.instrument_path {
            let additional = load_instruments_from_dir(dir)?;
            config.instruments.extend(additional);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        tracing_subscriber::EnvFilter::try_new(&self.logging.level).map_err(|e| {
            ConfigError::ValidationError(format!(
                "invalid logging level '{}': {e}",
                self.logging.level
            ))
        })?;

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database url cannot be empty".to_string(),
            ));
        }

        self.destination
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("destination: {e}")))?;

        self.collection
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        self.schedule()?;

        validate_instruments(&self.instruments)
    }

    /// Resolved schedule, or `None` for run-once.
    pub fn schedule(&self) -> Result<Option<Schedule>, ConfigError> {
        self.schedule
            .to_schedule()
            .map_err(|e| ConfigError::ValidationError(format!("schedule: {e}")))
    }

    /// Convert declared instruments to records for directory sync.
    pub fn to_instrument_records(&self) -> Vec<InstrumentRecord> {
        self.instruments.iter().map(InstrumentEntry::to_record).collect()
    }
}
