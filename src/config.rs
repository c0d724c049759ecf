//! Configuration
//!
//! YAML configuration loading and validation:
//! - Logging filter and database location
//! - Upload destination (`directory` or `http`)
//! - Collection concurrency and timeouts
//! - Schedule (`interval` or `cron`; absent means run once)
//! - Instrument declarations, inline or from an include directory
//!
//! `${VAR}` and `${VAR:-default}` references are expanded before parsing.

mod app;
mod instruments;
mod validation;

pub use app::{AppConfig, DEFAULT_DATABASE_URL, DEFAULT_LOG_LEVEL, DatabaseConfig, LoggingConfig};
pub use instruments::{InstrumentEntry, load_instruments_from_dir, validate_instruments};
pub use validation::{ConfigError, expand_env_vars};
