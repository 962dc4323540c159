use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_DATABASE_URL: &str = "sqlite://inventory_ledger.db?mode=rwc";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "LEDGER";
const DEFAULT_LOCATION_ID: i64 = 1;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;

/// Ledger configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Database connection URL
    pub database_url: String,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(custom = "validate_positive_u32")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Location that assembly and disassembly draw from and produce into
    #[serde(default = "default_location_id")]
    #[validate(custom = "validate_location_id")]
    pub production_location_id: i64,

    /// Location credited by purchase order receipts
    #[serde(default = "default_location_id")]
    #[validate(custom = "validate_location_id")]
    pub receiving_location_id: i64,

    /// Location credited when a cancelled order is restocked
    #[serde(default = "default_location_id")]
    #[validate(custom = "validate_location_id")]
    pub restock_location_id: i64,

    /// Deadline for a single mutating operation, lock waits included
    #[serde(default = "default_operation_timeout_ms")]
    #[validate(custom = "validate_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Page size used by history queries when the caller passes none
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Upper bound for history page sizes
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl LedgerConfig {
    /// Builds a configuration for the given database with every other field defaulted.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            production_location_id: default_location_id(),
            receiving_location_id: default_location_id(),
            restock_location_id: default_location_id(),
            operation_timeout_ms: default_operation_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Checks constraints spanning several fields.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            let mut err = ValidationError::new("default_page_size");
            err.message = Some("default_page_size must be between 1 and max_page_size".into());
            errors.add("default_page_size", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum LedgerConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_location_id() -> i64 {
    DEFAULT_LOCATION_ID
}

fn default_operation_timeout_ms() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_MS
}

fn default_page_size() -> u64 {
    50
}

fn default_max_page_size() -> u64 {
    500
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_positive_u32(value: u32) -> Result<(), ValidationError> {
    if value == 0 {
        let mut err = ValidationError::new("positive");
        err.message = Some("value must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_location_id(id: i64) -> Result<(), ValidationError> {
    if id <= 0 {
        let mut err = ValidationError::new("location_id");
        err.message = Some("location ids must be positive".into());
        return Err(err);
    }
    Ok(())
}

fn validate_operation_timeout(timeout_ms: u64) -> Result<(), ValidationError> {
    if timeout_ms == 0 {
        let mut err = ValidationError::new("operation_timeout_ms");
        err.message = Some("operation_timeout_ms must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("inventory_ledger={},ledger_cli={},sea_orm=warn", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads ledger configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (LEDGER__*)
pub fn load_config() -> Result<LedgerConfig, LedgerConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", DEFAULT_DATABASE_URL)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let ledger_config: LedgerConfig = config.try_deserialize()?;

    ledger_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        LedgerConfigError::Validation(e)
    })?;

    ledger_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        LedgerConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(ledger_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = LedgerConfig::for_database("sqlite::memory:");
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.operation_timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = LedgerConfig::for_database("sqlite::memory:");
        cfg.log_level = "verbose".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("log_level"));
    }

    #[test]
    fn rejects_non_positive_locations_and_zero_timeout() {
        let mut cfg = LedgerConfig::for_database("sqlite::memory:");
        cfg.production_location_id = 0;
        cfg.operation_timeout_ms = 0;
        let errors = cfg.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("production_location_id"));
        assert!(fields.contains_key("operation_timeout_ms"));
    }

    #[test]
    fn page_size_must_fit_under_maximum() {
        let mut cfg = LedgerConfig::for_database("sqlite::memory:");
        cfg.default_page_size = 1_000;
        cfg.max_page_size = 100;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("default_page_size"));
    }

    #[test]
    fn min_connections_cannot_exceed_max() {
        let mut cfg = LedgerConfig::for_database("sqlite::memory:");
        cfg.db_min_connections = 4;
        cfg.db_max_connections = 2;
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
