use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub database_url: String,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Run the bundled migrations on start-up.
    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated list of allowed origins; permissive in development.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// HS256 key for admin bearer tokens.
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Base URL customers return to after a hosted payment page.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Age after which unpaid orders are removed by the sweep.
    #[serde(default = "default_stale_order_days")]
    #[validate(range(min = 1, max = 365))]
    pub stale_order_days: u32,
    #[serde(default = "default_stale_sweep_interval_secs")]
    pub stale_sweep_interval_secs: u64,
    /// 0 disables the scheduled POS stock sync.
    #[serde(default = "default_stock_sync_interval_secs")]
    pub stock_sync_interval_secs: u64,

    /// Upper bound for any single POS, gateway or courier call.
    #[serde(default = "default_external_call_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub external_call_timeout_secs: u64,

    #[serde(default = "default_loyverse_base_url")]
    pub loyverse_base_url: String,
    #[serde(default)]
    pub loyverse_access_token: Option<String>,
    #[serde(default)]
    pub loyverse_store_id: Option<String>,
    #[serde(default)]
    pub loyverse_payment_type_id: Option<String>,

    #[serde(default = "default_toyyibpay_base_url")]
    pub toyyibpay_base_url: String,
    #[serde(default)]
    pub toyyibpay_secret_key: Option<String>,
    #[serde(default)]
    pub toyyibpay_category_code: Option<String>,

    #[serde(default = "default_billplz_base_url")]
    pub billplz_base_url: String,
    #[serde(default)]
    pub billplz_api_key: Option<String>,
    #[serde(default)]
    pub billplz_collection_id: Option<String>,
    /// Enables `x_signature` verification on Billplz callbacks.
    #[serde(default)]
    pub billplz_x_signature_key: Option<String>,

    /// Courier booking endpoint; booking is skipped when unset.
    #[serde(default)]
    pub shipment_booking_url: Option<String>,
    #[serde(default)]
    pub shipment_api_key: Option<String>,
}

impl AppConfig {
    /// Minimal configuration for tests and tooling.
    pub fn new(database_url: String, jwt_secret: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            jwt_secret,
            public_base_url: default_public_base_url(),
            stale_order_days: default_stale_order_days(),
            stale_sweep_interval_secs: default_stale_sweep_interval_secs(),
            stock_sync_interval_secs: 0,
            external_call_timeout_secs: default_external_call_timeout_secs(),
            loyverse_base_url: default_loyverse_base_url(),
            loyverse_access_token: None,
            loyverse_store_id: None,
            loyverse_payment_type_id: None,
            toyyibpay_base_url: default_toyyibpay_base_url(),
            toyyibpay_secret_key: None,
            toyyibpay_category_code: None,
            billplz_base_url: default_billplz_base_url(),
            billplz_api_key: None,
            billplz_collection_id: None,
            billplz_x_signature_key: None,
            shipment_booking_url: None,
            shipment_api_key: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    8
}

fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_stale_order_days() -> u32 {
    7
}

fn default_stale_sweep_interval_secs() -> u64 {
    3600
}

fn default_stock_sync_interval_secs() -> u64 {
    900
}

fn default_external_call_timeout_secs() -> u64 {
    10
}

fn default_loyverse_base_url() -> String {
    "https://api.loyverse.com/v1.0".to_string()
}

fn default_toyyibpay_base_url() -> String {
    "https://toyyibpay.com".to_string()
}

fn default_billplz_base_url() -> String {
    "https://www.billplz.com/api".to_string()
}

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

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["changeme", "your-secret-key", "default-secret-key"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter.
/// `RUST_LOG` takes precedence when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

fn base_builder() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)
}

/// Loads application configuration.
///
/// Sources, lowest precedence first: built-in defaults, `config/default.toml`,
/// `config/{RUN_ENV}.toml`, then `APP__*` environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = base_builder()?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    from_config(config)
}

/// Deserializes and validates an already-layered `Config`.
pub fn from_config(config: Config) -> Result<AppConfig, AppConfigError> {
    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "k9Vq2xLm7RtW4zPb8NcJ5hYd3FgS6uAe";

    fn builder() -> ConfigBuilder<config::builder::DefaultState> {
        base_builder().unwrap()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = from_config(
            builder()
                .set_override("jwt_secret", SECRET)
                .unwrap()
                .build()
                .unwrap(),
        )
        .unwrap();

        assert_eq!(cfg.database_url, "sqlite://storefront.db?mode=rwc");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.stale_order_days, 7);
        assert_eq!(cfg.stock_sync_interval_secs, 900);
        assert_eq!(cfg.external_call_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.loyverse_base_url, "https://api.loyverse.com/v1.0");
        assert!(cfg.loyverse_access_token.is_none());
    }

    #[test]
    fn missing_secret_is_rejected() {
        let result = from_config(builder().build().unwrap());
        assert!(matches!(result, Err(AppConfigError::Load(_))));
    }

    #[test]
    fn weak_secret_fails_validation() {
        let result = from_config(
            builder()
                .set_override("jwt_secret", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .unwrap()
                .build()
                .unwrap(),
        );
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }

    #[test]
    fn stale_order_days_must_be_positive() {
        let result = from_config(
            builder()
                .set_override("jwt_secret", SECRET)
                .unwrap()
                .set_override("stale_order_days", 0)
                .unwrap()
                .build()
                .unwrap(),
        );
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let mut cfg = AppConfig::new("sqlite::memory:".into(), SECRET.into());
        cfg.cors_allowed_origins = Some("https://shop.example, ,https://admin.example".into());
        assert_eq!(
            cfg.cors_origins(),
            vec!["https://shop.example", "https://admin.example"]
        );
    }
}
