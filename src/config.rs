use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SETTLEMENT_CURRENCY: &str = "USD";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Which payment gateway the engine talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// No provider: intents report paid immediately (free/trusted channels).
    Off,
    /// In-process pseudo gateway, no external calls.
    Mock,
    /// Card-network gateway.
    Stripe,
    /// Regional instant-payment gateway.
    Yookassa,
}

impl ProviderMode {
    pub fn is_gateway(self) -> bool {
        matches!(self, ProviderMode::Stripe | ProviderMode::Yookassa)
    }
}

/// Payment provider configuration. Constructed once at startup and passed
/// through `AppState`; business logic never reads the environment directly.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    /// Provider mode: "off", "mock", "stripe" or "yookassa"
    #[serde(default = "default_provider_mode")]
    pub provider_mode: ProviderMode,

    /// Settlement currency (ISO 4217)
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub currency: String,

    /// Stripe API secret key (required in stripe mode)
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Stripe webhook signing secret
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// YooKassa shop identifier (required in yookassa mode)
    #[serde(default)]
    pub yookassa_shop_id: Option<String>,

    /// YooKassa API secret key (required in yookassa mode)
    #[serde(default)]
    pub yookassa_secret_key: Option<String>,

    /// Shared token for the internal/manual webhook channel
    #[serde(default)]
    pub internal_webhook_token: Option<String>,

    /// URL the gateway redirects the customer back to after authorization
    #[serde(default)]
    pub return_url: Option<String>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            provider_mode: default_provider_mode(),
            currency: default_currency(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            yookassa_shop_id: None,
            yookassa_secret_key: None,
            internal_webhook_token: None,
            return_url: None,
        }
    }
}

impl PaymentsConfig {
    /// Credentials the selected gateway mode requires must be present.
    fn validate_credentials(&self, errors: &mut ValidationErrors) {
        match self.provider_mode {
            ProviderMode::Stripe => {
                if self
                    .stripe_secret_key
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
                {
                    let mut err = ValidationError::new("stripe_secret_key_missing");
                    err.message = Some(
                        "stripe mode requires APP__PAYMENTS__STRIPE_SECRET_KEY to be set".into(),
                    );
                    errors.add("payments", err);
                }
            }
            ProviderMode::Yookassa => {
                let shop = self
                    .yookassa_shop_id
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("");
                let key = self
                    .yookassa_secret_key
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("");
                if shop.is_empty() || key.is_empty() {
                    let mut err = ValidationError::new("yookassa_credentials_missing");
                    err.message = Some(
                        "yookassa mode requires APP__PAYMENTS__YOOKASSA_SHOP_ID and APP__PAYMENTS__YOOKASSA_SECRET_KEY".into(),
                    );
                    errors.add("payments", err);
                }
            }
            ProviderMode::Off | ProviderMode::Mock => {}
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// JWT secret key (minimum 64 characters)
    #[validate(length(min = 64))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default = "default_false_bool")]
    pub cors_allow_any_origin: bool,

    /// Payment provider configuration
    #[serde(default)]
    #[validate]
    pub payments: PaymentsConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            payments: PaymentsConfig::default(),
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(
            self.environment.to_ascii_lowercase().as_str(),
            "development" | "dev" | "test" | "local"
        )
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Constraints that cut across fields and environments.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        self.payments.validate_credentials(&mut errors);

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_false_bool() -> bool {
    false
}

fn default_provider_mode() -> ProviderMode {
    ProviderMode::Mock
}

fn default_currency() -> String {
    DEFAULT_SETTLEMENT_CURRENCY.to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter upper-case ISO code".into());
        Err(err)
    }
}

pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("printforge_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
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

    // jwt_secret has no default: it must come from a config file or the
    // environment so an insecure default never reaches production.
    let builder = Config::builder()
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string (minimum 64 characters).");
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

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
