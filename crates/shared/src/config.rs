//! Application configuration management.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::Currency;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Billing engine configuration.
    #[serde(default)]
    pub billing: BillingConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Billing engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Currency invoices are issued in.
    #[serde(default)]
    pub currency: Currency,
    /// VAT percentage applied to new invoice lines (21 means 21%).
    #[serde(default = "default_vat_rate")]
    pub default_vat_rate: Decimal,
    /// Days between issue date and due date.
    #[serde(default = "default_payment_term_days")]
    pub payment_term_days: u32,
    /// Apply available ledger credit when an invoice is issued.
    #[serde(default = "default_true")]
    pub auto_apply_credit: bool,
    /// Whether credit may be decoupled from an invoice already marked paid.
    #[serde(default = "default_true")]
    pub allow_decouple_on_paid: bool,
    /// Attempts for an operation that hit a concurrent modification.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries in milliseconds (doubled per attempt).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// IANA timezone of the school, used to pick the year of a reference.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_vat_rate() -> Decimal {
    Decimal::new(21, 0)
}

fn default_payment_term_days() -> u32 {
    14
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    25
}

fn default_timezone() -> String {
    "Europe/Amsterdam".to_string()
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: Currency::default(),
            default_vat_rate: default_vat_rate(),
            payment_term_days: default_payment_term_days(),
            auto_apply_credit: true,
            allow_decouple_on_paid: true,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timezone: default_timezone(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_filter() -> String {
    "cadence=info,sea_orm=warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
