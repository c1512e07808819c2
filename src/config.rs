use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub schedule: ScheduleConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
    pub transfer: TransferConfig,
    /// Custody venue holding idle capital between cycles
    pub central_exchange: String,
    /// Deposit routes per venue
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeRoute>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Hours between funding events, counted from 00:00 UTC
    pub funding_interval_hours: u32,
    /// Minutes before a funding event when a new cycle may be planned
    pub onboarding_lead_minutes: i64,
    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Seconds after the funding event before closing, so the payment settles
    #[serde(default)]
    pub close_delay_secs: i64,
}

fn default_tick_interval() -> u64 {
    60
}

impl ScheduleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn onboarding_lead(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.onboarding_lead_minutes)
    }

    pub fn close_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.close_delay_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Minimum ROI (quote currency) a candidate must beat
    pub min_roi: Decimal,
    /// Upper bound on custody capital committed to one cycle
    #[serde(default)]
    pub capital_cap: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Notional value of one resting/market order
    #[serde(default = "default_ideal_order_value")]
    pub ideal_order_value: Decimal,
    /// Maximum resting maker orders at once
    #[serde(default = "default_batch_size")]
    pub ideal_batch_size: u32,
    #[serde(default = "default_book_depth")]
    pub order_book_depth: usize,
    /// Delay between hedge loop iterations in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Delay between order placement retries in milliseconds
    #[serde(default = "default_poll_interval")]
    pub order_retry_interval_ms: u64,
}

fn default_ideal_order_value() -> Decimal {
    Decimal::from(1000)
}

fn default_batch_size() -> u32 {
    5
}

fn default_book_depth() -> usize {
    5
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            ideal_order_value: default_ideal_order_value(),
            ideal_batch_size: default_batch_size(),
            order_book_depth: default_book_depth(),
            poll_interval_ms: default_poll_interval(),
            order_retry_interval_ms: default_poll_interval(),
        }
    }
}

impl ExecutionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn order_retry_interval(&self) -> Duration {
        Duration::from_millis(self.order_retry_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    /// Fraction between liquidation price and stop limit price (e.g., 0.01 = 1%)
    pub limit: Decimal,
    /// Further fraction between limit price and trigger price
    pub trigger: Decimal,
    /// Consecutive unchanged observations before giving up
    pub retry_limit: u32,
    pub poll_interval_ms: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        use rust_decimal_macros::dec;

        Self {
            limit: dec!(0.01),
            trigger: dec!(0.005),
            retry_limit: 5,
            poll_interval_ms: 1000,
        }
    }
}

impl ProtectionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Settlement currency moved between venues (e.g., "USDT")
    pub currency: String,
    /// Amount left behind on the source venue
    #[serde(default)]
    pub dust_reserve: Decimal,
    #[serde(default = "default_transfer_poll")]
    pub poll_interval_secs: u64,
    /// Attempts per polling stage before the transfer is declared failed
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Records requested per withdrawal/deposit history query
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_transfer_poll() -> u64 {
    30
}

fn default_max_polls() -> u32 {
    60
}

fn default_history_limit() -> usize {
    50
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Where a venue receives deposits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRoute {
    pub address: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    Memory,
    #[default]
    File,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default)]
    pub backend: StateBackend,
    /// File backend location
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    /// Row key for the database backend
    #[serde(default = "default_state_key")]
    pub key: String,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/trade_state.json")
}

fn default_state_key() -> String {
    "default".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            path: default_state_path(),
            key: default_state_key(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Reference data JSON (fees, contract sizes, leverage tiers)
    pub reference_path: PathBuf,
    /// Funding rate snapshot JSON written by the ingestion job
    pub funding_rates_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Trade against in-memory paper venues
    #[serde(default)]
    pub enabled: bool,
    /// Custody balance seeded on the central paper venue
    #[serde(default = "default_starting_balance")]
    pub starting_balance: Decimal,
}

fn default_starting_balance() -> Decimal {
    Decimal::from(10_000)
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            starting_balance: default_starting_balance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("schedule.tick_interval_secs", 60)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FUNDARB_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FUNDARB__STRATEGY__MIN_ROI, etc.)
            .add_source(
                Environment::with_prefix("FUNDARB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Deposit route for a venue
    pub fn route(&self, exchange: &str) -> Option<&ExchangeRoute> {
        self.exchanges.get(exchange)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let interval = self.schedule.funding_interval_hours;
        if interval == 0 || 24 % interval != 0 {
            errors.push(format!(
                "funding_interval_hours must divide 24, got {interval}"
            ));
        }

        let lead = self.schedule.onboarding_lead_minutes;
        if lead <= 0 || lead >= i64::from(interval) * 60 {
            errors.push("onboarding_lead_minutes must be positive and shorter than the funding interval".to_string());
        }

        if self.schedule.close_delay_secs < 0 {
            errors.push("close_delay_secs must not be negative".to_string());
        }

        if self.execution.ideal_order_value <= Decimal::ZERO {
            errors.push("ideal_order_value must be positive".to_string());
        }

        if self.execution.ideal_batch_size == 0 {
            errors.push("ideal_batch_size must be at least 1".to_string());
        }

        if self.protection.limit <= Decimal::ZERO || self.protection.limit >= Decimal::ONE {
            errors.push("protection.limit must be between 0 and 1".to_string());
        }

        if self.protection.trigger <= Decimal::ZERO || self.protection.trigger >= Decimal::ONE {
            errors.push("protection.trigger must be between 0 and 1".to_string());
        }

        if self.protection.retry_limit == 0 {
            errors.push("protection.retry_limit must be at least 1".to_string());
        }

        if self.transfer.max_polls == 0 {
            errors.push("transfer.max_polls must be at least 1".to_string());
        }

        if self.transfer.dust_reserve < Decimal::ZERO {
            errors.push("transfer.dust_reserve must not be negative".to_string());
        }

        if let Some(cap) = self.strategy.capital_cap {
            if cap <= Decimal::ZERO {
                errors.push("capital_cap must be positive when set".to_string());
            }
        }

        if !self.exchanges.contains_key(&self.central_exchange) {
            errors.push(format!(
                "central exchange '{}' has no deposit route",
                self.central_exchange
            ));
        }

        if self.state.backend == StateBackend::Postgres && self.database.is_none() {
            errors.push("state backend 'postgres' requires a [database] section".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
