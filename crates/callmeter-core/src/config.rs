//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use crate::error::AppError;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub billing: BillingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

/// Billing-specific configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BillingConfig {
    /// Seconds after connection before billing may start without media
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Whether the grace period bypass is honoured at all
    #[serde(default = "default_grace_enabled")]
    pub grace_period_enabled: bool,

    /// Ticker persists its meter every N seconds of billed time
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,

    /// Ticker period in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Minutes of talk time a wallet must cover before billing starts
    #[serde(default = "default_min_balance_window")]
    pub min_balance_window_minutes: u32,

    /// Share of the accrued amount credited to the provider
    #[serde(default = "default_provider_share")]
    pub provider_share_percent: u32,

    /// Per-minute rate applied when a provider has no pricing record
    #[serde(default = "default_rate_per_minute")]
    pub default_rate_per_minute: f64,

    /// Bounded mailbox size for each call actor
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Finalize automatically once the wallet can no longer cover the meter
    #[serde(default = "default_stop_on_exhausted")]
    pub stop_on_balance_exhausted: bool,

    /// Idle call actors without a ticker or grace timer exit after this long
    #[serde(default = "default_actor_idle_timeout")]
    pub actor_idle_timeout_secs: u64,
}

fn default_grace_period() -> u64 {
    15
}

fn default_grace_enabled() -> bool {
    true
}

fn default_snapshot_interval() -> u64 {
    5
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_min_balance_window() -> u32 {
    5
}

fn default_provider_share() -> u32 {
    100
}

fn default_rate_per_minute() -> f64 {
    50.0
}

fn default_mailbox_capacity() -> usize {
    64
}

fn default_stop_on_exhausted() -> bool {
    true
}

fn default_actor_idle_timeout() -> u64 {
    600
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());
        debug!("Loading configuration for run mode {}", run_mode);

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.cors_origins", "http://localhost:3000")?
            .set_default("billing.grace_period_secs", 15)?
            .set_default("billing.grace_period_enabled", true)?
            .set_default("billing.snapshot_interval_secs", 5)?
            .set_default("billing.tick_interval_ms", 1000)?
            .set_default("billing.min_balance_window_minutes", 5)?
            .set_default("billing.provider_share_percent", 100)?
            .set_default("billing.default_rate_per_minute", 50.0)?
            .set_default("billing.mailbox_capacity", 64)?
            .set_default("billing.stop_on_balance_exhausted", true)?
            .set_default("billing.actor_idle_timeout_secs", 600)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CALLMETER_ prefix
            .add_source(
                Environment::with_prefix("CALLMETER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CALLMETER").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        self.billing.validate()
    }
}

impl BillingConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config("billing.tick_interval_ms must be > 0".into()));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(AppError::Config(
                "billing.snapshot_interval_secs must be > 0".into(),
            ));
        }
        if self.provider_share_percent > 100 {
            return Err(AppError::Config(
                "billing.provider_share_percent must be within 0..=100".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(AppError::Config("billing.mailbox_capacity must be > 0".into()));
        }
        if !self.default_rate_per_minute.is_finite() || self.default_rate_per_minute <= 0.0 {
            return Err(AppError::Config(
                "billing.default_rate_per_minute must be a positive number".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn actor_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.actor_idle_timeout_secs)
    }

    /// Provider share as a fraction in `[0, 1]`.
    pub fn provider_share(&self) -> Decimal {
        Decimal::from(self.provider_share_percent.min(100)) / Decimal::ONE_HUNDRED
    }

    pub fn default_rate(&self) -> Decimal {
        Decimal::from_f64(self.default_rate_per_minute)
            .map(|rate| rate.round_dp(4))
            .unwrap_or(Decimal::ZERO)
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 15,
            grace_period_enabled: true,
            snapshot_interval_secs: 5,
            tick_interval_ms: 1000,
            min_balance_window_minutes: 5,
            provider_share_percent: 100,
            default_rate_per_minute: 50.0,
            mailbox_capacity: 64,
            stop_on_balance_exhausted: true,
            actor_idle_timeout_secs: 600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_billing_config() {
        let config = BillingConfig::default();
        assert_eq!(config.grace_period_secs, 15);
        assert_eq!(config.snapshot_interval_secs, 5);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_share_fraction() {
        let mut config = BillingConfig::default();
        assert_eq!(config.provider_share(), dec!(1));
        config.provider_share_percent = 70;
        assert_eq!(config.provider_share(), dec!(0.7));
    }

    #[test]
    fn test_default_rate_conversion() {
        let config = BillingConfig::default();
        assert_eq!(config.default_rate(), dec!(50));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let config = BillingConfig {
            tick_interval_ms: 0,
            ..BillingConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
