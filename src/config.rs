//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, bot tokens) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`. Every section has
//! defaults so a partial config file is valid.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::TradingMode;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub risk: RiskLimitsConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub fees: HashMap<String, FeeScheduleConfig>,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScannerConfig {
    /// Seconds between poll cycles.
    pub scan_interval_secs: u64,
    /// Operating mode: "watch" | "paper" | "live".
    pub mode: String,
    /// Reference bankroll for sizing calculations.
    pub initial_bankroll: Decimal,
    /// Per-adapter fetch timeout.
    pub adapter_timeout_secs: u64,
    /// Quotes older than this are excluded from detection snapshots.
    pub quote_max_age_secs: i64,
    /// Tighter staleness bound for time-boxed markets.
    pub time_boxed_max_age_secs: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 60,
            mode: "paper".to_string(),
            initial_bankroll: dec!(5000),
            adapter_timeout_secs: 30,
            quote_max_age_secs: 120,
            time_boxed_max_age_secs: 15,
        }
    }
}

impl ScannerConfig {
    pub fn trading_mode(&self) -> Result<TradingMode> {
        self.mode.parse()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArbitrageConfig {
    /// Minimum gross edge to flag an opportunity (ARB_MIN_PROFIT).
    pub min_profit: f64,
    /// Minimum edge after fees and spread (ARB_MIN_NET_PROFIT).
    pub min_net_profit: f64,
    /// Ignore outcomes quoted below this probability (dust).
    pub ignore_below: f64,
    /// Markets resolving within this horizon use the time-boxed mode.
    pub time_boxed_horizon_secs: i64,
    /// Lower edge floor for time-boxed markets (tighter spreads).
    pub time_boxed_min_profit: f64,
    /// Skip markets resolving further out than this (0 disables).
    pub max_days_to_resolution: i64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit: 0.02,
            min_net_profit: 0.005,
            ignore_below: 0.02,
            time_boxed_horizon_secs: 900,
            time_boxed_min_profit: 0.015,
            max_days_to_resolution: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SizingConfig {
    /// Base stake as a fraction of bankroll.
    pub base_position_size: f64,
    /// Absolute maximum fraction per position.
    pub max_position_size: f64,
    /// Below this fraction, don't bother.
    pub min_position_size: f64,
    /// Hard dollar cap per position, regardless of bankroll.
    pub max_position_dollars: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_position_size: 0.02,
            max_position_size: 0.05,
            min_position_size: 0.005,
            max_position_dollars: dec!(500),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskLimitsConfig {
    /// Fraction of bankroll lost in one day that trips the kill switch.
    pub daily_loss_limit: f64,
    /// Maximum concurrent open positions.
    pub max_open_positions: usize,
    /// Maximum total exposure as a fraction of bankroll.
    pub max_total_exposure: f64,
    /// Seconds before re-entering a market after an exit.
    pub cooldown_secs: i64,
    /// Maximum portfolio correlation penalty for a new position.
    pub max_correlation: f64,
    /// Aggregate exposure cap per correlation group (fraction of bankroll).
    pub max_group_exposure: f64,
    /// Consecutive cycle errors before the emergency stop trips.
    pub max_consecutive_errors: u32,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: 0.05,
            max_open_positions: 50,
            max_total_exposure: 0.20,
            cooldown_secs: 3600,
            max_correlation: 0.4,
            max_group_exposure: 0.10,
            max_consecutive_errors: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QualityConfig {
    /// Opportunities scoring below this (0-10) are discarded.
    pub min_market_score: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_market_score: 6.0,
        }
    }
}

/// Per-platform fee structure. Platforms differ structurally: Kalshi
/// charges a per-contract trading fee, PredictIt takes a cut of profit
/// plus a withdrawal fee, Polymarket currently charges no taker fee.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FeeScheduleConfig {
    /// Flat taker fee as a fraction of notional.
    pub taker_fee: f64,
    /// Fee taken as a fraction of realized profit (PredictIt style).
    pub profit_fee: f64,
    /// Withdrawal fee as a fraction of notional, amortized per trade.
    pub withdrawal_fee: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub kalshi: KalshiConfig,
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    #[serde(default)]
    pub predictit: PredictItConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KalshiConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Env var holding the API key (auth happens below the adapter boundary).
    pub api_key_env: String,
    pub max_events: u32,
}

impl Default for KalshiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
            api_key_env: "KALSHI_API_KEY".to_string(),
            max_events: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolymarketConfig {
    pub enabled: bool,
    pub gamma_url: String,
    pub max_markets: u32,
    /// Also surface short-horizon crypto up/down markets.
    pub crypto_markets: bool,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            max_markets: 200,
            crypto_markets: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PredictItConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for PredictItConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://www.predictit.org/api/marketdata".to_string(),
        }
    }
}

/// Experimental push feed (second writer into the quote cache).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    pub url: String,
    pub reconnect_delay_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: String,
    pub telegram_chat_id_env: String,
    /// Only alert on opportunities at or above this edge (percent).
    pub min_edge_pct: f64,
    /// Per-opportunity alert cooldown.
    pub cooldown_secs: i64,
    /// Shorter cooldown for fast time-boxed markets.
    pub time_boxed_cooldown_secs: i64,
    pub heartbeat_interval_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token_env: "TELEGRAM_BOT_TOKEN".to_string(),
            telegram_chat_id_env: "TELEGRAM_CHAT_ID".to_string(),
            min_edge_pct: 3.0,
            cooldown_secs: 900,
            time_boxed_cooldown_secs: 300,
            heartbeat_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "seer.db".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate safety-critical settings.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.risk.daily_loss_limit <= 0.0 || self.risk.daily_loss_limit > 0.5 {
            errors.push(format!(
                "daily_loss_limit should be in (0%, 50%], got {:.1}%",
                self.risk.daily_loss_limit * 100.0
            ));
        }
        if self.sizing.max_position_size > 0.2 {
            errors.push(format!(
                "max_position_size is dangerously high: {:.1}%",
                self.sizing.max_position_size * 100.0
            ));
        }
        if self.arbitrage.min_profit <= 0.0 {
            errors.push("arbitrage.min_profit must be positive".to_string());
        }
        if self.arbitrage.min_net_profit >= self.arbitrage.min_profit {
            errors.push("arbitrage.min_net_profit should be less than min_profit".to_string());
        }
        if self.sizing.min_position_size > self.sizing.max_position_size {
            errors.push("sizing.min_position_size exceeds max_position_size".to_string());
        }
        match self.scanner.trading_mode() {
            Ok(TradingMode::Live) => {
                errors.push("live trading is not implemented".to_string())
            }
            Ok(_) => {}
            Err(e) => errors.push(e.to_string()),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "))
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
