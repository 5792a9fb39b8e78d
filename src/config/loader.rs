//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::strategy::rules::ThresholdProfile;
use crate::strategy::score::ScoreParams;

const SUPPORTED_BASE_TIMEFRAMES: [u32; 5] = [5, 15, 30, 60, 300];

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineSection,
    pub strategy: StrategySection,
    pub risk: RiskSection,
    pub broker: BrokerSection,
    pub logging: LoggingSection,
}

/// Engine configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// "paper" or "live"
    pub mode: String,
    /// Index to trade: NIFTY, BANKNIFTY, SENSEX, FINNIFTY
    pub selected_index: String,
    /// Base candle interval in seconds (must be on the timeframe chain)
    pub candle_interval_seconds: u32,
    /// Fixed order size in lots
    pub order_lots: i64,
    /// Soft pause: block new entries while keeping prices/exits running
    #[serde(default = "default_true")]
    pub trading_enabled: bool,
    /// Ignore session-clock gates (off-hours paper runs)
    #[serde(default)]
    pub bypass_market_hours: bool,
    /// Seed indicators from recent history on start
    #[serde(default = "default_true")]
    pub prefetch_bars_on_start: bool,
}

/// Strategy configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    /// SuperTrend lookback period (candles)
    pub supertrend_period: usize,
    /// SuperTrend ATR band multiplier
    pub supertrend_multiplier: f64,
    /// MACD fast EMA period
    pub macd_fast: usize,
    /// MACD slow EMA period
    pub macd_slow: usize,
    /// MACD signal EMA period
    pub macd_signal: usize,
    /// Bonus when MACD line, signal and histogram all align
    #[serde(default = "default_bonus_triple")]
    pub bonus_macd_triple: f64,
    /// Bonus when MACD line and histogram both score full marks
    #[serde(default = "default_bonus_half")]
    pub bonus_macd_momentum: f64,
    /// Bonus on a MACD signal-line cross
    #[serde(default = "default_bonus_half")]
    pub bonus_macd_cross: f64,
    /// Use the pre-tuning thresholds (A/B replay comparison)
    #[serde(default)]
    pub use_legacy_thresholds: bool,
    /// Minimum seconds a position must be held before signal exits apply
    pub min_hold_seconds: i64,
}

/// Risk management configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct RiskSection {
    /// Profit target in premium points (0 disables)
    pub target_points: f64,
    /// Fixed stop-loss in premium points below entry (0 disables)
    pub initial_stoploss: f64,
    /// Profit in points at which trailing arms (0 disables trailing)
    pub trail_start_profit: f64,
    /// Step size of the trailing ladder in points
    pub trail_step: f64,
    /// Hard cap on position lifetime in seconds (0 disables)
    pub max_trade_duration_seconds: i64,
    /// Maximum entries per session day
    pub max_trades_per_day: u32,
    /// Daily loss in rupees that blocks further entries
    pub daily_max_loss: f64,
    /// Minimum seconds between any two orders
    pub min_order_cooldown_seconds: i64,
    /// Optional minimum seconds between two entries (0 disables)
    #[serde(default)]
    pub min_trade_gap_seconds: i64,
}

/// Broker configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    /// Broker client id (BROKER_CLIENT_ID env var overrides)
    #[serde(default)]
    pub client_id: String,
    /// Trade journal path (JSONL, append-only)
    pub journal_path: String,
}

impl BrokerSection {
    /// Client id with environment variable override.
    pub fn get_client_id(&self) -> String {
        std::env::var("BROKER_CLIENT_ID").unwrap_or_else(|_| self.client_id.clone())
    }

    /// Access token is environment-only, never written to the config file.
    pub fn get_access_token(&self) -> Option<String> {
        std::env::var("BROKER_ACCESS_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log to file (in addition to stdout)
    pub log_to_file: bool,
    /// Log file path
    pub log_file: String,
}

fn default_true() -> bool {
    true
}

fn default_bonus_triple() -> f64 {
    1.0
}

fn default_bonus_half() -> f64 {
    0.5
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.engine.mode.as_str(), "paper" | "live") {
            return Err(ConfigError::ValidationError(format!(
                "mode must be \"paper\" or \"live\", got {:?}",
                self.engine.mode
            )));
        }

        if !SUPPORTED_BASE_TIMEFRAMES.contains(&self.engine.candle_interval_seconds) {
            return Err(ConfigError::ValidationError(format!(
                "candle_interval_seconds must be one of {:?}, got {}",
                SUPPORTED_BASE_TIMEFRAMES, self.engine.candle_interval_seconds
            )));
        }

        if self.engine.order_lots < 1 {
            return Err(ConfigError::ValidationError(format!(
                "order_lots must be >= 1, got {}",
                self.engine.order_lots
            )));
        }

        if self.strategy.supertrend_period == 0 {
            return Err(ConfigError::ValidationError(
                "supertrend_period must be > 0".to_string(),
            ));
        }

        if self.strategy.macd_fast == 0
            || self.strategy.macd_slow == 0
            || self.strategy.macd_signal == 0
        {
            return Err(ConfigError::ValidationError(
                "MACD periods must all be > 0".to_string(),
            ));
        }

        if self.strategy.macd_fast >= self.strategy.macd_slow {
            return Err(ConfigError::ValidationError(format!(
                "macd_fast must be < macd_slow, got {} >= {}",
                self.strategy.macd_fast, self.strategy.macd_slow
            )));
        }

        if self.risk.trail_start_profit > 0.0 && self.risk.trail_step <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "trail_step must be > 0 when trailing is enabled, got {}",
                self.risk.trail_step
            )));
        }

        if self.risk.max_trades_per_day == 0 {
            return Err(ConfigError::ValidationError(
                "max_trades_per_day must be > 0".to_string(),
            ));
        }

        if self.risk.daily_max_loss < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "daily_max_loss must be >= 0, got {}",
                self.risk.daily_max_loss
            )));
        }

        if self.broker.journal_path.is_empty() {
            return Err(ConfigError::ValidationError(
                "journal_path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_paper(&self) -> bool {
        self.engine.mode == "paper"
    }

    /// Entry confirmation candles: paper confirms faster than live.
    pub fn confirm_needed(&self) -> u32 {
        if self.is_paper() {
            1
        } else {
            2
        }
    }

    pub fn threshold_profile(&self) -> ThresholdProfile {
        if self.strategy.use_legacy_thresholds {
            ThresholdProfile::Legacy
        } else {
            ThresholdProfile::Tuned
        }
    }

    pub fn score_params(&self) -> ScoreParams {
        ScoreParams {
            st_period: self.strategy.supertrend_period,
            st_multiplier: self.strategy.supertrend_multiplier,
            macd_fast: self.strategy.macd_fast,
            macd_slow: self.strategy.macd_slow,
            macd_signal: self.strategy.macd_signal,
            base_timeframe_seconds: self.engine.candle_interval_seconds,
            bonus_macd_triple: self.strategy.bonus_macd_triple,
            bonus_macd_momentum: self.strategy.bonus_macd_momentum,
            bonus_macd_cross: self.strategy.bonus_macd_cross,
        }
    }
}
