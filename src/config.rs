//! Configuration management
//!
//! Loads the runtime configuration from a JSON file, overlays API
//! credentials from the environment, and validates every field at load
//! time so bad values fail before the first tick rather than mid-session.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::time_utils::TimeWindow;
use crate::types::TimeInForce;

/// Candle units the venue's minute-candle endpoint accepts
const VALID_CANDLE_UNITS: [u32; 8] = [1, 3, 5, 10, 15, 30, 60, 240];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("score weights must sum to 1.0 (±0.01), got {0}")]
    WeightsDoNotSumToOne(f64),

    #[error("candle unit {0} is not supported by the venue")]
    InvalidCandleUnit(u32),

    #[error("invalid time window '{window}': {source}")]
    InvalidWindow {
        window: String,
        source: crate::time_utils::TimeWindowError,
    },

    #[error("min_pullback_pct ({min}) must be below max_pullback_pct ({max})")]
    PullbackRangeInverted { min: f64, max: f64 },

    #[error("min_position_krw ({min}) must be below max_position_krw ({max})")]
    PositionRangeInverted { min: f64, max: f64 },

    #[error("fill_probability must be in (0, 1], got {0}")]
    InvalidFillProbability(f64),

    #[error("slippage_bp_range must be ordered low..high, got [{0}, {1}]")]
    SlippageRangeInverted(f64, f64),

    #[error("fill_delay_ms must be ordered low..high, got [{0}, {1}]")]
    FillDelayRangeInverted(u64, u64),

    #[error("unsupported timezone '{0}', this system trades Asia/Seoul only")]
    UnsupportedTimezone(String),

    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub symbols: SymbolsConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            exchange: ExchangeConfig::default(),
            symbols: SymbolsConfig::default(),
            scanner: ScannerConfig::default(),
            signals: SignalsConfig::default(),
            risk: RiskConfig::default(),
            orders: OrdersConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validated defaults, for commands that run without a config file
    pub fn default_validated() -> Self {
        let config = Config::default();
        debug_assert!(config.validate().is_ok());
        config
    }

    /// Cross-field validation; every invalid value fails here, not at first use
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.scanner.score_weights;
        let sum = w.rs + w.rvol + w.trend + w.depth;
        if (sum - 1.0).abs() > 0.01 {
            return Err(ConfigError::WeightsDoNotSumToOne(sum));
        }

        if !VALID_CANDLE_UNITS.contains(&self.scanner.candle_unit) {
            return Err(ConfigError::InvalidCandleUnit(self.scanner.candle_unit));
        }

        for window in &self.runtime.session_windows {
            TimeWindow::parse(window).map_err(|source| ConfigError::InvalidWindow {
                window: window.clone(),
                source,
            })?;
        }
        TimeWindow::parse(&self.signals.orb.box_window).map_err(|source| {
            ConfigError::InvalidWindow {
                window: self.signals.orb.box_window.clone(),
                source,
            }
        })?;

        let svwap = &self.signals.svwap_pullback;
        if svwap.min_pullback_pct >= svwap.max_pullback_pct {
            return Err(ConfigError::PullbackRangeInverted {
                min: svwap.min_pullback_pct,
                max: svwap.max_pullback_pct,
            });
        }

        if self.risk.min_position_krw >= self.risk.max_position_krw {
            return Err(ConfigError::PositionRangeInverted {
                min: self.risk.min_position_krw,
                max: self.risk.max_position_krw,
            });
        }
        if self.risk.per_trade_risk_pct <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "risk.per_trade_risk_pct",
                value: self.risk.per_trade_risk_pct,
            });
        }
        if self.risk.daily_drawdown_stop_pct <= 0.0 {
            return Err(ConfigError::NonPositive {
                field: "risk.daily_drawdown_stop_pct",
                value: self.risk.daily_drawdown_stop_pct,
            });
        }

        let paper = &self.orders.paper_mode;
        if paper.fill_probability <= 0.0 || paper.fill_probability > 1.0 {
            return Err(ConfigError::InvalidFillProbability(paper.fill_probability));
        }
        if paper.slippage_bp_range[0] > paper.slippage_bp_range[1] {
            return Err(ConfigError::SlippageRangeInverted(
                paper.slippage_bp_range[0],
                paper.slippage_bp_range[1],
            ));
        }
        if paper.fill_delay_ms[0] > paper.fill_delay_ms[1] {
            return Err(ConfigError::FillDelayRangeInverted(
                paper.fill_delay_ms[0],
                paper.fill_delay_ms[1],
            ));
        }

        if self.runtime.timezone != "Asia/Seoul" {
            return Err(ConfigError::UnsupportedTimezone(
                self.runtime.timezone.clone(),
            ));
        }

        Ok(())
    }

    /// Parsed trading session windows
    pub fn session_windows(&self) -> Vec<TimeWindow> {
        self.runtime
            .session_windows
            .iter()
            .map(|s| TimeWindow::parse(s).expect("validated at load"))
            .collect()
    }
}

/// Exchange gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_secs: f64,
    pub requests_per_minute: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            base_url: "https://api.upbit.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_secs: 3.0,
            requests_per_minute: 600,
        }
    }
}

/// Universe selection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolsConfig {
    pub exclude_warning: bool,
    pub max_markets_to_scan: usize,
    pub priority_markets: Vec<String>,
}

impl Default for SymbolsConfig {
    fn default() -> Self {
        SymbolsConfig {
            exclude_warning: true,
            max_markets_to_scan: 50,
            priority_markets: [
                "KRW-BTC", "KRW-ETH", "KRW-SOL", "KRW-ADA", "KRW-DOT", "KRW-AVAX",
                "KRW-MATIC", "KRW-ATOM", "KRW-LINK", "KRW-XRP", "KRW-NEAR", "KRW-UNI",
                "KRW-MANA", "KRW-SAND", "KRW-CRO", "KRW-SHIB", "KRW-DOGE", "KRW-TRX",
                "KRW-ETC", "KRW-BCH", "KRW-LTC", "KRW-EOS", "KRW-XLM", "KRW-VET",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Composite score weights; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub rs: f64,
    pub rvol: f64,
    pub trend: f64,
    pub depth: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ScoreWeights {
            rs: 0.4,
            rvol: 0.3,
            trend: 0.2,
            depth: 0.1,
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub candle_unit: u32,
    pub candle_count: u32,
    pub rvol_threshold: f64,
    pub rvol_window: usize,
    pub spread_bp_max: f64,
    pub rs_window_minutes: u32,
    pub rs_reference_symbol: String,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub score_weights: ScoreWeights,
    pub candidate_count: usize,
    pub min_score: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        ScannerConfig {
            candle_unit: 5,
            candle_count: 200,
            rvol_threshold: 2.0,
            rvol_window: 20,
            spread_bp_max: 5.0,
            rs_window_minutes: 60,
            rs_reference_symbol: "KRW-BTC".to_string(),
            ema_fast: 20,
            ema_slow: 50,
            score_weights: ScoreWeights::default(),
            candidate_count: 3,
            min_score: 0.5,
        }
    }
}

/// ORB (Opening Range Breakout) strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    pub use_strategy: bool,
    pub box_window: String,
    pub breakout_atr_mult: f64,
    pub volume_spike_mult: f64,
    pub volume_lookback: usize,
    pub min_confidence: f64,
}

impl Default for OrbConfig {
    fn default() -> Self {
        OrbConfig {
            use_strategy: true,
            box_window: "09:00-10:00".to_string(),
            breakout_atr_mult: 0.1,
            volume_spike_mult: 1.5,
            volume_lookback: 20,
            min_confidence: 0.6,
        }
    }
}

/// sVWAP pullback strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvwapPullbackConfig {
    pub use_strategy: bool,
    pub zone_atr_mult: f64,
    pub require_ema_alignment: bool,
    pub min_pullback_pct: f64,
    pub max_pullback_pct: f64,
    pub volume_confirm_mult: f64,
    pub min_confidence: f64,
}

impl Default for SvwapPullbackConfig {
    fn default() -> Self {
        SvwapPullbackConfig {
            use_strategy: true,
            zone_atr_mult: 0.25,
            require_ema_alignment: true,
            min_pullback_pct: 0.5,
            max_pullback_pct: 2.0,
            volume_confirm_mult: 1.2,
            min_confidence: 0.5,
        }
    }
}

/// Liquidity sweep reversal strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepReversalConfig {
    pub use_strategy: bool,
    pub swing_lookback: usize,
    pub penetration_atr_mult: f64,
    pub recovery_time_minutes: i64,
    pub volume_spike_mult: f64,
    pub min_confidence: f64,
    pub min_risk_reward: f64,
}

impl Default for SweepReversalConfig {
    fn default() -> Self {
        SweepReversalConfig {
            use_strategy: true,
            swing_lookback: 50,
            penetration_atr_mult: 0.05,
            recovery_time_minutes: 15,
            volume_spike_mult: 2.0,
            min_confidence: 0.7,
            min_risk_reward: 1.5,
        }
    }
}

/// Signal strategies configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    pub orb: OrbConfig,
    pub svwap_pullback: SvwapPullbackConfig,
    pub sweep_reversal: SweepReversalConfig,
}

/// Risk guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub per_trade_risk_pct: f64,
    pub min_position_krw: f64,
    pub max_position_krw: f64,
    pub daily_drawdown_stop_pct: f64,
    pub same_symbol_consecutive_losses_stop: u32,
    pub min_risk_reward_ratio: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            per_trade_risk_pct: 0.004,
            min_position_krw: 10_000.0,
            max_position_krw: 500_000.0,
            daily_drawdown_stop_pct: 0.01,
            same_symbol_consecutive_losses_stop: 2,
            min_risk_reward_ratio: 1.0,
        }
    }
}

/// Paper trading simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperModeConfig {
    pub simulate_slippage: bool,
    pub slippage_bp_range: [f64; 2],
    pub fill_probability: f64,
    pub fill_delay_ms: [u64; 2],
    /// Fixed RNG seed; set for reproducible paper sessions
    pub seed: Option<u64>,
}

impl Default for PaperModeConfig {
    fn default() -> Self {
        PaperModeConfig {
            simulate_slippage: true,
            slippage_bp_range: [0.0, 3.0],
            fill_probability: 0.95,
            fill_delay_ms: [100, 500],
            seed: None,
        }
    }
}

/// Order executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub slippage_bp_max: f64,
    pub time_in_force: TimeInForce,
    pub fill_timeout_seconds: u64,
    pub paper_mode: PaperModeConfig,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        OrdersConfig {
            slippage_bp_max: 5.0,
            time_in_force: TimeInForce::Ioc,
            fill_timeout_seconds: 300,
            paper_mode: PaperModeConfig::default(),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub session_windows: Vec<String>,
    pub timezone: String,
    pub scan_interval_minutes: i64,
    pub signal_check_interval_seconds: u64,
    pub data_dir: String,
    pub reports_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            session_windows: vec!["09:10-13:00".to_string(), "17:10-19:00".to_string()],
            timezone: "Asia/Seoul".to_string(),
            scan_interval_minutes: 5,
            signal_check_interval_seconds: 30,
            data_dir: "runtime/data".to_string(),
            reports_dir: "runtime/reports".to_string(),
        }
    }
}

/// API credentials and mode, loaded from environment variables
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    /// Load from `UPBIT_ACCESS_KEY` / `UPBIT_SECRET_KEY`
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("UPBIT_ACCESS_KEY").ok()?;
        let secret_key = std::env::var("UPBIT_SECRET_KEY").ok()?;
        if access_key.is_empty() || secret_key.is_empty() {
            return None;
        }
        Some(Credentials {
            access_key,
            secret_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_weight_sum_enforced() {
        let mut config = Config::default();
        config.scanner.score_weights.rs = 0.6;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WeightsDoNotSumToOne(_))
        ));
    }

    #[test]
    fn test_weight_sum_tolerance() {
        let mut config = Config::default();
        config.scanner.score_weights.rs = 0.405;
        config.scanner.score_weights.depth = 0.1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_candle_unit_rejected() {
        let mut config = Config::default();
        config.scanner.candle_unit = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCandleUnit(7))
        ));
    }

    #[test]
    fn test_bad_session_window_rejected() {
        let mut config = Config::default();
        config.runtime.session_windows = vec!["13:00-09:10".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_pullback_range_rejected_when_inverted() {
        let mut config = Config::default();
        config.signals.svwap_pullback.min_pullback_pct = 3.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PullbackRangeInverted { .. })
        ));
    }

    #[test]
    fn test_fill_probability_bounds() {
        let mut config = Config::default();
        config.orders.paper_mode.fill_probability = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidFillProbability(_))
        ));
    }

    #[test]
    fn test_timezone_pinned_to_seoul() {
        let mut config = Config::default();
        config.runtime.timezone = "UTC".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedTimezone(_))
        ));
    }

    #[test]
    fn test_session_windows_parse() {
        let config = Config::default();
        let windows = config.session_windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].to_string(), "09:10-13:00");
    }

    #[test]
    fn test_partial_json_gets_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"scanner": {"candidate_count": 2}}"#).unwrap();
        assert_eq!(config.scanner.candidate_count, 2);
        assert_eq!(config.scanner.candle_count, 200);
        assert!(config.validate().is_ok());
    }
}
