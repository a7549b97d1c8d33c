//! Core data types used across the trading system

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick with its open time in the trading timezone (KST)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (for trusted sources or when validation is done separately)
    pub fn new_unchecked(
        timestamp: DateTime<FixedOffset>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Check if the candle is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Market code (e.g. "KRW-BTC") using Arc<str> for cheap cloning
///
/// Market codes are cloned onto every signal, order and position. Arc<str>
/// keeps those clones at O(1) instead of reallocating the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Market(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Market {
    pub fn new(s: impl AsRef<str>) -> Self {
        Market(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for KRW-quoted spot markets, the only universe this system trades
    pub fn is_krw(&self) -> bool {
        self.0.starts_with("KRW-")
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order lifecycle state. `Filled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Rejected)
    }
}

/// Order type. The venue has no native stop orders; stop-loss and
/// take-profit are posted as limits and supervised client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

/// Time-in-force for limit orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Ioc,
    Fok,
    Gtc,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Gtc => write!(f, "GTC"),
        }
    }
}

/// Order request, constructed transiently by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub signal_reference: Option<String>,
}

/// Order execution result, persisted on every state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub market: Market,
    pub side: Side,
    pub order_type: OrderType,

    pub quantity_requested: f64,
    pub quantity_filled: f64,
    pub quantity_remaining: f64,

    pub price_requested: Option<f64>,
    pub price_filled: Option<f64>,

    pub submit_time: DateTime<FixedOffset>,
    pub fill_time: Option<DateTime<FixedOffset>>,

    pub commission: f64,
    pub slippage_bp: f64,

    pub is_paper_trade: bool,
    pub simulated_delay_ms: u64,

    pub error_message: Option<String>,
}

/// Trading position. At most one active position per market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market: Market,
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub entry_time: DateTime<FixedOffset>,

    pub entry_order_id: String,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,

    /// Exit levels carried on the position itself; the monitor evaluates
    /// these directly since the venue cannot hold a bracket server-side.
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,

    pub unrealized_pnl: f64,
    pub realized_pnl: f64,

    pub is_active: bool,
    pub exit_time: Option<DateTime<FixedOffset>>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<String>,
}

impl Position {
    /// Stable id used as the persistence key
    pub fn id(&self) -> String {
        format!("{}_{}", self.market, self.entry_order_id)
    }

    /// Unrealized P&L at the given price
    pub fn unrealized_at(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Buy => (current_price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Whether the given price has crossed the stop level
    pub fn stop_hit(&self, current_price: f64) -> bool {
        match (self.stop_loss, self.side) {
            (Some(stop), Side::Buy) => current_price <= stop,
            (Some(stop), Side::Sell) => current_price >= stop,
            (None, _) => false,
        }
    }

    /// Whether the given price has crossed the take-profit level
    pub fn take_profit_hit(&self, current_price: f64) -> bool {
        match (self.take_profit, self.side) {
            (Some(tp), Side::Buy) => current_price >= tp,
            (Some(tp), Side::Sell) => current_price <= tp,
            (None, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::kst_now;

    #[test]
    fn test_candle_validation_rejects_inverted_range() {
        let c = Candle::new_unchecked(kst_now(), 100.0, 90.0, 95.0, 92.0, 10.0);
        assert!(matches!(
            c.validate(),
            Err(CandleValidationError::HighLessThanLow { .. })
        ));
    }

    #[test]
    fn test_candle_validation_rejects_negative_volume() {
        let c = Candle::new_unchecked(kst_now(), 100.0, 110.0, 95.0, 105.0, -1.0);
        assert!(matches!(
            c.validate(),
            Err(CandleValidationError::NegativeVolume(_))
        ));
    }

    #[test]
    fn test_candle_validation_accepts_well_formed() {
        let c = Candle::new(kst_now(), 100.0, 110.0, 95.0, 105.0, 10.0);
        assert!(c.is_ok());
    }

    #[test]
    fn test_market_krw_filter() {
        assert!(Market::new("KRW-BTC").is_krw());
        assert!(!Market::new("BTC-ETH").is_krw());
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_position_level_checks() {
        let pos = Position {
            market: Market::new("KRW-BTC"),
            side: Side::Buy,
            entry_price: 50_000.0,
            quantity: 2.0,
            entry_time: kst_now(),
            entry_order_id: "e1".to_string(),
            stop_loss_order_id: None,
            take_profit_order_id: None,
            stop_loss: Some(49_000.0),
            take_profit: Some(52_000.0),
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            is_active: true,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
        };

        assert!(pos.stop_hit(48_900.0));
        assert!(!pos.stop_hit(49_100.0));
        assert!(pos.take_profit_hit(52_100.0));
        assert!(!pos.take_profit_hit(51_000.0));
        assert_eq!(pos.unrealized_at(51_000.0), 2_000.0);
    }

    #[test]
    fn test_order_result_serde_round_trip() {
        let result = OrderResult {
            order_id: "abc".to_string(),
            status: OrderStatus::Filled,
            market: Market::new("KRW-ETH"),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity_requested: 1.5,
            quantity_filled: 1.5,
            quantity_remaining: 0.0,
            price_requested: Some(3_000_000.0),
            price_filled: Some(3_000_150.0),
            submit_time: kst_now(),
            fill_time: Some(kst_now()),
            commission: 2250.0,
            slippage_bp: 0.5,
            is_paper_trade: true,
            simulated_delay_ms: 120,
            error_message: None,
        };

        let json = serde_json::to_string(&result).unwrap();
        let parsed: OrderResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.order_id, result.order_id);
        assert_eq!(parsed.status, OrderStatus::Filled);
        assert_eq!(parsed.market, result.market);
        assert_eq!(parsed.price_filled, result.price_filled);
        assert_eq!(parsed.commission, result.commission);
    }
}
