//! Wire types for the Upbit REST API
//!
//! Numeric candle fields are optional so the candle processor can count
//! missing values per candle instead of failing the whole batch.

use serde::{Deserialize, Serialize};

/// Market listing entry from `/v1/market/all?isDetails=true`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market: String,
    #[serde(default)]
    pub korean_name: Option<String>,
    #[serde(default)]
    pub english_name: Option<String>,
    /// "NONE" or absent when the market carries no warning flag
    #[serde(default)]
    pub market_warning: Option<String>,
}

impl MarketInfo {
    pub fn has_warning(&self) -> bool {
        matches!(&self.market_warning, Some(w) if w != "NONE")
    }
}

/// Raw minute candle from `/v1/candles/minutes/{unit}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandle {
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub candle_date_time_kst: Option<String>,
    #[serde(default)]
    pub opening_price: Option<f64>,
    #[serde(default)]
    pub high_price: Option<f64>,
    #[serde(default)]
    pub low_price: Option<f64>,
    #[serde(default)]
    pub trade_price: Option<f64>,
    #[serde(default)]
    pub candle_acc_trade_volume: Option<f64>,
    #[serde(default)]
    pub candle_acc_trade_price: Option<f64>,
    #[serde(default)]
    pub unit: Option<u32>,
}

/// Ticker entry from `/v1/ticker`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerData {
    pub market: String,
    pub trade_price: f64,
    #[serde(default)]
    pub acc_trade_volume_24h: f64,
    #[serde(default)]
    pub acc_trade_price_24h: f64,
    #[serde(default)]
    pub signed_change_rate: f64,
}

/// One price level of an orderbook snapshot, best levels first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderbookUnit {
    pub ask_price: f64,
    pub bid_price: f64,
    pub ask_size: f64,
    pub bid_size: f64,
}

/// Orderbook snapshot from `/v1/orderbook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub market: String,
    #[serde(default)]
    pub orderbook_units: Vec<OrderbookUnit>,
}

impl OrderbookSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.orderbook_units.first().map(|u| u.bid_price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.orderbook_units.first().map(|u| u.ask_price)
    }

    /// Sum of bid and ask sizes across all levels
    pub fn total_depth(&self) -> f64 {
        self.orderbook_units
            .iter()
            .map(|u| u.bid_size + u.ask_size)
            .sum()
    }
}

/// Account balance entry from `/v1/accounts`; the venue sends numerics as strings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub currency: String,
    pub balance: String,
    #[serde(default)]
    pub locked: String,
    #[serde(default)]
    pub avg_buy_price: String,
}

impl Account {
    pub fn balance_f64(&self) -> f64 {
        self.balance.parse().unwrap_or(0.0)
    }
}

/// Per-fill trade detail attached to an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTrade {
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub funds: Option<String>,
}

impl OrderTrade {
    pub fn price_f64(&self) -> f64 {
        self.price.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0)
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0)
    }
}

/// Order detail from `/v1/order` and `/v1/orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub uuid: String,
    /// "wait", "watch", "done" or "cancel"
    pub state: String,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub ord_type: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub executed_volume: Option<String>,
    #[serde(default)]
    pub paid_fee: Option<String>,
    #[serde(default)]
    pub trades: Vec<OrderTrade>,
}

impl OrderInfo {
    pub fn is_done(&self) -> bool {
        self.state == "done"
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == "cancel"
    }

    pub fn paid_fee_f64(&self) -> f64 {
        self.paid_fee
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    }

    /// Volume-weighted average fill price over the attached trades
    pub fn weighted_fill_price(&self) -> Option<f64> {
        let mut total_volume = 0.0;
        let mut total_value = 0.0;
        for trade in &self.trades {
            let volume = trade.volume_f64();
            total_volume += volume;
            total_value += volume * trade.price_f64();
        }
        if total_volume > 0.0 {
            Some(total_value / total_volume)
        } else {
            None
        }
    }

    pub fn filled_volume(&self) -> f64 {
        self.trades.iter().map(|t| t.volume_f64()).sum()
    }
}
