//! Feature calculation engine
//!
//! Pure numeric functions over candle arrays plus a calculator that
//! composes them into the per-market feature vector the scanner ranks on.
//!
//! Features: RVOL, relative strength vs a reference symbol, session VWAP,
//! EMA20/EMA50, ATR(14), trend flag, normalized RVOL, orderbook depth
//! score, spread in basis points, and the weighted composite score.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ScannerConfig, ScoreWeights};
use crate::types::{Candle, Market};
use crate::upbit::OrderbookSnapshot;

/// Relative volume: last volume over the mean of the preceding window.
///
/// Returns the neutral value 1.0 on insufficient data, a non-positive
/// mean, or a non-finite ratio.
pub fn rvol(volumes: &[f64], window: usize) -> f64 {
    if volumes.len() < window + 1 {
        return 1.0;
    }

    let recent = volumes[volumes.len() - 1];
    let historical = &volumes[volumes.len() - 1 - window..volumes.len() - 1];
    let avg = historical.iter().sum::<f64>() / window as f64;

    if avg <= 0.0 {
        return 1.0;
    }

    let ratio = recent / avg;
    if !ratio.is_finite() || ratio < 0.0 {
        return 1.0;
    }
    ratio
}

/// Simple return over the trailing `periods` candles; 0 when undefined
pub fn return_over(prices: &[f64], periods: usize) -> f64 {
    if prices.len() < periods + 1 {
        return 0.0;
    }
    let base = prices[prices.len() - 1 - periods];
    if base <= 0.0 {
        return 0.0;
    }
    (prices[prices.len() - 1] - base) / base
}

/// Relative strength: symbol return minus reference return over the same
/// horizon. The horizon in periods is `window_minutes / candle_unit`.
pub fn relative_strength(
    symbol_prices: &[f64],
    reference_prices: &[f64],
    window_minutes: u32,
    candle_unit: u32,
) -> f64 {
    let periods = (window_minutes / candle_unit.max(1)) as usize;
    return_over(symbol_prices, periods) - return_over(reference_prices, periods)
}

/// Volume-weighted average price; falls back to the last price when the
/// batch traded no volume
pub fn session_vwap(prices: &[f64], volumes: &[f64]) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }

    let mut total_pv = 0.0;
    let mut total_volume = 0.0;
    for (p, v) in prices.iter().zip(volumes) {
        total_pv += p * v;
        total_volume += v;
    }

    if total_volume <= 0.0 {
        prices[prices.len() - 1]
    } else {
        total_pv / total_volume
    }
}

/// Exponential moving average, smoothing 2/(N+1), seeded by the first sample
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(values.len());
    let mut current = values[0];
    result.push(current);

    for &value in &values[1..] {
        current = alpha * value + (1.0 - alpha) * current;
        result.push(current);
    }
    result
}

/// True range series; the first entry degrades to high − low
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());
    for i in 0..high.len() {
        let value = if i == 0 {
            high[0] - low[0]
        } else {
            let hl = high[i] - low[i];
            let hc = (high[i] - close[i - 1]).abs();
            let lc = (low[i] - close[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        tr.push(value);
    }
    tr
}

/// ATR as the simple mean of the last `period` true ranges (not Wilder's).
/// With fewer candles than the period, the mean of what exists.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> f64 {
    if high.is_empty() {
        return 0.0;
    }
    let tr = true_range(high, low, close);
    let tail = &tr[tr.len().saturating_sub(period)..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Normalized RVOL: (rvol − 1) clipped to [0, 3]
pub fn normalize_rvol(rvol: f64) -> f64 {
    (rvol - 1.0).clamp(0.0, 3.0)
}

/// Orderbook depth score: log-scaled total size normalized to [0, 1].
/// A missing snapshot scores 0.
pub fn depth_score(orderbook: Option<&OrderbookSnapshot>) -> f64 {
    let total = match orderbook {
        Some(book) if !book.orderbook_units.is_empty() => book.total_depth(),
        _ => return 0.0,
    };
    if total <= 0.0 {
        return 0.0;
    }
    ((1.0 + total).ln() / 10.0).min(1.0)
}

/// Bid-ask spread in basis points; missing or degenerate books yield +∞,
/// which the hard filter treats as an automatic rejection
pub fn spread_bp(orderbook: Option<&OrderbookSnapshot>) -> f64 {
    let book = match orderbook {
        Some(b) => b,
        None => return f64::INFINITY,
    };
    let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
        (Some(bid), Some(ask)) => (bid, ask),
        _ => return f64::INFINITY,
    };
    if best_bid <= 0.0 || best_ask <= 0.0 || best_ask <= best_bid {
        return f64::INFINITY;
    }
    let mid = (best_bid + best_ask) / 2.0;
    (best_ask - best_bid) / mid * 10_000.0
}

/// Weighted composite score
pub fn composite_score(rs: f64, rvol_z: f64, trend: u8, depth: f64, weights: &ScoreWeights) -> f64 {
    weights.rs * rs + weights.rvol * rvol_z + weights.trend * trend as f64 + weights.depth * depth
}

/// Per-market feature vector produced for the current scan tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub market: Market,

    pub rvol: f64,
    pub relative_strength: f64,
    pub svwap: f64,
    pub atr_14: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub trend: u8,

    pub rvol_z: f64,
    pub depth_score: f64,
    pub spread_bp: f64,
    pub final_score: f64,

    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<FixedOffset>,
    pub sample_count: usize,
}

/// Feature calculation engine parameterized by scanner configuration
#[derive(Debug, Clone)]
pub struct FeatureCalculator {
    config: ScannerConfig,
}

impl FeatureCalculator {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Session VWAP over the candles of the last candle's trading day
    /// (00:00 KST to now)
    fn session_vwap_today(&self, candles: &[Candle]) -> f64 {
        let session_date = match candles.last() {
            Some(c) => c.timestamp.date_naive(),
            None => return 0.0,
        };
        let mut prices = Vec::new();
        let mut volumes = Vec::new();
        for candle in candles {
            if candle.timestamp.date_naive() == session_date {
                prices.push(candle.close);
                volumes.push(candle.volume);
            }
        }
        session_vwap(&prices, &volumes)
    }

    /// Compute the full feature vector for one market.
    ///
    /// Returns None when the batch is too small to say anything useful.
    pub fn calculate_all(
        &self,
        market: &Market,
        candles: &[Candle],
        reference_candles: &[Candle],
        orderbook: Option<&OrderbookSnapshot>,
        now: DateTime<FixedOffset>,
    ) -> Option<FeatureVector> {
        if candles.len() < 2 {
            debug!(market = %market, count = candles.len(), "insufficient candles for features");
            return None;
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();
        let reference_closes: Vec<f64> = reference_candles.iter().map(|c| c.close).collect();

        let rvol_value = rvol(&volumes, self.config.rvol_window);
        let rs = relative_strength(
            &closes,
            &reference_closes,
            self.config.rs_window_minutes,
            self.config.candle_unit,
        );
        let svwap = self.session_vwap_today(candles);
        let atr_14 = atr(&highs, &lows, &closes, 14);

        let ema_fast = ema(&closes, self.config.ema_fast);
        let ema_slow = ema(&closes, self.config.ema_slow);
        let ema_20 = *ema_fast.last().expect("candles non-empty");
        let ema_50 = *ema_slow.last().expect("candles non-empty");
        let last_close = closes[closes.len() - 1];
        let trend = u8::from(ema_20 > ema_50 && last_close > svwap);

        let rvol_z = normalize_rvol(rvol_value);
        let depth = depth_score(orderbook);
        let spread = spread_bp(orderbook);
        let final_score =
            composite_score(rs, rvol_z, trend, depth, &self.config.score_weights);

        debug!(
            market = %market,
            score = final_score,
            rvol = rvol_value,
            rs,
            trend,
            spread_bp = spread,
            "features calculated"
        );

        Some(FeatureVector {
            market: market.clone(),
            rvol: rvol_value,
            relative_strength: rs,
            svwap,
            atr_14,
            ema_20,
            ema_50,
            trend,
            rvol_z,
            depth_score: depth,
            spread_bp: spread,
            final_score,
            price: last_close,
            volume: volumes[volumes.len() - 1],
            timestamp: now,
            sample_count: candles.len(),
        })
    }

    /// Apply the scanner's hard filters.
    ///
    /// Returns the failed criteria; an empty list means the market passes.
    pub fn failed_filters(&self, features: &FeatureVector) -> Vec<String> {
        let mut failed = Vec::new();

        if features.rvol < self.config.rvol_threshold {
            failed.push(format!(
                "rvol {:.2} < {:.2}",
                features.rvol, self.config.rvol_threshold
            ));
        }
        if features.spread_bp > self.config.spread_bp_max {
            failed.push(format!(
                "spread {:.2}bp > {:.2}bp",
                features.spread_bp, self.config.spread_bp_max
            ));
        }
        if features.trend != 1 {
            failed.push("trend != 1".to_string());
        }
        if features.final_score < self.config.min_score {
            failed.push(format!(
                "score {:.3} < {:.3}",
                features.final_score, self.config.min_score
            ));
        }

        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upbit::OrderbookUnit;
    use approx::assert_relative_eq;

    #[test]
    fn test_rvol_exact() {
        // 20 historical at 100, latest 200 => exactly 2.0
        let mut volumes = vec![100.0; 20];
        volumes.push(200.0);
        assert_eq!(rvol(&volumes, 20), 2.0);
    }

    #[test]
    fn test_rvol_insufficient_data_is_neutral() {
        assert_eq!(rvol(&[100.0, 150.0], 20), 1.0);
    }

    #[test]
    fn test_rvol_zero_average_is_neutral() {
        let mut volumes = vec![0.0; 20];
        volumes.push(100.0);
        assert_eq!(rvol(&volumes, 20), 1.0);
    }

    #[test]
    fn test_return_over() {
        let prices = vec![100.0, 105.0, 110.0, 115.0, 120.0];
        assert_relative_eq!(return_over(&prices, 4), 0.20, epsilon = 1e-9);
        assert_eq!(return_over(&prices, 10), 0.0);
    }

    #[test]
    fn test_relative_strength() {
        // Symbol +10%, reference +5% over 2 periods (10 min / 5 min)
        let symbol = vec![100.0, 105.0, 110.0];
        let reference = vec![1000.0, 1025.0, 1050.0];
        let rs = relative_strength(&symbol, &reference, 10, 5);
        assert_relative_eq!(rs, 0.05, epsilon = 0.01);
    }

    #[test]
    fn test_session_vwap() {
        let prices = vec![100.0, 105.0, 110.0];
        let volumes = vec![10.0, 20.0, 30.0];
        let expected = (1000.0 + 2100.0 + 3300.0) / 60.0;
        assert_relative_eq!(session_vwap(&prices, &volumes), expected, epsilon = 0.01);
    }

    #[test]
    fn test_session_vwap_zero_volume_falls_back_to_last() {
        assert_eq!(session_vwap(&[100.0, 105.0], &[0.0, 0.0]), 105.0);
    }

    #[test]
    fn test_ema_seeded_by_first_sample() {
        let values = vec![10.0, 20.0];
        let result = ema(&values, 3); // alpha = 0.5
        assert_eq!(result[0], 10.0);
        assert_relative_eq!(result[1], 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_atr_single_candle_is_range() {
        assert_eq!(atr(&[110.0], &[100.0], &[105.0], 14), 10.0);
    }

    #[test]
    fn test_atr_uses_previous_close() {
        // Gap up: TR of second candle is |high - prev close| = 20
        let high = vec![110.0, 130.0];
        let low = vec![100.0, 125.0];
        let close = vec![105.0, 128.0];
        // tr = [10, max(5, 25, 20)] = [10, 25]
        assert_relative_eq!(atr(&high, &low, &close, 14), 17.5, epsilon = 1e-9);
    }

    #[test]
    fn test_atr_non_negative_invariant() {
        let high = vec![100.0; 30];
        let low = vec![100.0; 30];
        let close = vec![100.0; 30];
        assert!(atr(&high, &low, &close, 14) >= 0.0);
    }

    #[test]
    fn test_normalize_rvol_clipping() {
        assert_eq!(normalize_rvol(0.5), 0.0);
        assert_eq!(normalize_rvol(2.0), 1.0);
        assert_eq!(normalize_rvol(10.0), 3.0);
    }

    fn sample_book(bid: f64, ask: f64, size: f64) -> OrderbookSnapshot {
        OrderbookSnapshot {
            market: "KRW-BTC".to_string(),
            orderbook_units: vec![OrderbookUnit {
                ask_price: ask,
                bid_price: bid,
                ask_size: size,
                bid_size: size,
            }],
        }
    }

    #[test]
    fn test_depth_score_bounds() {
        assert_eq!(depth_score(None), 0.0);

        let thin = sample_book(100.0, 101.0, 0.5);
        let score = depth_score(Some(&thin));
        assert!(score > 0.0 && score <= 1.0);

        // Astronomical depth saturates at 1.0
        let deep = sample_book(100.0, 101.0, 1e12);
        assert_eq!(depth_score(Some(&deep)), 1.0);
    }

    #[test]
    fn test_spread_bp() {
        let book = sample_book(10_000.0, 10_005.0, 1.0);
        // spread 5 over mid 10002.5 => ~5bp
        assert_relative_eq!(spread_bp(Some(&book)), 4.9987, epsilon = 0.01);

        assert!(spread_bp(None).is_infinite());
        let crossed = sample_book(101.0, 100.0, 1.0);
        assert!(spread_bp(Some(&crossed)).is_infinite());
    }

    #[test]
    fn test_composite_score_example() {
        let weights = ScoreWeights::default();
        let score = composite_score(0.02, 2.0, 1, 0.5, &weights);
        assert_relative_eq!(score, 0.858, epsilon = 1e-9);
    }

    #[test]
    fn test_hard_filters() {
        let config = ScannerConfig::default();
        let calc = FeatureCalculator::new(config);

        let passing = FeatureVector {
            market: Market::new("KRW-BTC"),
            rvol: 2.5,
            relative_strength: 0.02,
            svwap: 100.0,
            atr_14: 1.0,
            ema_20: 101.0,
            ema_50: 100.0,
            trend: 1,
            rvol_z: 1.5,
            depth_score: 0.5,
            spread_bp: 3.0,
            final_score: 0.7,
            price: 102.0,
            volume: 10.0,
            timestamp: crate::time_utils::kst_now(),
            sample_count: 200,
        };
        assert!(calc.failed_filters(&passing).is_empty());

        let mut failing = passing.clone();
        failing.rvol = 1.0;
        failing.trend = 0;
        failing.spread_bp = f64::INFINITY;
        let failed = calc.failed_filters(&failing);
        assert_eq!(failed.len(), 3);
    }
}
