//! Session-VWAP pullback strategy
//!
//! Trades mean-reversion entries when price pulls back into a band around
//! the session VWAP during the trading sessions. The pullback must retrace
//! 0.5–2% from the recent extreme; EMA alignment and a volume uptick add
//! confidence.

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use crate::config::SvwapPullbackConfig;
use crate::signals::{
    AbstainReason, Direction, EntryStrategy, MarketSnapshot, Signal, SignalContext,
    SignalPriority, StrategyOutcome, SvwapContext,
};
use crate::time_utils::{in_any_window, TimeWindow};
use crate::types::Candle;

/// Candles inspected for the recent extreme
const PULLBACK_LOOKBACK: usize = 20;
/// Candles inspected for the volume baseline
const VOLUME_LOOKBACK: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullbackFrom {
    High,
    Low,
}

#[derive(Debug, Clone)]
struct PullbackAnalysis {
    recent_high: f64,
    recent_low: f64,
    pullback_pct: f64,
    from: PullbackFrom,
    is_valid: bool,
}

pub struct SvwapPullbackStrategy {
    config: SvwapPullbackConfig,
    session_windows: Vec<TimeWindow>,
}

impl SvwapPullbackStrategy {
    pub fn new(config: SvwapPullbackConfig, session_windows: Vec<TimeWindow>) -> Self {
        Self {
            config,
            session_windows,
        }
    }

    fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.config.use_strategy && in_any_window(now, &self.session_windows)
    }

    /// Retrace from the larger-moved side of the last 20 candles.
    /// A retrace off the low implies an up-trending pullback and vice versa.
    fn analyze_pullback(&self, candles: &[Candle], current_price: f64) -> PullbackAnalysis {
        let lookback = candles.len().min(PULLBACK_LOOKBACK);
        let recent = &candles[candles.len() - lookback..];

        let recent_high = recent.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let recent_low = recent.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let high_pullback_pct = if recent_high > 0.0 {
            (recent_high - current_price) / recent_high * 100.0
        } else {
            0.0
        };
        let low_pullback_pct = if recent_low > 0.0 {
            (current_price - recent_low) / recent_low * 100.0
        } else {
            0.0
        };

        let (from, pullback_pct) = if high_pullback_pct > low_pullback_pct {
            (PullbackFrom::High, high_pullback_pct)
        } else {
            (PullbackFrom::Low, low_pullback_pct)
        };

        let is_valid = pullback_pct >= self.config.min_pullback_pct
            && pullback_pct <= self.config.max_pullback_pct;

        PullbackAnalysis {
            recent_high,
            recent_low,
            pullback_pct,
            from,
            is_valid,
        }
    }

    fn ema_aligned(&self, ema_20: f64, ema_50: f64, direction: Direction) -> bool {
        if !self.config.require_ema_alignment {
            return true;
        }
        match direction {
            Direction::Long => ema_20 > ema_50,
            Direction::Short => ema_20 < ema_50,
        }
    }

    fn volume_confirmed(&self, candles: &[Candle], current_volume: f64) -> bool {
        let lookback = candles.len().min(VOLUME_LOOKBACK);
        if lookback == 0 {
            return true;
        }
        let recent = &candles[candles.len() - lookback..];
        let avg = recent.iter().map(|c| c.volume).sum::<f64>() / lookback as f64;
        if avg <= 0.0 {
            return false;
        }
        current_volume / avg >= self.config.volume_confirm_mult
    }

    fn stop_and_target(
        &self,
        direction: Direction,
        entry: f64,
        analysis: &PullbackAnalysis,
        atr: f64,
    ) -> (f64, f64) {
        match direction {
            Direction::Long => {
                let stop = analysis.recent_low - 0.5 * atr;
                let target = entry + ((analysis.recent_high - entry) * 1.2).max(2.0 * atr);
                (stop, target)
            }
            Direction::Short => {
                let stop = analysis.recent_high + 0.5 * atr;
                let target = entry - ((entry - analysis.recent_low) * 1.2).max(2.0 * atr);
                (stop, target)
            }
        }
    }

    fn confidence(
        &self,
        analysis: &PullbackAnalysis,
        ema_aligned: bool,
        volume_confirmed: bool,
        zone_distance: f64,
    ) -> f64 {
        let mut score = 0.0;

        // Pullback closest to 1% scores best
        if analysis.is_valid {
            let pullback_score = 0.3 * (1.0 - (analysis.pullback_pct - 1.0).abs() / 1.5);
            score += pullback_score.max(0.1);
        }

        score += if ema_aligned { 0.3 } else { 0.1 };
        score += if volume_confirmed { 0.2 } else { 0.05 };
        score += 0.2 * (1.0 - zone_distance.min(1.0));

        score.min(1.0)
    }
}

impl EntryStrategy for SvwapPullbackStrategy {
    fn name(&self) -> &'static str {
        "svwap_pullback"
    }

    fn priority(&self) -> SignalPriority {
        SignalPriority::Medium
    }

    fn generate(&mut self, snapshot: &MarketSnapshot<'_>) -> StrategyOutcome {
        if !self.config.use_strategy {
            return StrategyOutcome::Abstain(AbstainReason::Disabled);
        }
        if !self.is_active(snapshot.now) {
            return StrategyOutcome::Abstain(AbstainReason::OutsideActiveWindow);
        }
        if snapshot.candles.is_empty() {
            return StrategyOutcome::Abstain(AbstainReason::InsufficientData);
        }

        let svwap = snapshot.features.svwap;
        let atr = snapshot.features.atr_14;
        let price = snapshot.current_price;

        let zone_half = self.config.zone_atr_mult * atr;
        let zone_upper = svwap + zone_half;
        let zone_lower = svwap - zone_half;

        if price < zone_lower || price > zone_upper {
            return StrategyOutcome::Abstain(AbstainReason::OutsideEntryZone);
        }

        let analysis = self.analyze_pullback(snapshot.candles, price);
        if !analysis.is_valid {
            debug!(
                market = %snapshot.market,
                pullback_pct = analysis.pullback_pct,
                "pullback outside valid range"
            );
            return StrategyOutcome::Abstain(AbstainReason::InvalidPullback);
        }

        // Long only on a pullback off the low while at/below sVWAP; short
        // is the mirror above it.
        let direction = match analysis.from {
            PullbackFrom::Low if price <= svwap => Direction::Long,
            PullbackFrom::High if price >= svwap => Direction::Short,
            _ => return StrategyOutcome::Abstain(AbstainReason::DirectionUnresolved),
        };

        let ema_aligned = self.ema_aligned(
            snapshot.features.ema_20,
            snapshot.features.ema_50,
            direction,
        );
        if !ema_aligned && self.config.require_ema_alignment {
            return StrategyOutcome::Abstain(AbstainReason::EmaMisaligned);
        }

        let volume_confirmed = self.volume_confirmed(snapshot.candles, snapshot.current_volume);

        let (stop_loss, take_profit) = self.stop_and_target(direction, price, &analysis, atr);
        let (risk_amount, reward_amount, risk_reward_ratio) =
            Signal::risk_metrics(direction, price, stop_loss, take_profit);

        let zone_width = zone_upper - zone_lower;
        let zone_distance = if zone_width > 0.0 {
            (price - svwap).abs() / zone_width
        } else {
            0.0
        };
        let confidence_score =
            self.confidence(&analysis, ema_aligned, volume_confirmed, zone_distance);

        debug!(
            market = %snapshot.market,
            %direction,
            entry = price,
            svwap,
            pullback_pct = analysis.pullback_pct,
            confidence = confidence_score,
            "svwap pullback signal"
        );

        StrategyOutcome::Emit(Box::new(Signal {
            market: snapshot.market.clone(),
            direction,
            entry_price: price,
            stop_loss,
            take_profit,
            risk_amount,
            reward_amount,
            risk_reward_ratio,
            confidence_score,
            timestamp: snapshot.now,
            context: SignalContext::SvwapPullback(SvwapContext {
                svwap,
                zone_upper,
                zone_lower,
                recent_high: analysis.recent_high,
                recent_low: analysis.recent_low,
                pullback_pct: analysis.pullback_pct,
                ema_aligned,
                volume_confirmed,
            }),
        }))
    }

    fn validate(&self, signal: &Signal) -> bool {
        if signal.confidence_score < self.config.min_confidence {
            return false;
        }
        if signal.risk_reward_ratio < 1.0 {
            return false;
        }
        match &signal.context {
            SignalContext::SvwapPullback(ctx) => {
                if self.config.require_ema_alignment && !ctx.ema_aligned {
                    return false;
                }
                true
            }
            _ => false,
        }
    }
}
