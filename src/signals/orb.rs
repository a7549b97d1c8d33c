//! Opening Range Breakout strategy
//!
//! The first hour of the morning session defines a price box. A breach of
//! the box edge by 0.1×ATR with a 1.5× volume spike enters in the breakout
//! direction, stop on the far side of the box, target at least the box
//! range or 1.5×ATR.

use chrono::{DateTime, FixedOffset, NaiveTime};
use tracing::debug;

use crate::config::OrbConfig;
use crate::signals::{
    AbstainReason, Direction, EntryStrategy, MarketSnapshot, OrbContext, Signal, SignalContext,
    SignalPriority, StrategyOutcome,
};
use crate::time_utils::TimeWindow;
use crate::types::Candle;

/// Opening range box computed from today's candles inside the box window
#[derive(Debug, Clone)]
struct OrbBox {
    high: f64,
    low: f64,
    range: f64,
}

pub struct OrbStrategy {
    config: OrbConfig,
    box_window: TimeWindow,
    active_window: TimeWindow,
}

impl OrbStrategy {
    pub fn new(config: OrbConfig) -> Self {
        let box_window = TimeWindow::parse(&config.box_window).expect("validated at config load");
        // Breakouts are only taken after the box forms, through the end of
        // the morning session.
        let active_window = TimeWindow::new(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        )
        .expect("static window is well-formed");

        Self {
            config,
            box_window,
            active_window,
        }
    }

    fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.config.use_strategy && self.active_window.contains(now)
    }

    /// Box over today's candles intersecting the configured opening window
    fn calculate_box(&self, candles: &[Candle], now: DateTime<FixedOffset>) -> Option<OrbBox> {
        let today = now.date_naive();
        let mut high = f64::MIN;
        let mut low = f64::MAX;
        let mut found = false;

        for candle in candles {
            if candle.timestamp.date_naive() == today && self.box_window.contains(candle.timestamp)
            {
                high = high.max(candle.high);
                low = low.min(candle.low);
                found = true;
            }
        }

        found.then(|| OrbBox {
            high,
            low,
            range: high - low,
        })
    }

    /// Current volume against the mean of the recent lookback volumes.
    /// With no history the spike check passes by default.
    fn volume_ratio(&self, candles: &[Candle], current_volume: f64) -> f64 {
        let lookback = candles.len().min(self.config.volume_lookback);
        if lookback == 0 {
            return 1.0;
        }
        let recent = &candles[candles.len() - lookback..];
        let avg = recent.iter().map(|c| c.volume).sum::<f64>() / lookback as f64;
        if avg > 0.0 {
            current_volume / avg
        } else {
            0.0
        }
    }

    fn stop_and_target(&self, direction: Direction, entry: f64, orb: &OrbBox, atr: f64) -> (f64, f64) {
        let target_distance = orb.range.max(1.5 * atr);
        match direction {
            Direction::Long => (orb.low - 0.5 * atr, entry + target_distance),
            Direction::Short => (orb.high + 0.5 * atr, entry - target_distance),
        }
    }

    fn confidence(&self, volume_ratio: f64, range: f64, atr: f64, trend_aligned: bool) -> f64 {
        let volume_score = (volume_ratio / 3.0).min(0.4);
        let range_score = if atr > 0.0 {
            (range / (2.0 * atr)).min(0.3)
        } else {
            0.0
        };
        let trend_score = if trend_aligned { 0.3 } else { 0.1 };
        (volume_score + range_score + trend_score).min(1.0)
    }
}

impl EntryStrategy for OrbStrategy {
    fn name(&self) -> &'static str {
        "orb"
    }

    fn priority(&self) -> SignalPriority {
        SignalPriority::High
    }

    fn generate(&mut self, snapshot: &MarketSnapshot<'_>) -> StrategyOutcome {
        if !self.config.use_strategy {
            return StrategyOutcome::Abstain(AbstainReason::Disabled);
        }
        if !self.is_active(snapshot.now) {
            return StrategyOutcome::Abstain(AbstainReason::OutsideActiveWindow);
        }

        let orb = match self.calculate_box(snapshot.candles, snapshot.now) {
            Some(b) => b,
            None => return StrategyOutcome::Abstain(AbstainReason::InsufficientData),
        };

        let atr = snapshot.features.atr_14;
        let price = snapshot.current_price;
        let long_level = orb.high + self.config.breakout_atr_mult * atr;
        let short_level = orb.low - self.config.breakout_atr_mult * atr;

        let direction = if price >= long_level {
            Direction::Long
        } else if price <= short_level {
            Direction::Short
        } else {
            return StrategyOutcome::Abstain(AbstainReason::NoSetup);
        };

        let volume_ratio = self.volume_ratio(snapshot.candles, snapshot.current_volume);
        let volume_confirmed = volume_ratio >= self.config.volume_spike_mult;
        if !volume_confirmed {
            debug!(
                market = %snapshot.market,
                volume_ratio,
                required = self.config.volume_spike_mult,
                "orb breakout without volume confirmation"
            );
            return StrategyOutcome::Abstain(AbstainReason::VolumeUnconfirmed);
        }

        let (stop_loss, take_profit) = self.stop_and_target(direction, price, &orb, atr);
        let (risk_amount, reward_amount, risk_reward_ratio) =
            Signal::risk_metrics(direction, price, stop_loss, take_profit);

        let trend_aligned = match direction {
            Direction::Long => snapshot.features.trend == 1,
            Direction::Short => snapshot.features.trend == 0,
        };
        let confidence_score = self.confidence(volume_ratio, orb.range, atr, trend_aligned);

        let breakout_level = match direction {
            Direction::Long => long_level,
            Direction::Short => short_level,
        };

        debug!(
            market = %snapshot.market,
            %direction,
            entry = price,
            stop = stop_loss,
            target = take_profit,
            confidence = confidence_score,
            "orb signal"
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
            context: SignalContext::Orb(OrbContext {
                box_high: orb.high,
                box_low: orb.low,
                box_range: orb.range,
                breakout_level,
                volume_ratio,
                volume_confirmed,
                trend_aligned,
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
            SignalContext::Orb(ctx) => ctx.volume_confirmed,
            _ => false,
        }
    }
}
