//! Liquidity sweep reversal strategy
//!
//! Watches for a brief excursion beyond a swing high/low (a liquidity
//! sweep) followed by a fast recovery on a volume spike, and trades the
//! reversal. Holds per-market transient state: detected sweep events live
//! in an arena keyed by market and expire by wall clock. All state is
//! touched only from the orchestrator's tick.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime};
use tracing::{debug, info};

use crate::config::SweepReversalConfig;
use crate::signals::{
    AbstainReason, Direction, EntryStrategy, MarketSnapshot, Signal, SignalContext,
    SignalPriority, StrategyOutcome, SweepContext,
};
use crate::time_utils::{in_any_window, TimeWindow};
use crate::types::{Candle, Market};

/// Neighbor buffer a swing must dominate on each side
const SWING_BUFFER: usize = 5;
/// Swing levels retained after strength filtering
const MAX_SWING_LEVELS: usize = 10;
/// Candles inspected for the recovery volume baseline
const VOLUME_LOOKBACK: usize = 10;
/// Window in which a second sweep of the same level is suppressed
const DUPLICATE_WINDOW_MINUTES: i64 = 30;
/// Sweep events older than this are discarded outright
const EVENT_MAX_AGE_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone)]
struct SwingLevel {
    price: f64,
    timestamp: DateTime<FixedOffset>,
    kind: SwingKind,
    strength: u32,
}

#[derive(Debug, Clone)]
struct SweepEvent {
    level_price: f64,
    level_kind: SwingKind,
    level_strength: u32,
    penetration_distance: f64,
    penetration_time: DateTime<FixedOffset>,
    recovery_time: Option<DateTime<FixedOffset>>,
    is_recovered: bool,
    volume_ratio: f64,
}

pub struct SweepReversalStrategy {
    config: SweepReversalConfig,
    active_windows: Vec<TimeWindow>,
    active_sweeps: HashMap<Market, Vec<SweepEvent>>,
}

impl SweepReversalStrategy {
    pub fn new(config: SweepReversalConfig) -> Self {
        // Mid-session sub-windows only; sweeps at the open are too noisy.
        let active_windows = vec![
            TimeWindow::new(
                NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 30, 0).unwrap(),
            )
            .expect("static window is well-formed"),
            TimeWindow::new(
                NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            )
            .expect("static window is well-formed"),
        ];

        Self {
            config,
            active_windows,
            active_sweeps: HashMap::new(),
        }
    }

    fn is_active(&self, now: DateTime<FixedOffset>) -> bool {
        self.config.use_strategy && in_any_window(now, &self.active_windows)
    }

    /// Phase 1: swing levels over the last `swing_lookback` candles.
    ///
    /// A swing high at index i is strictly greater than every high in
    /// [i-5, i+5] \ {i}; the buffer requirement means the last five candles
    /// can never qualify. Strength counts the ten neighbors respecting the
    /// level. Only the top half by strength survives, most recent first.
    fn identify_swing_levels(&self, candles: &[Candle]) -> Vec<SwingLevel> {
        if candles.len() < self.config.swing_lookback {
            return Vec::new();
        }

        let recent = &candles[candles.len() - self.config.swing_lookback..];
        let mut levels = Vec::new();

        for i in SWING_BUFFER..recent.len() - SWING_BUFFER {
            let candle = &recent[i];

            let is_swing_high = (i - SWING_BUFFER..=i + SWING_BUFFER)
                .filter(|&j| j != i)
                .all(|j| recent[j].high < candle.high);
            if is_swing_high {
                levels.push(SwingLevel {
                    price: candle.high,
                    timestamp: candle.timestamp,
                    kind: SwingKind::High,
                    strength: swing_strength(recent, i, SwingKind::High),
                });
            }

            let is_swing_low = (i - SWING_BUFFER..=i + SWING_BUFFER)
                .filter(|&j| j != i)
                .all(|j| recent[j].low > candle.low);
            if is_swing_low {
                levels.push(SwingLevel {
                    price: candle.low,
                    timestamp: candle.timestamp,
                    kind: SwingKind::Low,
                    strength: swing_strength(recent, i, SwingKind::Low),
                });
            }
        }

        if levels.is_empty() {
            return levels;
        }

        let mut strengths: Vec<u32> = levels.iter().map(|l| l.strength).collect();
        strengths.sort_unstable();
        let median = strengths[strengths.len() / 2];

        levels.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        levels.retain(|l| l.strength >= median);
        levels.truncate(MAX_SWING_LEVELS);
        levels
    }

    /// Phase 2: detect fresh sweep events, suppressing duplicates of an
    /// unresolved event at the same level within the duplicate window
    fn detect_sweeps(
        &mut self,
        market: &Market,
        levels: &[SwingLevel],
        price: f64,
        now: DateTime<FixedOffset>,
        atr: f64,
    ) {
        let threshold = self.config.penetration_atr_mult * atr;
        let existing = self.active_sweeps.entry(market.clone()).or_default();

        for level in levels {
            let (penetrated, distance) = match level.kind {
                SwingKind::High => (price > level.price + threshold, price - level.price),
                SwingKind::Low => (price < level.price - threshold, level.price - price),
            };
            if !penetrated {
                continue;
            }

            let duplicate = existing.iter().any(|sweep| {
                (sweep.level_price - level.price).abs() < 0.01
                    && sweep.level_kind == level.kind
                    && now - sweep.penetration_time
                        <= Duration::minutes(DUPLICATE_WINDOW_MINUTES)
            });
            if duplicate {
                continue;
            }

            info!(
                market = %market,
                level = level.price,
                kind = ?level.kind,
                penetration = distance,
                "sweep event detected"
            );
            existing.push(SweepEvent {
                level_price: level.price,
                level_kind: level.kind,
                level_strength: level.strength,
                penetration_distance: distance,
                penetration_time: now,
                recovery_time: None,
                is_recovered: false,
                volume_ratio: 0.0,
            });
        }
    }

    /// Phase 3: advance recoveries and collect events ready for a signal.
    /// Events past the recovery limit are discarded.
    fn update_sweeps(
        &mut self,
        market: &Market,
        price: f64,
        now: DateTime<FixedOffset>,
        current_volume: f64,
        recent_volumes: &[f64],
    ) -> Vec<SweepEvent> {
        let sweeps = match self.active_sweeps.get_mut(market) {
            Some(s) => s,
            None => return Vec::new(),
        };

        let limit = Duration::minutes(self.config.recovery_time_minutes);
        let mut ready = Vec::new();

        sweeps.retain_mut(|sweep| {
            if now - sweep.penetration_time > limit {
                return false;
            }

            if !sweep.is_recovered {
                let recovered = match sweep.level_kind {
                    SwingKind::High => price < sweep.level_price,
                    SwingKind::Low => price > sweep.level_price,
                };

                if recovered {
                    sweep.is_recovered = true;
                    sweep.recovery_time = Some(now);

                    let avg = if recent_volumes.is_empty() {
                        1.0
                    } else {
                        recent_volumes.iter().sum::<f64>() / recent_volumes.len() as f64
                    };
                    sweep.volume_ratio = if avg > 0.0 { current_volume / avg } else { 1.0 };

                    info!(
                        market = %market,
                        level = sweep.level_price,
                        volume_ratio = sweep.volume_ratio,
                        "sweep recovery detected"
                    );

                    if sweep.volume_ratio >= self.config.volume_spike_mult {
                        ready.push(sweep.clone());
                        return false;
                    }
                }
            }
            true
        });

        ready
    }

    /// Drop events past the hard age cap regardless of recovery state
    fn cleanup_expired(&mut self, market: &Market, now: DateTime<FixedOffset>) {
        if let Some(sweeps) = self.active_sweeps.get_mut(market) {
            sweeps.retain(|s| now - s.penetration_time <= Duration::hours(EVENT_MAX_AGE_HOURS));
        }
    }

    fn confidence(&self, sweep: &SweepEvent, time_to_recovery_minutes: f64) -> f64 {
        let limit = self.config.recovery_time_minutes as f64;
        let recovery_score = 0.3 * (1.0 - (time_to_recovery_minutes / limit).min(1.0));
        let volume_score = (sweep.volume_ratio / 4.0).min(0.3);
        let strength_score = (sweep.level_strength as f64 / 10.0).min(1.0) * 0.2;

        // Shallow penetrations are cleaner traps
        let penetration_ratio = if sweep.level_price > 0.0 {
            sweep.penetration_distance / sweep.level_price
        } else {
            1.0
        };
        let penetration_score = 0.2 * (1.0 - (penetration_ratio / 0.1).min(1.0));

        (recovery_score + volume_score + strength_score + penetration_score).min(1.0)
    }
}

/// Neighbors within the buffer that respect the candidate level
fn swing_strength(candles: &[Candle], center: usize, kind: SwingKind) -> u32 {
    let center_price = match kind {
        SwingKind::High => candles[center].high,
        SwingKind::Low => candles[center].low,
    };

    let mut strength = 0;
    for distance in 1..=SWING_BUFFER {
        if center >= distance {
            let left = &candles[center - distance];
            let respects = match kind {
                SwingKind::High => left.high <= center_price,
                SwingKind::Low => left.low >= center_price,
            };
            if respects {
                strength += 1;
            }
        }
        if center + distance < candles.len() {
            let right = &candles[center + distance];
            let respects = match kind {
                SwingKind::High => right.high <= center_price,
                SwingKind::Low => right.low >= center_price,
            };
            if respects {
                strength += 1;
            }
        }
    }
    strength
}

impl EntryStrategy for SweepReversalStrategy {
    fn name(&self) -> &'static str {
        "sweep_reversal"
    }

    fn priority(&self) -> SignalPriority {
        SignalPriority::Low
    }

    fn generate(&mut self, snapshot: &MarketSnapshot<'_>) -> StrategyOutcome {
        if !self.config.use_strategy {
            return StrategyOutcome::Abstain(AbstainReason::Disabled);
        }
        if !self.is_active(snapshot.now) {
            return StrategyOutcome::Abstain(AbstainReason::OutsideActiveWindow);
        }

        self.cleanup_expired(snapshot.market, snapshot.now);

        let levels = self.identify_swing_levels(snapshot.candles);
        if levels.is_empty() && !self.active_sweeps.contains_key(snapshot.market) {
            return StrategyOutcome::Abstain(AbstainReason::InsufficientData);
        }

        self.detect_sweeps(
            snapshot.market,
            &levels,
            snapshot.current_price,
            snapshot.now,
            snapshot.features.atr_14,
        );

        let lookback = snapshot.candles.len().min(VOLUME_LOOKBACK);
        let recent_volumes: Vec<f64> = snapshot.candles[snapshot.candles.len() - lookback..]
            .iter()
            .map(|c| c.volume)
            .collect();

        let ready = self.update_sweeps(
            snapshot.market,
            snapshot.current_price,
            snapshot.now,
            snapshot.current_volume,
            &recent_volumes,
        );

        let best = match ready.into_iter().max_by(|a, b| {
            a.volume_ratio
                .partial_cmp(&b.volume_ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) {
            Some(sweep) => sweep,
            None => return StrategyOutcome::Abstain(AbstainReason::NoSweepRecovered),
        };

        // Swept low means trapped sellers: buy the reversal. Mirror for highs.
        let direction = match best.level_kind {
            SwingKind::Low => Direction::Long,
            SwingKind::High => Direction::Short,
        };

        let atr = snapshot.features.atr_14;
        let price = snapshot.current_price;
        let target_distance = (2.0 * atr).max(2.0 * best.penetration_distance);
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (best.level_price - 0.5 * atr, price + target_distance),
            Direction::Short => (best.level_price + 0.5 * atr, price - target_distance),
        };

        let (risk_amount, reward_amount, risk_reward_ratio) =
            Signal::risk_metrics(direction, price, stop_loss, take_profit);

        let time_to_recovery = (best
            .recovery_time
            .expect("ready events are recovered")
            - best.penetration_time)
            .num_seconds() as f64
            / 60.0;
        let confidence_score = self.confidence(&best, time_to_recovery);

        debug!(
            market = %snapshot.market,
            %direction,
            swept_level = best.level_price,
            time_to_recovery,
            volume_ratio = best.volume_ratio,
            confidence = confidence_score,
            "sweep reversal signal"
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
            context: SignalContext::SweepReversal(SweepContext {
                swept_level: best.level_price,
                swing_strength: best.level_strength,
                penetration_distance: best.penetration_distance,
                time_to_recovery_minutes: time_to_recovery,
                volume_ratio: best.volume_ratio,
                recovered: best.is_recovered,
            }),
        }))
    }

    fn validate(&self, signal: &Signal) -> bool {
        if signal.confidence_score < self.config.min_confidence {
            return false;
        }
        if signal.risk_reward_ratio < self.config.min_risk_reward {
            return false;
        }
        match &signal.context {
            SignalContext::SweepReversal(ctx) => {
                if !ctx.recovered {
                    return false;
                }
                if ctx.volume_ratio < self.config.volume_spike_mult {
                    return false;
                }
                // Only fresh recoveries qualify
                ctx.time_to_recovery_minutes
                    <= self.config.recovery_time_minutes as f64 * 0.8
            }
            _ => false,
        }
    }
}
