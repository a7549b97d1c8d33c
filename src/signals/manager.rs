//! Signal manager
//!
//! Invokes every enabled strategy on the shared snapshot, drops invalid
//! signals, detects direction and overlap conflicts, resolves by priority
//! then confidence, and hands back the single best signal. A per-market
//! ring buffer of recent signals is retained for diagnostics; it is only
//! mutated during generation.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Config, SignalsConfig};
use crate::signals::{
    EntryStrategy, MarketSnapshot, OrbStrategy, Signal, SignalPriority, StrategyOutcome,
    SvwapPullbackStrategy, SweepReversalStrategy,
};
use crate::time_utils::TimeWindow;
use crate::types::Market;

/// Recent-signal retention window
const RECENT_WINDOW_MINUTES: i64 = 60;
/// Hard cap on retained history per market
const HISTORY_CAP: usize = 1000;
/// Entry prices within this band count as overlapping setups
const OVERLAP_BAND_PCT: f64 = 1.0;

/// A generated signal with its validation verdict, kept for diagnostics
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub signal: Signal,
    pub strategy: &'static str,
    pub priority: SignalPriority,
    pub timestamp: DateTime<FixedOffset>,
    pub is_valid: bool,
}

/// Aggregated counters over the retained history
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalStatistics {
    pub total_signals: usize,
    pub valid_signals: usize,
    pub by_strategy: HashMap<String, (usize, usize)>,
    pub recent_signals: usize,
}

pub struct SignalManager {
    strategies: Vec<Box<dyn EntryStrategy>>,
    recent: HashMap<Market, Vec<SignalRecord>>,
    history: HashMap<Market, Vec<SignalRecord>>,
}

impl SignalManager {
    pub fn new(config: &Config) -> Self {
        Self::with_signals_config(&config.signals, config.session_windows())
    }

    pub fn with_signals_config(
        signals: &SignalsConfig,
        session_windows: Vec<TimeWindow>,
    ) -> Self {
        let mut strategies: Vec<Box<dyn EntryStrategy>> = Vec::new();
        if signals.orb.use_strategy {
            strategies.push(Box::new(OrbStrategy::new(signals.orb.clone())));
        }
        if signals.svwap_pullback.use_strategy {
            strategies.push(Box::new(SvwapPullbackStrategy::new(
                signals.svwap_pullback.clone(),
                session_windows,
            )));
        }
        if signals.sweep_reversal.use_strategy {
            strategies.push(Box::new(SweepReversalStrategy::new(
                signals.sweep_reversal.clone(),
            )));
        }

        Self {
            strategies,
            recent: HashMap::new(),
            history: HashMap::new(),
        }
    }

    /// Run every strategy against the snapshot and record the outcomes
    fn generate(&mut self, snapshot: &MarketSnapshot<'_>) -> Vec<SignalRecord> {
        let mut records = Vec::new();

        for strategy in &mut self.strategies {
            let name = strategy.name();
            let priority = strategy.priority();
            match strategy.generate(snapshot) {
                StrategyOutcome::Emit(signal) => {
                    let is_valid = strategy.validate(&signal);
                    debug!(
                        market = %snapshot.market,
                        strategy = name,
                        kind = signal.kind_label(),
                        confidence = signal.confidence_score,
                        is_valid,
                        "strategy emitted signal"
                    );
                    records.push(SignalRecord {
                        signal: *signal,
                        strategy: name,
                        priority,
                        timestamp: snapshot.now,
                        is_valid,
                    });
                }
                StrategyOutcome::Abstain(reason) => {
                    debug!(
                        market = %snapshot.market,
                        strategy = name,
                        %reason,
                        "strategy abstained"
                    );
                }
            }
        }

        self.retain_records(snapshot.market, &records, snapshot.now);
        records
    }

    /// Push new records into the ring buffer, rolling expired entries into
    /// the capped history
    fn retain_records(
        &mut self,
        market: &Market,
        records: &[SignalRecord],
        now: DateTime<FixedOffset>,
    ) {
        let recent = self.recent.entry(market.clone()).or_default();
        recent.extend(records.iter().cloned());

        let cutoff = now - Duration::minutes(RECENT_WINDOW_MINUTES);
        let history = self.history.entry(market.clone()).or_default();
        let (expired, live): (Vec<SignalRecord>, Vec<SignalRecord>) =
            recent.drain(..).partition(|r| r.timestamp < cutoff);
        history.extend(expired);
        *recent = live;

        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_CAP;
            history.drain(..excess);
        }
    }

    /// Indices of records involved in a direction or overlap conflict
    fn conflicted_indices(records: &[SignalRecord]) -> Vec<usize> {
        let mut conflicted = vec![false; records.len()];

        for i in 0..records.len() {
            for j in i + 1..records.len() {
                let a = &records[i].signal;
                let b = &records[j].signal;

                let direction_conflict = a.direction != b.direction;

                let avg_entry = (a.entry_price + b.entry_price) / 2.0;
                let overlap = avg_entry > 0.0
                    && (a.entry_price - b.entry_price).abs() / avg_entry * 100.0
                        < OVERLAP_BAND_PCT;

                if direction_conflict || overlap {
                    conflicted[i] = true;
                    conflicted[j] = true;
                }
            }
        }

        conflicted
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| c.then_some(i))
            .collect()
    }

    /// Resolve conflicts: highest priority wins, confidence breaks ties.
    /// Non-conflicted records pass through untouched.
    fn resolve(records: Vec<SignalRecord>) -> Vec<SignalRecord> {
        let conflicted = Self::conflicted_indices(&records);
        if conflicted.is_empty() {
            return Self::prioritize(records);
        }

        let mut winner: Option<&SignalRecord> = None;
        for &i in &conflicted {
            let candidate = &records[i];
            winner = match winner {
                None => Some(candidate),
                Some(current) => {
                    let better = candidate.priority < current.priority
                        || (candidate.priority == current.priority
                            && candidate.signal.confidence_score
                                > current.signal.confidence_score);
                    if better {
                        Some(candidate)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        if let Some(w) = winner {
            info!(
                strategy = w.strategy,
                confidence = w.signal.confidence_score,
                conflicted = conflicted.len(),
                "signal conflict resolved"
            );
        }

        let winner = winner.cloned();
        let mut resolved: Vec<SignalRecord> = records
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| (!conflicted.contains(&i)).then_some(r))
            .collect();
        resolved.extend(winner);

        Self::prioritize(resolved)
    }

    /// Order by priority asc, confidence desc, timestamp asc
    fn prioritize(mut records: Vec<SignalRecord>) -> Vec<SignalRecord> {
        records.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(
                    b.signal
                        .confidence_score
                        .partial_cmp(&a.signal.confidence_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.timestamp.cmp(&b.timestamp))
        });
        records
    }

    /// The single best valid signal for this market and tick, if any
    pub fn best_signal(&mut self, snapshot: &MarketSnapshot<'_>) -> Option<Signal> {
        let records = self.generate(snapshot);
        if records.is_empty() {
            return None;
        }

        let valid: Vec<SignalRecord> = records.into_iter().filter(|r| r.is_valid).collect();
        if valid.is_empty() {
            debug!(market = %snapshot.market, "no valid signals this tick");
            return None;
        }

        let resolved = Self::resolve(valid);
        let best = resolved.into_iter().next()?;

        info!(
            market = %snapshot.market,
            strategy = best.strategy,
            kind = best.signal.kind_label(),
            confidence = best.signal.confidence_score,
            entry = best.signal.entry_price,
            "best signal selected"
        );
        Some(best.signal)
    }

    /// Counters over retained history plus the live ring buffer
    pub fn statistics(&self) -> SignalStatistics {
        let mut stats = SignalStatistics::default();

        for records in self.history.values() {
            for record in records {
                stats.total_signals += 1;
                if record.is_valid {
                    stats.valid_signals += 1;
                }
                let entry = stats
                    .by_strategy
                    .entry(record.strategy.to_string())
                    .or_default();
                entry.0 += 1;
                if record.is_valid {
                    entry.1 += 1;
                }
            }
        }
        stats.recent_signals = self.recent.values().map(|v| v.len()).sum();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{
        Direction, OrbContext, SignalContext, SvwapContext,
    };
    use crate::time_utils::{kst, kst_now};
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<FixedOffset> {
        kst()
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 3, 4)
                    .unwrap()
                    .and_hms_opt(h, m, 0)
                    .unwrap(),
            )
            .unwrap()
    }

    fn orb_record(direction: Direction, entry: f64, confidence: f64) -> SignalRecord {
        let (stop, target) = match direction {
            Direction::Long => (entry * 0.98, entry * 1.04),
            Direction::Short => (entry * 1.02, entry * 0.96),
        };
        let (risk, reward, rr) = Signal::risk_metrics(direction, entry, stop, target);
        SignalRecord {
            signal: Signal {
                market: Market::new("KRW-BTC"),
                direction,
                entry_price: entry,
                stop_loss: stop,
                take_profit: target,
                risk_amount: risk,
                reward_amount: reward,
                risk_reward_ratio: rr,
                confidence_score: confidence,
                timestamp: at(10, 30),
                context: SignalContext::Orb(OrbContext {
                    box_high: entry * 1.01,
                    box_low: entry * 0.99,
                    box_range: entry * 0.02,
                    breakout_level: entry * 1.012,
                    volume_ratio: 2.0,
                    volume_confirmed: true,
                    trend_aligned: true,
                }),
            },
            strategy: "orb",
            priority: SignalPriority::High,
            timestamp: at(10, 30),
            is_valid: true,
        }
    }

    fn svwap_record(direction: Direction, entry: f64, confidence: f64) -> SignalRecord {
        let (stop, target) = match direction {
            Direction::Long => (entry * 0.98, entry * 1.04),
            Direction::Short => (entry * 1.02, entry * 0.96),
        };
        let (risk, reward, rr) = Signal::risk_metrics(direction, entry, stop, target);
        SignalRecord {
            signal: Signal {
                market: Market::new("KRW-BTC"),
                direction,
                entry_price: entry,
                stop_loss: stop,
                take_profit: target,
                risk_amount: risk,
                reward_amount: reward,
                risk_reward_ratio: rr,
                confidence_score: confidence,
                timestamp: at(10, 31),
                context: SignalContext::SvwapPullback(SvwapContext {
                    svwap: entry,
                    zone_upper: entry * 1.002,
                    zone_lower: entry * 0.998,
                    recent_high: entry * 1.01,
                    recent_low: entry * 0.99,
                    pullback_pct: 1.0,
                    ema_aligned: true,
                    volume_confirmed: true,
                }),
            },
            strategy: "svwap_pullback",
            priority: SignalPriority::Medium,
            timestamp: at(10, 31),
            is_valid: true,
        }
    }

    #[test]
    fn test_direction_conflict_resolved_by_priority() {
        // ORB long vs sVWAP short on the same market: ORB (HIGH) wins
        let records = vec![
            orb_record(Direction::Long, 100_000.0, 0.65),
            svwap_record(Direction::Short, 100_000.0, 0.9),
        ];
        let resolved = SignalManager::resolve(records);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].strategy, "orb");
        assert_eq!(resolved[0].signal.direction, Direction::Long);
    }

    #[test]
    fn test_overlap_conflict_same_direction() {
        // Entries 0.5% apart, same direction: still a conflict set
        let records = vec![
            orb_record(Direction::Long, 100_000.0, 0.65),
            svwap_record(Direction::Long, 100_500.0, 0.9),
        ];
        let resolved = SignalManager::resolve(records);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].strategy, "orb");
    }

    #[test]
    fn test_priority_tie_broken_by_confidence() {
        let weak = orb_record(Direction::Long, 100_000.0, 0.62);
        let strong = orb_record(Direction::Short, 100_000.0, 0.85);
        let resolved = SignalManager::resolve(vec![weak, strong]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].signal.direction, Direction::Short);
    }

    #[test]
    fn test_non_conflicting_signals_pass_through() {
        // Same direction, entries 5% apart: no conflict, both survive,
        // ordered by priority
        let records = vec![
            svwap_record(Direction::Long, 105_000.0, 0.9),
            orb_record(Direction::Long, 100_000.0, 0.65),
        ];
        let resolved = SignalManager::resolve(records);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].strategy, "orb");
        assert_eq!(resolved[1].strategy, "svwap_pullback");
    }

    #[test]
    fn test_ring_buffer_rolls_to_history() {
        let config = Config::default();
        let mut manager = SignalManager::new(&config);
        let market = Market::new("KRW-BTC");

        let old = {
            let mut r = orb_record(Direction::Long, 100_000.0, 0.7);
            r.timestamp = kst_now() - Duration::minutes(120);
            r
        };
        manager.retain_records(&market, &[old], kst_now() - Duration::minutes(119));
        assert_eq!(manager.recent.get(&market).unwrap().len(), 1);

        // Next retention pass with current time expires it into history
        manager.retain_records(&market, &[], kst_now());
        assert!(manager.recent.get(&market).unwrap().is_empty());
        assert_eq!(manager.history.get(&market).unwrap().len(), 1);

        let stats = manager.statistics();
        assert_eq!(stats.total_signals, 1);
        assert_eq!(stats.valid_signals, 1);
    }

    #[test]
    fn test_history_capped() {
        let config = Config::default();
        let mut manager = SignalManager::new(&config);
        let market = Market::new("KRW-BTC");

        let mut bulk = Vec::new();
        for _ in 0..(HISTORY_CAP + 50) {
            let mut r = orb_record(Direction::Long, 100_000.0, 0.7);
            r.timestamp = kst_now() - Duration::minutes(120);
            bulk.push(r);
        }
        manager.retain_records(&market, &bulk, kst_now());
        assert_eq!(manager.history.get(&market).unwrap().len(), HISTORY_CAP);
    }
}
