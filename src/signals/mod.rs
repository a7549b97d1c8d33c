//! Entry signal strategies and their shared vocabulary
//!
//! Every strategy consumes the same per-tick snapshot (candles, live
//! price/volume, feature vector) and either emits a typed signal or
//! abstains with a bounded reason. Downstream consumers — the manager,
//! risk guard and executor — touch only the common signal prefix; the
//! strategy-specific context rides along for diagnostics.

pub mod manager;
pub mod orb;
pub mod svwap;
pub mod sweep;

pub use manager::SignalManager;
pub use orb::OrbStrategy;
pub use svwap::SvwapPullbackStrategy;
pub use sweep::SweepReversalStrategy;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::data::FeatureVector;
use crate::types::{Candle, Market, Side};

/// Trade direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn entry_side(self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Static priority of a strategy's signals; lower value wins conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SignalPriority {
    High = 1,
    Medium = 2,
    Low = 3,
}

/// Opening-range context attached to ORB signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrbContext {
    pub box_high: f64,
    pub box_low: f64,
    pub box_range: f64,
    pub breakout_level: f64,
    pub volume_ratio: f64,
    pub volume_confirmed: bool,
    pub trend_aligned: bool,
}

/// Pullback context attached to sVWAP signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvwapContext {
    pub svwap: f64,
    pub zone_upper: f64,
    pub zone_lower: f64,
    pub recent_high: f64,
    pub recent_low: f64,
    pub pullback_pct: f64,
    pub ema_aligned: bool,
    pub volume_confirmed: bool,
}

/// Sweep-event context attached to sweep reversal signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepContext {
    pub swept_level: f64,
    pub swing_strength: u32,
    pub penetration_distance: f64,
    pub time_to_recovery_minutes: f64,
    pub volume_ratio: f64,
    pub recovered: bool,
}

/// Strategy-specific context, the tagged part of the signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SignalContext {
    Orb(OrbContext),
    SvwapPullback(SvwapContext),
    SweepReversal(SweepContext),
}

impl SignalContext {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            SignalContext::Orb(_) => "orb",
            SignalContext::SvwapPullback(_) => "svwap_pullback",
            SignalContext::SweepReversal(_) => "sweep_reversal",
        }
    }

    pub fn priority(&self) -> SignalPriority {
        match self {
            SignalContext::Orb(_) => SignalPriority::High,
            SignalContext::SvwapPullback(_) => SignalPriority::Medium,
            SignalContext::SweepReversal(_) => SignalPriority::Low,
        }
    }
}

/// An entry signal. The common prefix (market, direction, levels, risk
/// metrics, confidence) is all that execution consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub market: Market,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_amount: f64,
    pub reward_amount: f64,
    pub risk_reward_ratio: f64,
    pub confidence_score: f64,
    pub timestamp: DateTime<FixedOffset>,
    pub context: SignalContext,
}

impl Signal {
    /// Risk and reward per unit, derived from entry vs. levels
    pub fn risk_metrics(
        direction: Direction,
        entry: f64,
        stop: f64,
        target: f64,
    ) -> (f64, f64, f64) {
        let (risk, reward) = match direction {
            Direction::Long => (entry - stop, target - entry),
            Direction::Short => (stop - entry, entry - target),
        };
        let rr = if risk > 0.0 { reward / risk } else { 0.0 };
        (risk, reward, rr)
    }

    /// Stable label like "orb_long" used for order references and logs
    pub fn kind_label(&self) -> String {
        format!("{}_{}", self.context.strategy_name(), self.direction)
    }
}

/// Bounded reasons a strategy declines to emit on a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstainReason {
    Disabled,
    OutsideActiveWindow,
    InsufficientData,
    NoSetup,
    OutsideEntryZone,
    InvalidPullback,
    DirectionUnresolved,
    VolumeUnconfirmed,
    EmaMisaligned,
    NoSweepRecovered,
}

impl std::fmt::Display for AbstainReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbstainReason::Disabled => "strategy disabled",
            AbstainReason::OutsideActiveWindow => "outside active window",
            AbstainReason::InsufficientData => "insufficient data",
            AbstainReason::NoSetup => "no setup",
            AbstainReason::OutsideEntryZone => "price outside entry zone",
            AbstainReason::InvalidPullback => "pullback outside valid range",
            AbstainReason::DirectionUnresolved => "no valid signal direction",
            AbstainReason::VolumeUnconfirmed => "volume not confirmed",
            AbstainReason::EmaMisaligned => "ema alignment failed",
            AbstainReason::NoSweepRecovered => "no recovered sweep event",
        };
        write!(f, "{}", s)
    }
}

/// What a strategy returns for a tick: a signal or an explicit abstention.
/// The manager aggregates these without swallowing anything.
#[derive(Debug, Clone)]
pub enum StrategyOutcome {
    Emit(Box<Signal>),
    Abstain(AbstainReason),
}

impl StrategyOutcome {
    pub fn signal(self) -> Option<Signal> {
        match self {
            StrategyOutcome::Emit(signal) => Some(*signal),
            StrategyOutcome::Abstain(_) => None,
        }
    }
}

/// Consistent per-market view for one tick. Every strategy invoked in the
/// tick sees the same candle batch and feature vector.
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot<'a> {
    pub market: &'a Market,
    pub candles: &'a [Candle],
    pub current_price: f64,
    pub current_volume: f64,
    pub features: &'a FeatureVector,
    pub now: DateTime<FixedOffset>,
}

/// Entry strategy contract shared by ORB, sVWAP pullback and sweep reversal
pub trait EntryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> SignalPriority;

    /// Evaluate the snapshot, emitting a signal or abstaining.
    /// Only the sweep strategy keeps per-market state across calls.
    fn generate(&mut self, snapshot: &MarketSnapshot<'_>) -> StrategyOutcome;

    /// Quality gate applied before a signal may reach the risk guard
    fn validate(&self, signal: &Signal) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_utils::kst_now;

    #[test]
    fn test_risk_metrics_long() {
        let (risk, reward, rr) = Signal::risk_metrics(Direction::Long, 100.0, 95.0, 110.0);
        assert_eq!(risk, 5.0);
        assert_eq!(reward, 10.0);
        assert_eq!(rr, 2.0);
    }

    #[test]
    fn test_risk_metrics_short() {
        let (risk, reward, rr) = Signal::risk_metrics(Direction::Short, 100.0, 105.0, 90.0);
        assert_eq!(risk, 5.0);
        assert_eq!(reward, 10.0);
        assert_eq!(rr, 2.0);
    }

    #[test]
    fn test_risk_metrics_zero_risk_yields_zero_rr() {
        let (_, _, rr) = Signal::risk_metrics(Direction::Long, 100.0, 100.0, 110.0);
        assert_eq!(rr, 0.0);
    }

    #[test]
    fn test_context_priorities() {
        let orb = SignalContext::Orb(OrbContext {
            box_high: 0.0,
            box_low: 0.0,
            box_range: 0.0,
            breakout_level: 0.0,
            volume_ratio: 0.0,
            volume_confirmed: false,
            trend_aligned: false,
        });
        assert_eq!(orb.priority(), SignalPriority::High);
        assert_eq!(orb.strategy_name(), "orb");
        assert!(SignalPriority::High < SignalPriority::Medium);
        assert!(SignalPriority::Medium < SignalPriority::Low);
    }

    #[test]
    fn test_kind_label() {
        let signal = Signal {
            market: Market::new("KRW-BTC"),
            direction: Direction::Short,
            entry_price: 100.0,
            stop_loss: 105.0,
            take_profit: 90.0,
            risk_amount: 5.0,
            reward_amount: 10.0,
            risk_reward_ratio: 2.0,
            confidence_score: 0.8,
            timestamp: kst_now(),
            context: SignalContext::SweepReversal(SweepContext {
                swept_level: 101.0,
                swing_strength: 7,
                penetration_distance: 0.5,
                time_to_recovery_minutes: 5.0,
                volume_ratio: 2.4,
                recovered: true,
            }),
        };
        assert_eq!(signal.kind_label(), "sweep_reversal_short");
    }
}
