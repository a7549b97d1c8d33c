//! Risk guard
//!
//! Stateful gatekeeper in front of the executor: tracks the account
//! balance and daily P&L, sizes positions, enforces the daily drawdown
//! limit and per-market consecutive-loss bans, and approves or rejects
//! every trade. Critical transitions surface as [`RiskAlert`] values the
//! orchestrator forwards to the notifier; the guard itself never does I/O
//! beyond the persistence flush.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::signals::Signal;
use crate::store::StateStore;
use crate::types::Market;

/// Risk metrics computed for a prospective trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRisk {
    pub market: Market,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub position_size: f64,
    pub risk_amount: f64,
    pub risk_percentage: f64,
    pub reward_amount: f64,
    pub risk_reward_ratio: f64,
    pub max_position_value: f64,
}

/// Daily risk tracking; exactly one active record per trading date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRisk {
    pub date: NaiveDate,
    pub starting_balance: f64,
    pub current_balance: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub max_daily_loss: f64,
    pub trades_today: u32,
    pub losing_trades_today: u32,
    pub is_ddl_hit: bool,
}

impl DailyRisk {
    fn new(date: NaiveDate, balance: f64, ddl_pct: f64) -> Self {
        DailyRisk {
            date,
            starting_balance: balance,
            current_balance: balance,
            daily_pnl: 0.0,
            daily_pnl_pct: 0.0,
            max_daily_loss: balance * ddl_pct,
            trades_today: 0,
            losing_trades_today: 0,
            is_ddl_hit: false,
        }
    }
}

/// Per-market risk tracking; one record per market ever traded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRisk {
    pub market: Market,
    pub consecutive_losses: u32,
    pub last_loss_date: Option<NaiveDate>,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub is_banned: bool,
    pub ban_expiry_date: Option<NaiveDate>,
}

impl MarketRisk {
    fn new(market: Market) -> Self {
        MarketRisk {
            market,
            consecutive_losses: 0,
            last_loss_date: None,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            is_banned: false,
            ban_expiry_date: None,
        }
    }
}

/// Outcome of a trade risk assessment
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub is_allowed: bool,
    pub trade_risk: Option<TradeRisk>,
    pub rejection_reasons: Vec<String>,
    pub warnings: Vec<String>,
}

/// Critical risk transitions the orchestrator forwards to the notifier
#[derive(Debug, Clone, PartialEq)]
pub enum RiskAlert {
    DailyDrawdownLimit { daily_pnl: f64, daily_pnl_pct: f64 },
    MarketBanned {
        market: Market,
        consecutive_losses: u32,
        ban_expiry: NaiveDate,
    },
}

/// Serializable snapshot of guard state for the status surface
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub current_balance: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub ddl_hit: bool,
    pub trades_today: u32,
    pub losing_trades_today: u32,
    pub banned_markets: Vec<Market>,
    pub at_risk_markets: Vec<Market>,
    pub markets_traded: usize,
}

pub struct RiskGuard {
    config: RiskConfig,
    store: StateStore,
    current_balance: f64,
    daily_risk: Option<DailyRisk>,
    market_risks: HashMap<Market, MarketRisk>,
}

impl RiskGuard {
    /// Build the guard, restoring persisted daily and per-market state.
    /// Corrupt or missing files start empty.
    pub fn new(config: RiskConfig, store: StateStore) -> Self {
        let daily_risk: Option<DailyRisk> = store.load("daily_risk");
        let market_risks: HashMap<Market, MarketRisk> =
            store.load("market_risk").unwrap_or_default();
        let current_balance = daily_risk.as_ref().map(|d| d.current_balance).unwrap_or(0.0);

        Self {
            config,
            store,
            current_balance,
            daily_risk,
            market_risks,
        }
    }

    fn persist(&self) {
        if let Some(daily) = &self.daily_risk {
            self.store.save("daily_risk", daily);
        }
        self.store.save("market_risk", &self.market_risks);
    }

    pub fn current_balance(&self) -> f64 {
        self.current_balance
    }

    pub fn daily_risk(&self) -> Option<&DailyRisk> {
        self.daily_risk.as_ref()
    }

    pub fn ddl_hit(&self) -> bool {
        self.daily_risk.as_ref().map(|d| d.is_ddl_hit).unwrap_or(false)
    }

    /// Update the account balance. A date change rolls over into a fresh
    /// daily record; otherwise daily P&L is recomputed and the drawdown
    /// limit checked. The DDL alert fires exactly once per day.
    pub fn update_account_balance(&mut self, balance: f64, today: NaiveDate) -> Option<RiskAlert> {
        let previous = self.current_balance;
        self.current_balance = balance;
        let mut alert = None;

        let needs_rollover = self
            .daily_risk
            .as_ref()
            .map(|d| d.date != today)
            .unwrap_or(true);

        if needs_rollover {
            self.daily_risk = Some(DailyRisk::new(
                today,
                balance,
                self.config.daily_drawdown_stop_pct,
            ));
            info!(date = %today, starting_balance = balance, "new trading day started");
        } else {
            let daily = self.daily_risk.as_mut().expect("rollover checked above");
            daily.current_balance = balance;
            daily.daily_pnl = balance - daily.starting_balance;
            daily.daily_pnl_pct = if daily.starting_balance > 0.0 {
                daily.daily_pnl / daily.starting_balance
            } else {
                0.0
            };

            if daily.daily_pnl_pct <= -self.config.daily_drawdown_stop_pct && !daily.is_ddl_hit {
                daily.is_ddl_hit = true;
                warn!(
                    daily_pnl = daily.daily_pnl,
                    daily_pnl_pct = daily.daily_pnl_pct,
                    "daily drawdown limit hit, trading suspended for today"
                );
                alert = Some(RiskAlert::DailyDrawdownLimit {
                    daily_pnl: daily.daily_pnl,
                    daily_pnl_pct: daily.daily_pnl_pct,
                });
            }
        }

        self.persist();
        debug!(
            previous_balance = previous,
            current_balance = balance,
            "account balance updated"
        );
        alert
    }

    /// Size a position off the stop distance and clamp its notional.
    ///
    /// Returns None when the balance is unset or the stop sits on the
    /// entry (no defined risk per unit).
    pub fn calculate_position_size(
        &self,
        entry_price: f64,
        stop_loss: f64,
        risk_percentage: Option<f64>,
    ) -> Option<(f64, f64)> {
        let risk_pct = risk_percentage.unwrap_or(self.config.per_trade_risk_pct);

        if self.current_balance <= 0.0 {
            warn!("cannot size position: balance not set");
            return None;
        }

        let risk_per_unit = (entry_price - stop_loss).abs();
        if risk_per_unit <= 0.0 {
            warn!(entry_price, stop_loss, "cannot size position: zero stop distance");
            return None;
        }

        let max_risk = self.current_balance * risk_pct;
        let mut size = max_risk / risk_per_unit;

        let notional = size * entry_price;
        if notional < self.config.min_position_krw {
            size = self.config.min_position_krw / entry_price;
        } else if notional > self.config.max_position_krw {
            size = self.config.max_position_krw / entry_price;
        }

        let actual_risk = size * risk_per_unit;
        debug!(
            entry_price,
            stop_loss,
            size,
            actual_risk,
            "position sized"
        );
        Some((size, actual_risk))
    }

    /// Assess a prospective trade. Expired bans are auto-cleared here.
    pub fn assess_trade_risk(
        &mut self,
        market: &Market,
        signal: &Signal,
        custom_risk_pct: Option<f64>,
        today: NaiveDate,
    ) -> RiskAssessment {
        let mut rejection_reasons = Vec::new();
        let mut warnings = Vec::new();

        if self.daily_risk.is_none() {
            self.update_account_balance(self.current_balance, today);
        }

        if self.ddl_hit() {
            let pct = self.daily_risk.as_ref().map(|d| d.daily_pnl_pct).unwrap_or(0.0);
            rejection_reasons.push(format!("daily drawdown limit hit ({:.2}%)", pct * 100.0));
        }

        let market_risk = self
            .market_risks
            .entry(market.clone())
            .or_insert_with(|| MarketRisk::new(market.clone()));

        if market_risk.is_banned {
            let expired = market_risk
                .ban_expiry_date
                .map(|expiry| today >= expiry)
                .unwrap_or(false);
            if expired {
                market_risk.is_banned = false;
                market_risk.ban_expiry_date = None;
                market_risk.consecutive_losses = 0;
                info!(market = %market, "market ban expired, cleared");
            } else {
                rejection_reasons.push(format!(
                    "market {} banned after consecutive losses",
                    market
                ));
            }
        }

        if self.current_balance <= 0.0 {
            rejection_reasons.push("account balance not available".to_string());
        }

        let consecutive_losses = self.market_risks[market].consecutive_losses;

        let mut trade_risk = None;
        if rejection_reasons.is_empty() {
            match self.calculate_position_size(
                signal.entry_price,
                signal.stop_loss,
                custom_risk_pct,
            ) {
                Some((position_size, risk_amount)) => {
                    let position_value = position_size * signal.entry_price;
                    let risk_percentage = if self.current_balance > 0.0 {
                        risk_amount / self.current_balance * 100.0
                    } else {
                        0.0
                    };
                    let reward_amount =
                        (signal.take_profit - signal.entry_price).abs() * position_size;
                    let risk_reward_ratio = if risk_amount > 0.0 {
                        reward_amount / risk_amount
                    } else {
                        0.0
                    };

                    if risk_reward_ratio < self.config.min_risk_reward_ratio {
                        rejection_reasons
                            .push(format!("poor risk-reward ratio: {:.2}", risk_reward_ratio));
                    }

                    if position_value >= self.config.max_position_krw {
                        warnings.push(format!(
                            "position capped at maximum {:.0} KRW",
                            self.config.max_position_krw
                        ));
                    } else if position_value <= self.config.min_position_krw {
                        warnings.push(format!(
                            "position raised to minimum {:.0} KRW",
                            self.config.min_position_krw
                        ));
                    }

                    if consecutive_losses >= 1 {
                        warnings.push(format!(
                            "market has {} consecutive losses",
                            consecutive_losses
                        ));
                    }

                    trade_risk = Some(TradeRisk {
                        market: market.clone(),
                        entry_price: signal.entry_price,
                        stop_loss: signal.stop_loss,
                        position_size,
                        risk_amount,
                        risk_percentage,
                        reward_amount,
                        risk_reward_ratio,
                        max_position_value: position_value,
                    });
                }
                None => {
                    rejection_reasons.push("position sizing failed".to_string());
                }
            }
        }

        let is_allowed = rejection_reasons.is_empty();
        info!(
            market = %market,
            is_allowed,
            reasons = rejection_reasons.join("; "),
            warnings = warnings.join("; "),
            "trade risk assessed"
        );

        self.persist();
        RiskAssessment {
            is_allowed,
            trade_risk,
            rejection_reasons,
            warnings,
        }
    }

    /// Record a completed trade. Losses accumulate toward the per-market
    /// ban; wins reset the streak. The balance update runs last so the
    /// DDL check sees the post-trade balance.
    pub fn record_trade_result(
        &mut self,
        market: &Market,
        is_winning_trade: bool,
        pnl: f64,
        today: NaiveDate,
    ) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        if let Some(daily) = self.daily_risk.as_mut() {
            daily.trades_today += 1;
            if !is_winning_trade {
                daily.losing_trades_today += 1;
            }
        }

        let market_risk = self
            .market_risks
            .entry(market.clone())
            .or_insert_with(|| MarketRisk::new(market.clone()));
        market_risk.total_trades += 1;

        if is_winning_trade {
            market_risk.winning_trades += 1;
            market_risk.consecutive_losses = 0;
        } else {
            market_risk.losing_trades += 1;
            market_risk.consecutive_losses += 1;
            market_risk.last_loss_date = Some(today);

            if market_risk.consecutive_losses >= self.config.same_symbol_consecutive_losses_stop {
                market_risk.is_banned = true;
                let ban_expiry = today + chrono::Duration::days(1);
                market_risk.ban_expiry_date = Some(ban_expiry);
                warn!(
                    market = %market,
                    consecutive_losses = market_risk.consecutive_losses,
                    %ban_expiry,
                    "market banned after consecutive losses"
                );
                alerts.push(RiskAlert::MarketBanned {
                    market: market.clone(),
                    consecutive_losses: market_risk.consecutive_losses,
                    ban_expiry,
                });
            }
        }

        let new_balance = self.current_balance + pnl;
        if let Some(alert) = self.update_account_balance(new_balance, today) {
            alerts.push(alert);
        }

        self.persist();
        info!(
            market = %market,
            is_winning_trade,
            pnl,
            "trade result recorded"
        );
        alerts
    }

    /// Clear every ban whose expiry has passed. Idempotent.
    pub fn clear_market_bans(&mut self, today: NaiveDate) -> usize {
        let mut cleared = 0;
        for risk in self.market_risks.values_mut() {
            let expired = risk.is_banned
                && risk.ban_expiry_date.map(|e| today >= e).unwrap_or(false);
            if expired {
                risk.is_banned = false;
                risk.ban_expiry_date = None;
                risk.consecutive_losses = 0;
                cleared += 1;
                info!(market = %risk.market, "market ban cleared");
            }
        }
        if cleared > 0 {
            self.persist();
        }
        cleared
    }

    pub fn is_banned(&self, market: &Market) -> bool {
        self.market_risks
            .get(market)
            .map(|r| r.is_banned)
            .unwrap_or(false)
    }

    pub fn market_risk(&self, market: &Market) -> Option<&MarketRisk> {
        self.market_risks.get(market)
    }

    /// Snapshot for the status surface and the periodic status event
    pub fn status(&self) -> RiskStatus {
        let daily = self.daily_risk.as_ref();
        RiskStatus {
            current_balance: self.current_balance,
            daily_pnl: daily.map(|d| d.daily_pnl).unwrap_or(0.0),
            daily_pnl_pct: daily.map(|d| d.daily_pnl_pct).unwrap_or(0.0),
            ddl_hit: daily.map(|d| d.is_ddl_hit).unwrap_or(false),
            trades_today: daily.map(|d| d.trades_today).unwrap_or(0),
            losing_trades_today: daily.map(|d| d.losing_trades_today).unwrap_or(0),
            banned_markets: self
                .market_risks
                .values()
                .filter(|r| r.is_banned)
                .map(|r| r.market.clone())
                .collect(),
            at_risk_markets: self
                .market_risks
                .values()
                .filter(|r| !r.is_banned && r.consecutive_losses >= 1)
                .map(|r| r.market.clone())
                .collect(),
            markets_traded: self.market_risks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{Direction, OrbContext, SignalContext};
    use crate::time_utils::kst_now;

    fn test_store() -> StateStore {
        let dir = std::env::temp_dir().join(format!("risk-guard-test-{}", uuid::Uuid::new_v4()));
        StateStore::new(dir).unwrap()
    }

    fn guard_with(config: RiskConfig) -> RiskGuard {
        RiskGuard::new(config, test_store())
    }

    fn test_config() -> RiskConfig {
        RiskConfig {
            per_trade_risk_pct: 0.01,
            min_position_krw: 10_000.0,
            max_position_krw: 10_000_000.0,
            daily_drawdown_stop_pct: 0.05,
            same_symbol_consecutive_losses_stop: 2,
            min_risk_reward_ratio: 1.0,
        }
    }

    fn sample_signal(entry: f64, stop: f64, target: f64) -> Signal {
        let (risk, reward, rr) = Signal::risk_metrics(Direction::Long, entry, stop, target);
        Signal {
            market: Market::new("KRW-BTC"),
            direction: Direction::Long,
            entry_price: entry,
            stop_loss: stop,
            take_profit: target,
            risk_amount: risk,
            reward_amount: reward,
            risk_reward_ratio: rr,
            confidence_score: 0.8,
            timestamp: kst_now(),
            context: SignalContext::Orb(OrbContext {
                box_high: entry,
                box_low: stop,
                box_range: entry - stop,
                breakout_level: entry,
                volume_ratio: 2.0,
                volume_confirmed: true,
                trend_aligned: true,
            }),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn test_balance_update_creates_daily_record() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());

        let daily = guard.daily_risk().unwrap();
        assert_eq!(daily.starting_balance, 1_000_000.0);
        assert_eq!(daily.current_balance, 1_000_000.0);
        assert_eq!(daily.daily_pnl, 0.0);
        assert!(!daily.is_ddl_hit);
    }

    #[test]
    fn test_balance_update_idempotent() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        guard.update_account_balance(950_000.0, today());
        let first = guard.daily_risk().unwrap().clone();
        guard.update_account_balance(950_000.0, today());
        let second = guard.daily_risk().unwrap();

        assert_eq!(first.daily_pnl, second.daily_pnl);
        assert_eq!(first.daily_pnl_pct, second.daily_pnl_pct);
        assert_eq!(first.is_ddl_hit, second.is_ddl_hit);
    }

    #[test]
    fn test_position_sizing_basic() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());

        // balance 1M, risk 1%, stop distance 1000 => 10 units, 10k risk
        let (size, risk) = guard
            .calculate_position_size(50_000.0, 49_000.0, Some(0.01))
            .unwrap();
        assert!((size - 10.0).abs() < 0.01);
        assert!((risk - 10_000.0).abs() < 1.0);
    }

    #[test]
    fn test_position_sizing_notional_clamp() {
        let mut config = test_config();
        config.max_position_krw = 100_000.0;
        let mut guard = guard_with(config);
        guard.update_account_balance(1_000_000.0, today());

        // Tiny stop distance would imply a huge notional; clamp to max
        let (size, _) = guard
            .calculate_position_size(50_000.0, 49_999.0, None)
            .unwrap();
        assert!((size * 50_000.0 - 100_000.0).abs() < 1.0);
    }

    #[test]
    fn test_position_sizing_fails_fast() {
        let mut guard = guard_with(test_config());
        assert!(guard.calculate_position_size(50_000.0, 49_000.0, None).is_none());

        guard.update_account_balance(1_000_000.0, today());
        assert!(guard.calculate_position_size(50_000.0, 50_000.0, None).is_none());
    }

    #[test]
    fn test_ddl_blocks_trades() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());

        // -6% day versus a -5% limit
        let alert = guard.update_account_balance(940_000.0, today());
        assert!(matches!(alert, Some(RiskAlert::DailyDrawdownLimit { .. })));
        assert!(guard.ddl_hit());

        // Alert fires exactly once per day
        let again = guard.update_account_balance(930_000.0, today());
        assert!(again.is_none());

        let signal = sample_signal(50_000.0, 49_000.0, 52_000.0);
        let assessment = guard.assess_trade_risk(&Market::new("KRW-BTC"), &signal, None, today());
        assert!(!assessment.is_allowed);
        assert!(assessment.rejection_reasons[0].contains("drawdown"));
    }

    #[test]
    fn test_consecutive_losses_ban_and_expiry() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        let market = Market::new("KRW-ETH");

        let alerts = guard.record_trade_result(&market, false, -5_000.0, today());
        assert!(alerts.is_empty());
        assert_eq!(guard.market_risk(&market).unwrap().consecutive_losses, 1);

        let alerts = guard.record_trade_result(&market, false, -5_000.0, today());
        assert!(alerts
            .iter()
            .any(|a| matches!(a, RiskAlert::MarketBanned { .. })));
        let risk = guard.market_risk(&market).unwrap();
        assert!(risk.is_banned);
        assert_eq!(
            risk.ban_expiry_date.unwrap(),
            today() + chrono::Duration::days(1)
        );

        // Assessment while banned is rejected
        let signal = sample_signal(50_000.0, 49_000.0, 52_000.0);
        let assessment = guard.assess_trade_risk(&market, &signal, None, today());
        assert!(!assessment.is_allowed);

        // One day later the ban auto-clears at assessment time
        let tomorrow = today() + chrono::Duration::days(1);
        let assessment = guard.assess_trade_risk(&market, &signal, None, tomorrow);
        // Note: the day rolled over, so only the ban state matters here
        assert!(!guard.market_risk(&market).unwrap().is_banned);
        assert_eq!(guard.market_risk(&market).unwrap().consecutive_losses, 0);
        assert!(assessment.is_allowed);
    }

    #[test]
    fn test_win_resets_streak() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        let market = Market::new("KRW-ETH");

        guard.record_trade_result(&market, false, -5_000.0, today());
        guard.record_trade_result(&market, true, 8_000.0, today());
        let risk = guard.market_risk(&market).unwrap();
        assert_eq!(risk.consecutive_losses, 0);
        assert_eq!(risk.winning_trades, 1);
        assert!(!risk.is_banned);
    }

    #[test]
    fn test_poor_rr_rejected() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());

        // Reward 500 against risk 1000: rr = 0.5 < 1.0
        let signal = sample_signal(50_000.0, 49_000.0, 50_500.0);
        let assessment = guard.assess_trade_risk(&Market::new("KRW-BTC"), &signal, None, today());
        assert!(!assessment.is_allowed);
        assert!(assessment
            .rejection_reasons
            .iter()
            .any(|r| r.contains("risk-reward")));
    }

    #[test]
    fn test_warning_on_prior_loss_non_blocking() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        let market = Market::new("KRW-ETH");
        guard.record_trade_result(&market, false, -5_000.0, today());

        let signal = sample_signal(50_000.0, 49_000.0, 52_000.0);
        let assessment = guard.assess_trade_risk(&market, &signal, None, today());
        assert!(assessment.is_allowed);
        assert!(assessment
            .warnings
            .iter()
            .any(|w| w.contains("consecutive")));
    }

    #[test]
    fn test_clear_market_bans_idempotent() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        let market = Market::new("KRW-ETH");
        guard.record_trade_result(&market, false, -5_000.0, today());
        guard.record_trade_result(&market, false, -5_000.0, today());
        assert!(guard.is_banned(&market));

        let tomorrow = today() + chrono::Duration::days(1);
        assert_eq!(guard.clear_market_bans(tomorrow), 1);
        assert_eq!(guard.clear_market_bans(tomorrow), 0);
        assert!(!guard.is_banned(&market));
    }

    #[test]
    fn test_day_rollover() {
        let mut guard = guard_with(test_config());
        guard.update_account_balance(1_000_000.0, today());
        guard.update_account_balance(960_000.0, today());
        assert!(guard.daily_risk().unwrap().daily_pnl < 0.0);

        let tomorrow = today() + chrono::Duration::days(1);
        guard.update_account_balance(960_000.0, tomorrow);
        let daily = guard.daily_risk().unwrap();
        assert_eq!(daily.date, tomorrow);
        assert_eq!(daily.starting_balance, 960_000.0);
        assert_eq!(daily.daily_pnl, 0.0);
        assert!(!daily.is_ddl_hit);
    }

    #[test]
    fn test_state_round_trip_through_store() {
        let store = test_store();
        {
            let mut guard = RiskGuard::new(test_config(), store.clone());
            guard.update_account_balance(1_000_000.0, today());
            guard.record_trade_result(&Market::new("KRW-ETH"), false, -5_000.0, today());
        }

        let guard = RiskGuard::new(test_config(), store);
        assert_eq!(guard.current_balance(), 995_000.0);
        let risk = guard.market_risk(&Market::new("KRW-ETH")).unwrap();
        assert_eq!(risk.consecutive_losses, 1);
        assert_eq!(risk.losing_trades, 1);
    }
}
