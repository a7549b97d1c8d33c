//! Trading system orchestrator
//!
//! Binds the scanner, signal manager, risk guard and executor on a
//! recurring tick. One iteration every `signal_check_interval_seconds`:
//! refresh derived state, scan when due, run the per-candidate signal
//! pipeline, monitor open positions, and emit a periodic risk status
//! event. A shutdown flag cuts the loop at the next boundary and a
//! session summary is written on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::data::{CandleProcessor, FeatureCalculator};
use crate::executor::{OrderExecutor, TradingMode};
use crate::notifier::TelegramNotifier;
use crate::risk::{RiskAlert, RiskGuard};
use crate::scanner::CandidateScanner;
use crate::signals::{MarketSnapshot, SignalManager};
use crate::store::StateStore;
use crate::time_utils::kst_now;
use crate::types::{Market, Position};
use crate::upbit::UpbitClient;

/// Cadence of the periodic risk status event
const RISK_STATUS_INTERVAL_MINUTES: i64 = 10;
/// Fallback paper balance when no account is reachable
const DEFAULT_PAPER_BALANCE: f64 = 1_000_000.0;

/// Orchestrator state snapshot
#[derive(Debug, Clone)]
pub struct TradingState {
    pub is_running: bool,
    pub start_time: DateTime<FixedOffset>,
    pub next_scan_time: DateTime<FixedOffset>,
    pub active_candidates: Vec<Market>,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub total_pnl: f64,
    pub ddl_hit: bool,
}

pub struct TradingSystem {
    config: Config,
    client: Arc<UpbitClient>,
    scanner: CandidateScanner,
    signal_manager: SignalManager,
    risk_guard: RiskGuard,
    executor: OrderExecutor,
    notifier: Option<TelegramNotifier>,
    candle_processor: CandleProcessor,
    feature_calculator: FeatureCalculator,
    store: StateStore,
    state: TradingState,
    should_stop: Arc<AtomicBool>,
    pause_trading: bool,
    last_risk_status: Option<DateTime<FixedOffset>>,
}

impl TradingSystem {
    pub fn new(
        config: Config,
        mode: TradingMode,
        client: Arc<UpbitClient>,
        notifier: Option<TelegramNotifier>,
    ) -> anyhow::Result<Self> {
        let store = StateStore::new(&config.runtime.data_dir)?;
        let scanner = CandidateScanner::new(config.clone(), client.clone());
        let signal_manager = SignalManager::new(&config);
        let risk_guard = RiskGuard::new(config.risk.clone(), store.clone());
        let executor_client = (mode == TradingMode::Live).then(|| client.clone());
        let executor = OrderExecutor::new(
            config.orders.clone(),
            mode,
            executor_client,
            store.clone(),
        )?;
        let candle_processor = CandleProcessor::new(config.scanner.candle_unit);
        let feature_calculator = FeatureCalculator::new(config.scanner.clone());

        let now = kst_now();
        Ok(Self {
            config,
            client,
            scanner,
            signal_manager,
            risk_guard,
            executor,
            notifier,
            candle_processor,
            feature_calculator,
            store,
            state: TradingState {
                is_running: false,
                start_time: now,
                next_scan_time: now,
                active_candidates: Vec::new(),
                total_trades: 0,
                winning_trades: 0,
                total_pnl: 0.0,
                ddl_hit: false,
            },
            should_stop: Arc::new(AtomicBool::new(false)),
            pause_trading: false,
            last_risk_status: None,
        })
    }

    /// Flag handle for the signal handler; setting it stops the loop at
    /// the next tick boundary
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }

    pub fn mode(&self) -> TradingMode {
        self.executor.mode()
    }

    /// Seed the risk guard with the account balance. Falls back to the
    /// default paper balance when the account is unreachable.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!("initializing trading system");

        let balance = if self.mode() == TradingMode::Live && self.client.has_credentials() {
            match self.client.get_accounts().await {
                Ok(accounts) => accounts
                    .iter()
                    .find(|a| a.currency == "KRW")
                    .map(|a| a.balance_f64())
                    .unwrap_or(0.0),
                Err(e) => {
                    error!(error = %e, "failed to fetch account balance");
                    0.0
                }
            }
        } else {
            0.0
        };

        let balance = if balance > 0.0 {
            info!(balance, "account balance loaded");
            balance
        } else {
            info!(balance = DEFAULT_PAPER_BALANCE, "using paper balance");
            DEFAULT_PAPER_BALANCE
        };

        if let Some(alert) = self
            .risk_guard
            .update_account_balance(balance, kst_now().date_naive())
        {
            self.forward_alert(&alert).await;
        }

        self.refresh_state();
        info!("trading system initialized");
        Ok(())
    }

    fn refresh_state(&mut self) {
        self.state.ddl_hit = self.risk_guard.ddl_hit();

        let mut total_pnl = 0.0;
        let mut total_trades = 0;
        let mut winning_trades = 0;
        for position in self.executor.closed_positions() {
            total_pnl += position.realized_pnl;
            total_trades += 1;
            if position.realized_pnl > 0.0 {
                winning_trades += 1;
            }
        }
        self.state.total_pnl = total_pnl;
        self.state.total_trades = total_trades;
        self.state.winning_trades = winning_trades;
    }

    async fn forward_alert(&self, alert: &RiskAlert) {
        if let Some(notifier) = &self.notifier {
            notifier.send_risk_alert(alert).await;
        }
    }

    /// Run the main loop for the given duration
    pub async fn run(&mut self, duration_minutes: i64) -> anyhow::Result<()> {
        self.state.is_running = true;
        self.state.start_time = kst_now();
        let end_time = self.state.start_time + chrono::Duration::minutes(duration_minutes);

        info!(
            duration_minutes,
            mode = %self.mode(),
            end_time = %end_time,
            "starting trading loop"
        );
        if let Some(notifier) = &self.notifier {
            notifier.send_system_status("started", 0.0).await;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.runtime.signal_check_interval_seconds,
        ));

        while !self.should_stop.load(Ordering::SeqCst) && kst_now() < end_time {
            interval.tick().await;
            if self.should_stop.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.tick().await {
                // One bad tick never brings the loop down
                error!(error = %e, "trading tick failed");
            }
        }

        self.state.is_running = false;
        let uptime = (kst_now() - self.state.start_time).num_seconds() as f64 / 60.0;
        if let Some(notifier) = &self.notifier {
            notifier.send_system_status("stopped", uptime).await;
        }
        self.write_session_summary();
        info!(uptime_minutes = uptime, "trading loop ended");
        Ok(())
    }

    /// Roll the daily risk record over to `today` at the current balance.
    /// Runs on every tick so a date change resets the daily record (and
    /// with it the drawdown limit) even when no trade closes overnight.
    fn roll_trading_day(&mut self, today: NaiveDate) -> Option<RiskAlert> {
        let balance = self.risk_guard.current_balance();
        self.risk_guard.update_account_balance(balance, today)
    }

    /// One deterministic tick: day rollover, refresh, scan when due,
    /// candidate pipeline, position monitor, periodic risk status
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        if let Some(alert) = self.roll_trading_day(kst_now().date_naive()) {
            self.forward_alert(&alert).await;
        }
        self.refresh_state();

        let trading_allowed = self.trading_allowed();

        if trading_allowed {
            if kst_now() >= self.state.next_scan_time {
                self.scan_markets().await;
            }

            let candidates = self.state.active_candidates.clone();
            for market in candidates {
                if let Err(e) = self.process_market(&market).await {
                    error!(market = %market, error = %e, "candidate pipeline failed");
                }
            }
        }

        // Positions are monitored even while entries are paused
        self.manage_positions().await;
        self.emit_risk_status();
        Ok(())
    }

    fn trading_allowed(&mut self) -> bool {
        if self.state.ddl_hit && !self.pause_trading {
            warn!("daily drawdown limit hit, pausing new entries");
            self.pause_trading = true;
        } else if self.pause_trading && !self.state.ddl_hit {
            // The day rolled over and the limit cleared
            self.pause_trading = false;
            info!("new trading day, drawdown pause lifted");
        }
        !self.pause_trading
    }

    /// Resume entries if the drawdown limit is not in force
    pub fn resume_trading(&mut self) {
        if !self.state.ddl_hit {
            self.pause_trading = false;
            info!("trading resumed");
        } else {
            warn!("cannot resume, drawdown limit still in force");
        }
    }

    async fn scan_markets(&mut self) {
        match self.scanner.scan().await {
            Ok(result) => {
                self.state.active_candidates = result
                    .candidates
                    .iter()
                    .map(|c| c.market.clone())
                    .collect();
                self.state.next_scan_time = kst_now()
                    + chrono::Duration::minutes(self.config.runtime.scan_interval_minutes);
                info!(
                    candidates = ?self.state.active_candidates,
                    next_scan = %self.state.next_scan_time,
                    duration_s = result.scan_duration_seconds,
                    "scan complete"
                );
            }
            Err(e) => {
                error!(error = %e, "market scan failed");
            }
        }
    }

    /// Per-candidate pipeline: fresh data, features, best signal, risk
    /// assessment, execution
    async fn process_market(&mut self, market: &Market) -> anyhow::Result<()> {
        let today = kst_now().date_naive();

        if self.risk_guard.is_banned(market) {
            debug!(market = %market, "skipping banned market");
            return Ok(());
        }
        if self.executor.has_active_position(market) {
            debug!(market = %market, "skipping market with open position");
            return Ok(());
        }

        let scanner_cfg = &self.config.scanner;
        let market_code = market.as_str().to_string();

        let raw_candles = match self
            .client
            .get_candles(&market_code, scanner_cfg.candle_unit, scanner_cfg.candle_count, None)
            .await
        {
            Ok(c) => c,
            Err(e) if e.is_transient() => {
                warn!(market = %market, error = %e, "candle fetch failed, skipping tick");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (candles, report) = self.candle_processor.process(&raw_candles, &market_code, false);
        if !report.is_valid {
            debug!(market = %market, "skipping market on data quality");
            return Ok(());
        }

        let tickers = self.client.get_tickers(std::slice::from_ref(&market_code)).await?;
        let ticker = match tickers.first() {
            Some(t) => t,
            None => return Ok(()),
        };
        let current_price = ticker.trade_price;
        let current_volume = ticker.acc_trade_volume_24h;

        let reference_raw = self
            .client
            .get_candles(
                &scanner_cfg.rs_reference_symbol,
                scanner_cfg.candle_unit,
                scanner_cfg.candle_count,
                None,
            )
            .await
            .unwrap_or_default();
        let (reference_candles, _) = self.candle_processor.process(
            &reference_raw,
            &scanner_cfg.rs_reference_symbol,
            false,
        );

        let orderbooks = self
            .client
            .get_orderbook(std::slice::from_ref(&market_code))
            .await
            .unwrap_or_default();

        let now = kst_now();
        let features = match self.feature_calculator.calculate_all(
            market,
            &candles,
            &reference_candles,
            orderbooks.first(),
            now,
        ) {
            Some(f) => f,
            None => return Ok(()),
        };

        let snapshot = MarketSnapshot {
            market,
            candles: &candles,
            current_price,
            current_volume,
            features: &features,
            now,
        };

        let signal = match self.signal_manager.best_signal(&snapshot) {
            Some(s) => s,
            None => return Ok(()),
        };

        let assessment = self
            .risk_guard
            .assess_trade_risk(market, &signal, None, today);
        if !assessment.is_allowed {
            info!(
                market = %market,
                reasons = assessment.rejection_reasons.join("; "),
                "trade rejected by risk guard"
            );
            return Ok(());
        }
        for warning in &assessment.warnings {
            warn!(market = %market, warning, "risk warning");
        }

        let trade_risk = assessment
            .trade_risk
            .expect("allowed assessment carries trade risk");

        info!(
            market = %market,
            kind = signal.kind_label(),
            entry = signal.entry_price,
            size = trade_risk.position_size,
            risk_krw = trade_risk.risk_amount,
            "executing trade"
        );

        let (position, orders) = self.executor.execute_signal_trade(&signal, &trade_risk).await;

        if let Some(position) = position {
            if let Some(notifier) = &self.notifier {
                notifier
                    .send_trade(
                        &position.side.to_string(),
                        market,
                        position.quantity,
                        position.entry_price,
                        &signal.kind_label(),
                        self.mode().is_paper(),
                    )
                    .await;
            }
        } else {
            warn!(
                market = %market,
                statuses = ?orders.iter().map(|o| o.status).collect::<Vec<_>>(),
                "trade execution produced no position"
            );
        }

        Ok(())
    }

    /// Position monitor: refresh unrealized P&L and evaluate the stop and
    /// take-profit levels carried on the position, closing when crossed.
    /// The signal's levels are authoritative; `close_position` routes the
    /// exit order through whichever backend is active.
    async fn manage_positions(&mut self) {
        for position in self.executor.active_positions() {
            if let Err(e) = self.manage_position(&position).await {
                error!(market = %position.market, error = %e, "position monitor failed");
            }
        }
    }

    async fn manage_position(&mut self, position: &Position) -> anyhow::Result<()> {
        let market_code = position.market.as_str().to_string();
        let tickers = match self.client.get_tickers(std::slice::from_ref(&market_code)).await {
            Ok(t) => t,
            Err(e) => {
                warn!(market = %position.market, error = %e, "ticker fetch failed for position");
                return Ok(());
            }
        };
        let current_price = match tickers.first() {
            Some(t) => t.trade_price,
            None => return Ok(()),
        };

        let position_id = position.id();
        self.executor.update_unrealized(&position_id, current_price);

        // The venue holds no server-side bracket in either mode; this
        // monitor is the only exit mechanism, for live positions too. If
        // the process dies, open live exposure is unprotected until
        // restart.
        let close_reason = if position.stop_hit(current_price) {
            Some("stop_loss")
        } else if position.take_profit_hit(current_price) {
            Some("take_profit")
        } else {
            None
        };

        if let Some(reason) = close_reason {
            info!(
                market = %position.market,
                current_price,
                reason,
                "exit level crossed"
            );
            let close_result = self
                .executor
                .close_position(&position_id, current_price, reason)
                .await;

            if close_result
                .map(|r| r.status == crate::types::OrderStatus::Filled)
                .unwrap_or(false)
            {
                let closed = self
                    .executor
                    .position(&position_id)
                    .expect("closed position exists")
                    .clone();
                let is_winning = closed.realized_pnl > 0.0;

                let alerts = self.risk_guard.record_trade_result(
                    &closed.market,
                    is_winning,
                    closed.realized_pnl,
                    kst_now().date_naive(),
                );
                for alert in &alerts {
                    self.forward_alert(alert).await;
                }

                if let Some(notifier) = &self.notifier {
                    notifier
                        .send_trade(
                            "close",
                            &closed.market,
                            closed.quantity,
                            closed.exit_price.unwrap_or(current_price),
                            reason,
                            self.mode().is_paper(),
                        )
                        .await;
                }
            }
        }

        Ok(())
    }

    /// Emit a structured risk status event every ten minutes
    fn emit_risk_status(&mut self) {
        let now = kst_now();
        let due = self
            .last_risk_status
            .map(|last| now - last >= chrono::Duration::minutes(RISK_STATUS_INTERVAL_MINUTES))
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_risk_status = Some(now);

        let status = self.risk_guard.status();
        info!(
            balance = status.current_balance,
            daily_pnl = status.daily_pnl,
            daily_pnl_pct = status.daily_pnl_pct,
            ddl_hit = status.ddl_hit,
            active_positions = self.executor.active_positions().len(),
            banned_markets = status.banned_markets.len(),
            "risk status"
        );
    }

    /// Serializable status for the CLI surface
    pub fn system_status(&mut self) -> serde_json::Value {
        self.refresh_state();
        let risk = self.risk_guard.status();
        let stats = self.executor.statistics();

        json!({
            "system": {
                "is_running": self.state.is_running,
                "is_paused": self.pause_trading,
                "mode": self.mode().to_string(),
                "uptime_minutes": (kst_now() - self.state.start_time).num_seconds() as f64 / 60.0,
            },
            "market": {
                "active_candidates": self.state.active_candidates.clone(),
                "next_scan_time": self.state.next_scan_time.to_rfc3339(),
            },
            "positions": {
                "active": stats.positions_active,
                "total": stats.positions_total,
            },
            "performance": {
                "total_trades": self.state.total_trades,
                "winning_trades": self.state.winning_trades,
                "total_pnl": self.state.total_pnl,
                "daily_pnl": risk.daily_pnl,
            },
            "risk": {
                "ddl_hit": risk.ddl_hit,
                "banned_markets": risk.banned_markets,
            },
        })
    }

    /// Final session summary written to a timestamped report file
    fn write_session_summary(&mut self) {
        self.refresh_state();
        let end_time = kst_now();
        let duration_minutes =
            (end_time - self.state.start_time).num_seconds() as f64 / 60.0;
        let stats = self.executor.statistics();
        let risk = self.risk_guard.status();
        let signal_stats = self.signal_manager.statistics();

        let summary = json!({
            "session": {
                "start_time": self.state.start_time.to_rfc3339(),
                "end_time": end_time.to_rfc3339(),
                "duration_minutes": duration_minutes,
                "mode": self.mode().to_string(),
            },
            "performance": {
                "total_trades": self.state.total_trades,
                "winning_trades": self.state.winning_trades,
                "win_rate": self.state.winning_trades as f64
                    / self.state.total_trades.max(1) as f64,
                "total_pnl": self.state.total_pnl,
                "daily_pnl": risk.daily_pnl,
            },
            "orders": stats,
            "signals": signal_stats,
            "risk": {
                "ddl_hit": risk.ddl_hit,
                "banned_markets": risk.banned_markets,
                "trades_today": risk.trades_today,
            },
        });

        let name = format!(
            "trading_summary_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        self.store
            .write_report(&self.config.runtime.reports_dir, &name, &summary);
        info!(report = name, "session summary written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system_fixture() -> TradingSystem {
        let mut config = Config::default();
        let dir = std::env::temp_dir().join(format!("system-test-{}", uuid::Uuid::new_v4()));
        config.runtime.data_dir = dir.join("data").to_string_lossy().into_owned();
        config.runtime.reports_dir = dir.join("reports").to_string_lossy().into_owned();
        let client = Arc::new(UpbitClient::new(config.exchange.clone(), None));
        TradingSystem::new(config, TradingMode::Paper, client, None).unwrap()
    }

    #[test]
    fn test_paper_system_builds_without_credentials() {
        let system = system_fixture();
        assert_eq!(system.mode(), TradingMode::Paper);
        assert!(!system.state.is_running);
    }

    #[test]
    fn test_stop_handle_flags_loop() {
        let system = system_fixture();
        let handle = system.stop_handle();
        assert!(!handle.load(Ordering::SeqCst));
        handle.store(true, Ordering::SeqCst);
        assert!(system.should_stop.load(Ordering::SeqCst));
    }

    #[test]
    fn test_ddl_pauses_trading() {
        let mut system = system_fixture();
        let today = kst_now().date_naive();

        // A -2% day against the default -1% limit trips the guard
        system.risk_guard.update_account_balance(1_000_000.0, today);
        system.risk_guard.update_account_balance(980_000.0, today);
        system.refresh_state();

        assert!(system.state.ddl_hit);
        assert!(!system.trading_allowed());
        assert!(system.pause_trading);

        // Manual resume is refused while the limit is in force
        system.resume_trading();
        assert!(system.pause_trading);
    }

    #[test]
    fn test_ddl_pause_lifts_on_day_rollover() {
        let mut system = system_fixture();
        let today = kst_now().date_naive();

        system.risk_guard.update_account_balance(1_000_000.0, today);
        system.risk_guard.update_account_balance(980_000.0, today);
        system.refresh_state();
        assert!(!system.trading_allowed());

        // Same-day rollover changes nothing: still paused
        assert!(system.roll_trading_day(today).is_none());
        system.refresh_state();
        assert!(!system.trading_allowed());

        // Next trading day: the rollover resets the daily record and the
        // pause lifts without any trade having closed
        let tomorrow = today + chrono::Duration::days(1);
        assert!(system.roll_trading_day(tomorrow).is_none());
        system.refresh_state();
        assert!(!system.state.ddl_hit);
        assert!(system.trading_allowed());
        assert!(!system.pause_trading);

        let daily = system.risk_guard.daily_risk().unwrap();
        assert_eq!(daily.date, tomorrow);
        assert_eq!(daily.starting_balance, 980_000.0);
    }

    #[test]
    fn test_system_status_shape() {
        let mut system = system_fixture();
        let status = system.system_status();
        assert_eq!(status["system"]["mode"], "paper");
        assert_eq!(status["positions"]["active"], 0);
        assert_eq!(status["risk"]["ddl_hit"], false);
    }

    #[test]
    fn test_session_summary_written() {
        let mut system = system_fixture();
        system.write_session_summary();
        let reports: Vec<_> = std::fs::read_dir(&system.config.runtime.reports_dir)
            .unwrap()
            .collect();
        assert_eq!(reports.len(), 1);
    }
}
