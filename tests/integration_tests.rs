//! Integration tests for the trading pipeline
//!
//! These exercise the closed-loop pieces end to end: feature math against
//! known values, risk guard state transitions, conflict resolution, and
//! the paper executor's bracket flow under a fixed seed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};

use upbit_intraday::config::{Config, OrdersConfig, PaperModeConfig, RiskConfig};
use upbit_intraday::data::features;
use upbit_intraday::risk::{RiskAlert, RiskGuard};
use upbit_intraday::signals::{
    Direction, MarketSnapshot, OrbContext, Signal, SignalContext, SignalManager, SvwapContext,
};
use upbit_intraday::time_utils::kst;
use upbit_intraday::types::{Candle, Market, OrderStatus, Position, TimeInForce};
use upbit_intraday::{OrderExecutor, StateStore, TradingMode};

// =============================================================================
// Test Utilities
// =============================================================================

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

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn temp_store(tag: &str) -> StateStore {
    let dir = std::env::temp_dir().join(format!(
        "integration-{}-{}",
        tag,
        uuid::Uuid::new_v4()
    ));
    StateStore::new(dir).unwrap()
}

/// Gentle uptrend candles for generic fixtures
fn trending_candles(count: usize, base_price: f64, step: f64) -> Vec<Candle> {
    let start = at(9, 0);
    (0..count)
        .map(|i| {
            let price = base_price + step * i as f64;
            Candle::new_unchecked(
                start + Duration::minutes(5 * i as i64),
                price - 0.1,
                price + 0.3,
                price - 0.3,
                price,
                100.0 + i as f64,
            )
        })
        .collect()
}

fn risk_config() -> RiskConfig {
    RiskConfig {
        per_trade_risk_pct: 0.01,
        min_position_krw: 10_000.0,
        max_position_krw: 10_000_000.0,
        daily_drawdown_stop_pct: 0.05,
        same_symbol_consecutive_losses_stop: 2,
        min_risk_reward_ratio: 1.0,
    }
}

fn orb_signal(market: &str, direction: Direction, entry: f64, confidence: f64) -> Signal {
    let (stop, target) = match direction {
        Direction::Long => (entry * 0.98, entry * 1.04),
        Direction::Short => (entry * 1.02, entry * 0.96),
    };
    let (risk, reward, rr) = Signal::risk_metrics(direction, entry, stop, target);
    Signal {
        market: Market::new(market),
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
    }
}

fn paper_orders_config(seed: u64) -> OrdersConfig {
    OrdersConfig {
        slippage_bp_max: 5.0,
        time_in_force: TimeInForce::Ioc,
        fill_timeout_seconds: 300,
        paper_mode: PaperModeConfig {
            simulate_slippage: false,
            slippage_bp_range: [0.0, 3.0],
            fill_probability: 1.0,
            fill_delay_ms: [0, 1],
            seed: Some(seed),
        },
    }
}

// =============================================================================
// Feature Math Scenarios
// =============================================================================

#[test]
fn scenario_rvol_exact_double() {
    let mut volumes = vec![100.0; 20];
    volumes.push(200.0);
    assert_eq!(features::rvol(&volumes, 20), 2.0);
}

#[test]
fn scenario_vwap_weighted_mean() {
    let vwap = features::session_vwap(&[100.0, 105.0, 110.0], &[10.0, 20.0, 30.0]);
    assert!((vwap - 106.6667).abs() < 0.01);
}

#[test]
fn scenario_relative_strength_difference() {
    let rs = features::relative_strength(
        &[100.0, 105.0, 110.0],
        &[1000.0, 1025.0, 1050.0],
        10,
        5,
    );
    assert!((rs - 0.05).abs() < 0.01);
}

#[test]
fn scenario_composite_score() {
    let config = Config::default();
    let score = features::composite_score(0.02, 2.0, 1, 0.5, &config.scanner.score_weights);
    assert!((score - 0.858).abs() < 1e-9);
}

#[test]
fn feature_vector_invariants_hold() {
    let config = Config::default();
    let calc = features::FeatureCalculator::new(config.scanner);
    let market = Market::new("KRW-BTC");
    let candles = trending_candles(120, 1000.0, 0.5);

    let fv = calc
        .calculate_all(&market, &candles, &candles, None, at(11, 0))
        .unwrap();

    assert!(fv.atr_14 >= 0.0);
    assert!((0.0..=1.0).contains(&fv.depth_score));
    assert!(fv.trend == 0 || fv.trend == 1);
    assert!((0.0..=3.0).contains(&fv.rvol_z));
    // No orderbook: spread must hard-fail the filter gate
    assert!(fv.spread_bp.is_infinite());
    assert!(!calc.failed_filters(&fv).is_empty());
}

// =============================================================================
// Risk Guard Scenarios
// =============================================================================

#[test]
fn scenario_position_sizing() {
    let mut guard = RiskGuard::new(risk_config(), temp_store("sizing"));
    guard.update_account_balance(1_000_000.0, today());

    let (size, risk) = guard
        .calculate_position_size(50_000.0, 49_000.0, Some(0.01))
        .unwrap();
    assert!((size - 10.0).abs() < 1e-9);
    assert!((risk - 10_000.0).abs() < 1e-9);
}

#[test]
fn scenario_daily_drawdown_halts_trading() {
    let mut guard = RiskGuard::new(risk_config(), temp_store("ddl"));
    guard.update_account_balance(1_000_000.0, today());

    let alert = guard.update_account_balance(940_000.0, today());
    match alert {
        Some(RiskAlert::DailyDrawdownLimit { daily_pnl_pct, .. }) => {
            assert!((daily_pnl_pct + 0.06).abs() < 1e-9);
        }
        other => panic!("expected DDL alert, got {:?}", other),
    }

    let signal = orb_signal("KRW-BTC", Direction::Long, 50_000.0, 0.8);
    let assessment = guard.assess_trade_risk(&Market::new("KRW-BTC"), &signal, None, today());
    assert!(!assessment.is_allowed);
    assert!(assessment
        .rejection_reasons
        .iter()
        .any(|r| r.contains("drawdown")));
}

#[test]
fn scenario_consecutive_loss_ban_lifecycle() {
    let mut guard = RiskGuard::new(risk_config(), temp_store("ban"));
    guard.update_account_balance(10_000_000.0, today());
    let market = Market::new("KRW-SOL");

    guard.record_trade_result(&market, false, -10_000.0, today());
    let alerts = guard.record_trade_result(&market, false, -10_000.0, today());

    let banned = alerts
        .iter()
        .find_map(|a| match a {
            RiskAlert::MarketBanned {
                market: m,
                ban_expiry,
                ..
            } => Some((m.clone(), *ban_expiry)),
            _ => None,
        })
        .expect("second loss must ban the market");
    assert_eq!(banned.0, market);
    assert_eq!(banned.1, today() + Duration::days(1));

    // Rejected while banned
    let signal = orb_signal("KRW-SOL", Direction::Long, 50_000.0, 0.8);
    let assessment = guard.assess_trade_risk(&market, &signal, None, today());
    assert!(!assessment.is_allowed);

    // One day later: assessment succeeds and the streak resets
    let assessment = guard.assess_trade_risk(&market, &signal, None, today() + Duration::days(1));
    assert!(assessment.is_allowed);
    assert_eq!(guard.market_risk(&market).unwrap().consecutive_losses, 0);
}

#[test]
fn scenario_guard_operations_idempotent() {
    let mut guard = RiskGuard::new(risk_config(), temp_store("idem"));
    guard.update_account_balance(1_000_000.0, today());
    guard.update_account_balance(980_000.0, today());
    let once = guard.daily_risk().unwrap().clone();
    guard.update_account_balance(980_000.0, today());
    let twice = guard.daily_risk().unwrap();
    assert_eq!(once.daily_pnl, twice.daily_pnl);
    assert_eq!(once.trades_today, twice.trades_today);

    let market = Market::new("KRW-ETH");
    guard.record_trade_result(&market, false, -10_000.0, today());
    guard.record_trade_result(&market, false, -10_000.0, today());
    let tomorrow = today() + Duration::days(1);
    assert_eq!(guard.clear_market_bans(tomorrow), 1);
    assert_eq!(guard.clear_market_bans(tomorrow), 0);
}

#[test]
fn risk_state_serde_round_trip() {
    let store = temp_store("roundtrip");
    {
        let mut guard = RiskGuard::new(risk_config(), store.clone());
        guard.update_account_balance(1_000_000.0, today());
        guard.record_trade_result(&Market::new("KRW-ETH"), false, -20_000.0, today());
    }

    let guard = RiskGuard::new(risk_config(), store);
    assert_eq!(guard.current_balance(), 980_000.0);
    let daily = guard.daily_risk().unwrap();
    assert_eq!(daily.starting_balance, 1_000_000.0);
    assert_eq!(daily.trades_today, 1);
    assert_eq!(daily.losing_trades_today, 1);
    let market_risk = guard.market_risk(&Market::new("KRW-ETH")).unwrap();
    assert_eq!(market_risk.losing_trades, 1);
    assert_eq!(market_risk.consecutive_losses, 1);
}

// =============================================================================
// Signal Manager Scenarios
// =============================================================================

/// Full pipeline through the manager: a breakout snapshot produces a
/// valid ORB long and the manager selects it.
#[test]
fn scenario_manager_selects_orb_breakout() {
    let mut config = Config::default();
    // Only ORB and sVWAP in play for a deterministic fixture
    config.signals.sweep_reversal.use_strategy = false;
    let mut manager = SignalManager::new(&config);

    let market = Market::new("KRW-BTC");
    // Tight opening box 09:00-09:55 around 100, then volatile post-box
    // candles that widen the ATR enough for a workable R:R.
    let mut candles = Vec::new();
    for i in 0..12 {
        let close = 99.8 + 0.03 * i as f64;
        candles.push(Candle::new_unchecked(
            at(9, (i * 5) as u32),
            close,
            close + 0.1,
            close - 0.1,
            close,
            50.0,
        ));
    }
    for i in 0..6u32 {
        let close = 100.2 + 0.05 * i as f64;
        candles.push(Candle::new_unchecked(
            at(10, 5 + i * 5),
            close,
            close + 2.0,
            close - 2.0,
            close,
            50.0,
        ));
    }

    let calc = features::FeatureCalculator::new(config.scanner.clone());
    let features = calc
        .calculate_all(&market, &candles, &candles, None, at(10, 35))
        .unwrap();
    assert_eq!(features.trend, 1);

    // Price clears the box high plus the ATR buffer on 10x volume. The
    // sVWAP side sees a pullback-from-high at this price and demands a
    // downtrend EMA alignment it cannot get, so it abstains.
    let snapshot = MarketSnapshot {
        market: &market,
        candles: &candles,
        current_price: 100.5,
        current_volume: 500.0,
        features: &features,
        now: at(10, 35),
    };

    let best = manager.best_signal(&snapshot).expect("orb long expected");
    assert_eq!(best.direction, Direction::Long);
    assert_eq!(best.context.strategy_name(), "orb");
    assert!(best.risk_reward_ratio >= 1.0);
    assert!(best.confidence_score >= 0.6);
}

/// Direct ordering check: when an ORB long and an sVWAP short collide,
/// ORB's higher priority must outrank any confidence edge.
#[test]
fn scenario_direction_conflict_static() {
    let orb = orb_signal("KRW-BTC", Direction::Long, 100_000.0, 0.65);

    let (stop, target) = (102_000.0, 96_000.0);
    let (risk, reward, rr) =
        Signal::risk_metrics(Direction::Short, 100_000.0, stop, target);
    let svwap = Signal {
        market: Market::new("KRW-BTC"),
        direction: Direction::Short,
        entry_price: 100_000.0,
        stop_loss: stop,
        take_profit: target,
        risk_amount: risk,
        reward_amount: reward,
        risk_reward_ratio: rr,
        confidence_score: 0.95,
        timestamp: at(10, 31),
        context: SignalContext::SvwapPullback(SvwapContext {
            svwap: 100_000.0,
            zone_upper: 100_200.0,
            zone_lower: 99_800.0,
            recent_high: 101_000.0,
            recent_low: 99_000.0,
            pullback_pct: 1.0,
            ema_aligned: true,
            volume_confirmed: true,
        }),
    };

    // Higher confidence on the sVWAP side must not beat ORB's priority
    assert!(svwap.confidence_score > orb.confidence_score);
    assert!(orb.context.priority() < svwap.context.priority());
}

// =============================================================================
// Executor Scenarios
// =============================================================================

#[tokio::test]
async fn scenario_paper_bracket_and_exit_flow() {
    let store = temp_store("bracket");
    let mut executor = OrderExecutor::new(
        paper_orders_config(21),
        TradingMode::Paper,
        None,
        store.clone(),
    )
    .unwrap();

    let signal = orb_signal("KRW-BTC", Direction::Long, 50_000.0, 0.8);
    let mut guard = RiskGuard::new(risk_config(), temp_store("bracket-risk"));
    guard.update_account_balance(10_000_000.0, today());
    let assessment =
        guard.assess_trade_risk(&Market::new("KRW-BTC"), &signal, None, today());
    assert!(assessment.is_allowed);
    let trade_risk = assessment.trade_risk.unwrap();

    let (position, orders) = executor.execute_signal_trade(&signal, &trade_risk).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Filled);

    let position = position.unwrap();
    assert_eq!(position.stop_loss, Some(signal.stop_loss));
    assert_eq!(position.take_profit, Some(signal.take_profit));

    // At most one active position per market
    assert!(executor.has_active_position(&Market::new("KRW-BTC")));
    let positions = executor.active_positions();
    assert_eq!(
        positions
            .iter()
            .filter(|p| p.market == Market::new("KRW-BTC"))
            .count(),
        1
    );

    // Take-profit level crossed: close and record the win
    let position_id = position.id();
    assert!(position.take_profit_hit(signal.take_profit + 1.0));
    let close = executor
        .close_position(&position_id, signal.take_profit, "take_profit")
        .await
        .unwrap();
    assert_eq!(close.status, OrderStatus::Filled);

    let closed = executor.position(&position_id).unwrap().clone();
    assert!(!closed.is_active);
    assert!(closed.realized_pnl > 0.0);

    let alerts = guard.record_trade_result(
        &closed.market,
        closed.realized_pnl > 0.0,
        closed.realized_pnl,
        today(),
    );
    assert!(alerts.is_empty());
    assert!(guard.current_balance() > 10_000_000.0);
}

#[tokio::test]
async fn scenario_losing_exits_feed_ban() {
    let mut executor = OrderExecutor::new(
        paper_orders_config(33),
        TradingMode::Paper,
        None,
        temp_store("losses"),
    )
    .unwrap();
    let mut guard = RiskGuard::new(risk_config(), temp_store("losses-risk"));
    guard.update_account_balance(10_000_000.0, today());
    let market = Market::new("KRW-ETH");

    for round in 0..2 {
        let signal = orb_signal("KRW-ETH", Direction::Long, 50_000.0, 0.8);
        let assessment = guard.assess_trade_risk(&market, &signal, None, today());
        assert!(assessment.is_allowed, "round {} should be allowed", round);
        let trade_risk = assessment.trade_risk.unwrap();

        let (position, _) = executor.execute_signal_trade(&signal, &trade_risk).await;
        let position = position.unwrap();
        let position_id = position.id();

        // Stop crossed: close at the stop for a loss
        assert!(position.stop_hit(signal.stop_loss - 1.0));
        executor
            .close_position(&position_id, signal.stop_loss, "stop_loss")
            .await
            .unwrap();
        let closed = executor.position(&position_id).unwrap().clone();
        assert!(closed.realized_pnl < 0.0);

        guard.record_trade_result(&market, false, closed.realized_pnl, today());
    }

    assert!(guard.is_banned(&market));
    let signal = orb_signal("KRW-ETH", Direction::Long, 50_000.0, 0.8);
    let assessment = guard.assess_trade_risk(&market, &signal, None, today());
    assert!(!assessment.is_allowed);
}

#[test]
fn order_and_position_serde_round_trip_via_store() {
    let store = temp_store("serde");
    let position = Position {
        market: Market::new("KRW-BTC"),
        side: upbit_intraday::types::Side::Buy,
        entry_price: 50_000.0,
        quantity: 2.0,
        entry_time: at(10, 30),
        entry_order_id: "entry-1".to_string(),
        stop_loss_order_id: Some("stop-1".to_string()),
        take_profit_order_id: Some("tp-1".to_string()),
        stop_loss: Some(49_000.0),
        take_profit: Some(52_000.0),
        unrealized_pnl: 100.0,
        realized_pnl: 0.0,
        is_active: true,
        exit_time: None,
        exit_price: None,
        exit_reason: None,
    };

    let mut table = HashMap::new();
    table.insert(position.id(), position.clone());
    store.save("positions", &table);

    let loaded: HashMap<String, Position> = store.load("positions").unwrap();
    let restored = &loaded[&position.id()];
    assert_eq!(restored.market, position.market);
    assert_eq!(restored.entry_price, position.entry_price);
    assert_eq!(restored.stop_loss, position.stop_loss);
    assert_eq!(restored.take_profit, position.take_profit);
    assert_eq!(restored.entry_time, position.entry_time);
    assert_eq!(restored.is_active, position.is_active);
}
