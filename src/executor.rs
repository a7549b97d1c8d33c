//! Order executor
//!
//! Two backends behind one submit contract: a paper simulator (seeded RNG
//! fills with configurable delay, probability and adverse slippage) and a
//! live backend that posts limits to the venue and polls to completion.
//! The executor owns the order and position stores; every mutation is
//! flushed to disk before control returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrdersConfig;
use crate::risk::TradeRisk;
use crate::signals::Signal;
use crate::store::StateStore;
use crate::time_utils::kst_now;
use crate::types::{
    Market, OrderRequest, OrderResult, OrderStatus, OrderType, Position, Side, TimeInForce,
};
use crate::upbit::UpbitClient;

/// Upbit spot commission rate (0.05% of notional)
const COMMISSION_RATE: f64 = 0.0005;
/// Poll cadence while waiting on a live fill
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn is_paper(self) -> bool {
        matches!(self, TradingMode::Paper)
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

/// Aggregate execution statistics for the status surface
#[derive(Debug, Clone, Default, Serialize)]
pub struct TradingStatistics {
    pub orders_total: usize,
    pub orders_filled: usize,
    pub orders_cancelled: usize,
    pub orders_rejected: usize,
    pub total_volume_krw: f64,
    pub total_commission: f64,
    pub positions_total: usize,
    pub positions_active: usize,
    pub fill_rate: f64,
    pub avg_slippage_bp: f64,
    pub slippage_cap_breaches: u32,
}

pub struct OrderExecutor {
    config: OrdersConfig,
    mode: TradingMode,
    client: Option<Arc<UpbitClient>>,
    store: StateStore,
    orders: HashMap<String, OrderResult>,
    positions: HashMap<String, Position>,
    rng: StdRng,
    slippage_cap_breaches: u32,
}

impl OrderExecutor {
    /// Build the executor, restoring persisted orders and positions.
    /// Live mode requires a gateway client.
    pub fn new(
        config: OrdersConfig,
        mode: TradingMode,
        client: Option<Arc<UpbitClient>>,
        store: StateStore,
    ) -> anyhow::Result<Self> {
        if mode == TradingMode::Live && client.is_none() {
            anyhow::bail!("live trading mode requires a gateway client");
        }

        let rng = match config.paper_mode.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let orders = store.load("orders").unwrap_or_default();
        let positions = store.load("positions").unwrap_or_default();

        Ok(Self {
            config,
            mode,
            client,
            store,
            orders,
            positions,
            rng,
            slippage_cap_breaches: 0,
        })
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    fn flush(&self) {
        self.store.save("orders", &self.orders);
        self.store.save("positions", &self.positions);
    }

    /// Flag fills whose measured slippage exceeds the cap. Alert-only:
    /// recorded and logged, never unwound here.
    fn check_slippage_cap(&mut self, result: &OrderResult) {
        if result.status == OrderStatus::Filled && result.slippage_bp > self.config.slippage_bp_max
        {
            self.slippage_cap_breaches += 1;
            warn!(
                order_id = %result.order_id,
                market = %result.market,
                slippage_bp = result.slippage_bp,
                cap = self.config.slippage_bp_max,
                breaches = self.slippage_cap_breaches,
                "fill exceeded slippage cap"
            );
        }
    }

    /// Submit an order through the active backend. Failures come back as
    /// rejected results, never as errors; persistence flushes afterwards.
    pub async fn submit_order(&mut self, request: OrderRequest) -> OrderResult {
        info!(
            order_id = %request.order_id,
            market = %request.market,
            side = %request.side,
            quantity = request.quantity,
            price = ?request.price,
            order_type = ?request.order_type,
            mode = %self.mode,
            "submitting order"
        );

        let result = match self.mode {
            TradingMode::Paper => self.execute_paper_order(&request).await,
            TradingMode::Live => self.execute_live_order(&request).await,
        };

        self.check_slippage_cap(&result);
        self.orders.insert(result.order_id.clone(), result.clone());
        self.flush();

        info!(
            order_id = %result.order_id,
            status = ?result.status,
            filled = result.quantity_filled,
            price = ?result.price_filled,
            slippage_bp = result.slippage_bp,
            commission = result.commission,
            "order complete"
        );
        result
    }

    /// Paper backend: uniform delay, fill probability, adverse slippage
    async fn execute_paper_order(&mut self, request: &OrderRequest) -> OrderResult {
        let paper = &self.config.paper_mode;
        let submit_time = kst_now();

        let delay_ms = self
            .rng
            .gen_range(paper.fill_delay_ms[0]..=paper.fill_delay_ms[1]);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        let filled = self.rng.gen::<f64>() < paper.fill_probability;
        if !filled {
            debug!(order_id = %request.order_id, "paper order expired unfilled");
            return OrderResult {
                order_id: request.order_id.clone(),
                status: OrderStatus::Expired,
                market: request.market.clone(),
                side: request.side,
                order_type: request.order_type,
                quantity_requested: request.quantity,
                quantity_filled: 0.0,
                quantity_remaining: request.quantity,
                price_requested: request.price,
                price_filled: None,
                submit_time,
                fill_time: None,
                commission: 0.0,
                slippage_bp: 0.0,
                is_paper_trade: true,
                simulated_delay_ms: delay_ms,
                error_message: None,
            };
        }

        let mut slippage_bp = 0.0;
        let fill_price = request.price.map(|price| {
            if paper.simulate_slippage {
                slippage_bp = self
                    .rng
                    .gen_range(paper.slippage_bp_range[0]..=paper.slippage_bp_range[1]);
                // Adverse to the order side
                match request.side {
                    Side::Buy => price * (1.0 + slippage_bp / 10_000.0),
                    Side::Sell => price * (1.0 - slippage_bp / 10_000.0),
                }
            } else {
                price
            }
        });

        let commission = request.quantity * fill_price.unwrap_or(0.0) * COMMISSION_RATE;

        OrderResult {
            order_id: request.order_id.clone(),
            status: OrderStatus::Filled,
            market: request.market.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity_requested: request.quantity,
            quantity_filled: request.quantity,
            quantity_remaining: 0.0,
            price_requested: request.price,
            price_filled: fill_price,
            submit_time,
            fill_time: Some(kst_now()),
            commission,
            slippage_bp,
            is_paper_trade: true,
            simulated_delay_ms: delay_ms,
            error_message: None,
        }
    }

    fn venue_order_type(order_type: OrderType) -> &'static str {
        // The venue has no native stop orders: stops and take-profits are
        // posted as plain limits and supervised client-side.
        match order_type {
            OrderType::Market => "market",
            OrderType::Limit | OrderType::StopLoss | OrderType::TakeProfit => "limit",
        }
    }

    /// Live backend: submit via the gateway and poll until done, cancelled
    /// or timed out. Gateway errors become rejected results; no retry here.
    async fn execute_live_order(&mut self, request: &OrderRequest) -> OrderResult {
        let client = self.client.as_ref().expect("live mode has a client").clone();
        let submit_time = kst_now();

        let side = match request.side {
            Side::Buy => "bid",
            Side::Sell => "ask",
        };
        let ord_type = Self::venue_order_type(request.order_type);
        let volume = format!("{}", request.quantity);
        let price = request.price.map(|p| format!("{}", p));
        let time_in_force = match request.time_in_force {
            TimeInForce::Ioc => Some("ioc"),
            TimeInForce::Fok => Some("fok"),
            TimeInForce::Gtc => None,
        };

        let placed = client
            .place_order(
                request.market.as_str(),
                side,
                ord_type,
                Some(&volume),
                price.as_deref(),
                time_in_force,
            )
            .await;

        let venue_uuid = match placed {
            Ok(info) => info.uuid,
            Err(e) => {
                error!(order_id = %request.order_id, error = %e, "order placement failed");
                return rejected_result(request, submit_time, e.to_string());
            }
        };

        self.wait_for_fill(&client, request, &venue_uuid, submit_time)
            .await
    }

    /// Poll the venue every second until the order finishes or the fill
    /// timeout lapses, cancelling on expiry
    async fn wait_for_fill(
        &self,
        client: &UpbitClient,
        request: &OrderRequest,
        venue_uuid: &str,
        submit_time: chrono::DateTime<chrono::FixedOffset>,
    ) -> OrderResult {
        let timeout = Duration::from_secs(self.config.fill_timeout_seconds);
        let started = tokio::time::Instant::now();

        loop {
            if started.elapsed() > timeout {
                let status = match client.cancel_order(venue_uuid).await {
                    Ok(_) => OrderStatus::Cancelled,
                    Err(e) => {
                        warn!(venue_uuid, error = %e, "cancel on fill timeout failed");
                        OrderStatus::Expired
                    }
                };
                let mut result =
                    rejected_result(request, submit_time, "fill timeout".to_string());
                result.status = status;
                return result;
            }

            match client.get_order(venue_uuid).await {
                Ok(info) if info.is_done() => {
                    let fill_price = info.weighted_fill_price();
                    let filled_volume = info.filled_volume();

                    let slippage_bp = match (request.price, fill_price) {
                        (Some(requested), Some(filled)) if requested > 0.0 => {
                            (filled - requested).abs() / requested * 10_000.0
                        }
                        _ => 0.0,
                    };

                    return OrderResult {
                        order_id: request.order_id.clone(),
                        status: OrderStatus::Filled,
                        market: request.market.clone(),
                        side: request.side,
                        order_type: request.order_type,
                        quantity_requested: request.quantity,
                        quantity_filled: filled_volume,
                        quantity_remaining: (request.quantity - filled_volume).max(0.0),
                        price_requested: request.price,
                        price_filled: fill_price,
                        submit_time,
                        fill_time: Some(kst_now()),
                        commission: info.paid_fee_f64(),
                        slippage_bp,
                        is_paper_trade: false,
                        simulated_delay_ms: 0,
                        error_message: None,
                    };
                }
                Ok(info) if info.is_cancelled() => {
                    let mut result =
                        rejected_result(request, submit_time, "cancelled at venue".to_string());
                    result.status = OrderStatus::Cancelled;
                    result.error_message = None;
                    return result;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(venue_uuid, error = %e, "order status poll failed");
                }
            }

            tokio::time::sleep(FILL_POLL_INTERVAL).await;
        }
    }

    /// Bracket flow: entry limit at the signal price; on fill, create the
    /// position, attach the exit levels and allocate local stop/TP ids.
    pub async fn execute_signal_trade(
        &mut self,
        signal: &Signal,
        trade_risk: &TradeRisk,
    ) -> (Option<Position>, Vec<OrderResult>) {
        let side = signal.direction.entry_side();
        let entry_order_id = Uuid::new_v4().to_string();

        let entry_request = OrderRequest {
            order_id: entry_order_id.clone(),
            market: signal.market.clone(),
            side,
            order_type: OrderType::Limit,
            quantity: trade_risk.position_size,
            price: Some(signal.entry_price),
            time_in_force: self.config.time_in_force,
            signal_reference: Some(signal.kind_label()),
        };

        let entry_result = self.submit_order(entry_request).await;
        let orders = vec![entry_result.clone()];

        if entry_result.status != OrderStatus::Filled {
            warn!(
                market = %signal.market,
                status = ?entry_result.status,
                "entry order did not fill, no position created"
            );
            return (None, orders);
        }

        let mut position = Position {
            market: signal.market.clone(),
            side,
            entry_price: entry_result.price_filled.unwrap_or(signal.entry_price),
            quantity: entry_result.quantity_filled,
            entry_time: entry_result.fill_time.unwrap_or_else(kst_now),
            entry_order_id: entry_order_id.clone(),
            stop_loss_order_id: None,
            take_profit_order_id: None,
            stop_loss: Some(signal.stop_loss),
            take_profit: Some(signal.take_profit),
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            is_active: true,
            exit_time: None,
            exit_price: None,
            exit_reason: None,
        };

        // The venue cannot hold an atomic bracket; exits live on the
        // position and are supervised by the monitor loop.
        position.stop_loss_order_id = Some(Uuid::new_v4().to_string());
        position.take_profit_order_id = Some(Uuid::new_v4().to_string());

        if self.mode == TradingMode::Live {
            warn!(
                market = %signal.market,
                "live position open without venue-side stop; exit relies on the client monitor"
            );
        }

        info!(
            market = %signal.market,
            side = %side,
            entry = position.entry_price,
            quantity = position.quantity,
            stop = ?position.stop_loss,
            target = ?position.take_profit,
            "position opened"
        );

        self.positions.insert(position.id(), position.clone());
        self.flush();

        (Some(position), orders)
    }

    /// Close an active position with an opposite limit at the given price.
    /// On fill the position is finalized with realized P&L net of the
    /// close commission.
    pub async fn close_position(
        &mut self,
        position_id: &str,
        current_price: f64,
        reason: &str,
    ) -> Option<OrderResult> {
        let position = match self.positions.get(position_id) {
            Some(p) if p.is_active => p.clone(),
            _ => return None,
        };

        let close_request = OrderRequest {
            order_id: Uuid::new_v4().to_string(),
            market: position.market.clone(),
            side: position.side.opposite(),
            order_type: OrderType::Limit,
            quantity: position.quantity,
            price: Some(current_price),
            time_in_force: self.config.time_in_force,
            signal_reference: Some(format!("close_{}", reason)),
        };

        let close_result = self.submit_order(close_request).await;

        if close_result.status == OrderStatus::Filled {
            let exit_price = close_result.price_filled.unwrap_or(current_price);
            let gross_pnl = match position.side {
                Side::Buy => (exit_price - position.entry_price) * position.quantity,
                Side::Sell => (position.entry_price - exit_price) * position.quantity,
            };

            let stored = self
                .positions
                .get_mut(position_id)
                .expect("position exists");
            stored.is_active = false;
            stored.exit_time = close_result.fill_time;
            stored.exit_price = Some(exit_price);
            stored.exit_reason = Some(reason.to_string());
            stored.realized_pnl = gross_pnl - close_result.commission;
            stored.unrealized_pnl = 0.0;

            info!(
                market = %position.market,
                entry = position.entry_price,
                exit = exit_price,
                realized_pnl = stored.realized_pnl,
                reason,
                "position closed"
            );
            self.flush();
        } else {
            warn!(
                market = %position.market,
                status = ?close_result.status,
                "close order did not fill, position remains open"
            );
        }

        Some(close_result)
    }

    /// Refresh a position's unrealized P&L against the latest price
    pub fn update_unrealized(&mut self, position_id: &str, current_price: f64) {
        if let Some(position) = self.positions.get_mut(position_id) {
            if position.is_active {
                position.unrealized_pnl = position.unrealized_at(current_price);
            }
        }
    }

    /// Value-copy snapshot of active positions
    pub fn active_positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect()
    }

    pub fn position(&self, position_id: &str) -> Option<&Position> {
        self.positions.get(position_id)
    }

    /// Whether a market currently has an active position
    pub fn has_active_position(&self, market: &Market) -> bool {
        self.positions
            .values()
            .any(|p| p.is_active && &p.market == market)
    }

    /// Closed positions with their realized results
    pub fn closed_positions(&self) -> Vec<Position> {
        self.positions
            .values()
            .filter(|p| !p.is_active)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> TradingStatistics {
        let all: Vec<&OrderResult> = self.orders.values().collect();
        let filled: Vec<&&OrderResult> = all
            .iter()
            .filter(|o| o.status == OrderStatus::Filled)
            .collect();

        let total_volume_krw = filled
            .iter()
            .map(|o| o.quantity_filled * o.price_filled.unwrap_or(0.0))
            .sum();
        let total_commission = filled.iter().map(|o| o.commission).sum();
        let avg_slippage_bp = if filled.is_empty() {
            0.0
        } else {
            filled.iter().map(|o| o.slippage_bp).sum::<f64>() / filled.len() as f64
        };

        TradingStatistics {
            orders_total: all.len(),
            orders_filled: filled.len(),
            orders_cancelled: all
                .iter()
                .filter(|o| o.status == OrderStatus::Cancelled)
                .count(),
            orders_rejected: all
                .iter()
                .filter(|o| o.status == OrderStatus::Rejected)
                .count(),
            total_volume_krw,
            total_commission,
            positions_total: self.positions.len(),
            positions_active: self.active_positions().len(),
            fill_rate: filled.len() as f64 / all.len().max(1) as f64,
            avg_slippage_bp,
            slippage_cap_breaches: self.slippage_cap_breaches,
        }
    }
}

fn rejected_result(
    request: &OrderRequest,
    submit_time: chrono::DateTime<chrono::FixedOffset>,
    error: String,
) -> OrderResult {
    OrderResult {
        order_id: request.order_id.clone(),
        status: OrderStatus::Rejected,
        market: request.market.clone(),
        side: request.side,
        order_type: request.order_type,
        quantity_requested: request.quantity,
        quantity_filled: 0.0,
        quantity_remaining: request.quantity,
        price_requested: request.price,
        price_filled: None,
        submit_time,
        fill_time: None,
        commission: 0.0,
        slippage_bp: 0.0,
        is_paper_trade: false,
        simulated_delay_ms: 0,
        error_message: Some(error),
    }
}
