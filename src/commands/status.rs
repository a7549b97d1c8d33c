//! `status` subcommand: print persisted state. Never touches trading
//! endpoints.

use anyhow::Result;
use std::collections::HashMap;

use upbit_intraday::risk::{DailyRisk, MarketRisk};
use upbit_intraday::types::{OrderResult, Position};
use upbit_intraday::StateStore;

pub fn run(config_path: Option<String>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = StateStore::new(&config.runtime.data_dir)?;

    let positions: HashMap<String, Position> = store.load("positions").unwrap_or_default();
    let orders: HashMap<String, OrderResult> = store.load("orders").unwrap_or_default();
    let daily: Option<DailyRisk> = store.load("daily_risk");
    let market_risks: HashMap<String, MarketRisk> = store.load("market_risk").unwrap_or_default();

    match &daily {
        Some(daily) => {
            println!("daily risk ({}):", daily.date);
            println!(
                "  balance {:.0} KRW, pnl {:+.0} ({:+.2}%), ddl_hit={}",
                daily.current_balance,
                daily.daily_pnl,
                daily.daily_pnl_pct * 100.0,
                daily.is_ddl_hit
            );
            println!(
                "  trades today: {} ({} losing)",
                daily.trades_today, daily.losing_trades_today
            );
        }
        None => println!("daily risk: no record"),
    }

    let active: Vec<&Position> = positions.values().filter(|p| p.is_active).collect();
    println!("\npositions: {} total, {} active", positions.len(), active.len());
    for position in active {
        println!(
            "  {} {} qty {:.6} @ {:.0} | stop {:?} target {:?} | unrealized {:+.0}",
            position.market,
            position.side,
            position.quantity,
            position.entry_price,
            position.stop_loss,
            position.take_profit,
            position.unrealized_pnl
        );
    }

    let banned: Vec<&MarketRisk> = market_risks.values().filter(|r| r.is_banned).collect();
    println!("\nmarket risk: {} markets tracked, {} banned", market_risks.len(), banned.len());
    for risk in banned {
        println!(
            "  {} banned until {:?} ({} consecutive losses)",
            risk.market, risk.ban_expiry_date, risk.consecutive_losses
        );
    }

    println!("\norders recorded: {}", orders.len());

    Ok(())
}
