//! `run` subcommand: the orchestrator loop
//!
//! Live mode demands a typed confirmation plus a countdown before any
//! order can reach the venue.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use upbit_intraday::config::Credentials;
use upbit_intraday::notifier::TelegramNotifier;
use upbit_intraday::upbit::UpbitClient;
use upbit_intraday::{TradingMode, TradingSystem};

const LIVE_CONFIRMATION_PHRASE: &str = "LIVE";
const LIVE_COUNTDOWN_SECS: u64 = 10;

fn parse_mode(mode: &str) -> Result<TradingMode> {
    match mode.to_ascii_lowercase().as_str() {
        "paper" => Ok(TradingMode::Paper),
        "live" => Ok(TradingMode::Live),
        other => bail!("unknown trading mode '{}', expected paper or live", other),
    }
}

/// Double confirmation for live mode: type the phrase, then survive the
/// countdown with a chance to Ctrl+C out
async fn confirm_live() -> Result<()> {
    warn!("LIVE TRADING MODE - REAL MONEY AT RISK");
    print!(
        "Type {} to confirm live trading with real funds: ",
        LIVE_CONFIRMATION_PHRASE
    );
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    if input.trim() != LIVE_CONFIRMATION_PHRASE {
        bail!("live trading not confirmed");
    }

    warn!(
        "starting live trading in {} seconds, Ctrl+C to abort",
        LIVE_COUNTDOWN_SECS
    );
    for remaining in (1..=LIVE_COUNTDOWN_SECS).rev() {
        info!("starting in {}s...", remaining);
        sleep(Duration::from_secs(1)).await;
    }
    Ok(())
}

pub async fn run(config_path: Option<String>, mode: String, duration: i64) -> Result<()> {
    let config = super::load_config(config_path)?;
    let mode = parse_mode(&mode)?;

    // TRADING_MODE=paper in the environment overrides a live request
    if let Ok(env_mode) = std::env::var("TRADING_MODE") {
        if env_mode == "paper" && mode == TradingMode::Live {
            bail!("TRADING_MODE=paper forbids --mode live");
        }
    }

    let credentials = Credentials::from_env();
    if mode == TradingMode::Live {
        if credentials.is_none() {
            bail!("live mode requires UPBIT_ACCESS_KEY and UPBIT_SECRET_KEY");
        }
        confirm_live().await?;
    }

    let client = Arc::new(UpbitClient::new(config.exchange.clone(), credentials));
    let notifier = TelegramNotifier::from_env();

    let mut system = TradingSystem::new(config, mode, client, notifier)
        .context("failed to build trading system")?;
    system.initialize().await?;

    // Ctrl+C cuts the loop at the next tick boundary
    let stop = system.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                stop.store(true, Ordering::SeqCst);
            }
            Err(e) => error!(error = %e, "failed to install signal handler"),
        }
    });

    system.run(duration).await?;
    info!("session ended cleanly");
    Ok(())
}
