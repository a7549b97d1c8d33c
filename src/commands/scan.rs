//! `scan` subcommand: one market scan, print ranked candidates

use anyhow::{Context, Result};
use std::sync::Arc;
use upbit_intraday::upbit::UpbitClient;
use upbit_intraday::CandidateScanner;

pub async fn run(config_path: Option<String>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client = Arc::new(UpbitClient::new(config.exchange.clone(), None));
    let scanner = CandidateScanner::new(config, client);

    let result = scanner.scan().await.context("market scan failed")?;

    println!(
        "scanned {} markets, {} processed, {} passed filters ({:.2}s)",
        result.total_markets,
        result.processed_markets,
        result.filtered_markets,
        result.scan_duration_seconds
    );

    if result.candidates.is_empty() {
        println!("no candidates passed the filters");
        return Ok(());
    }

    println!(
        "{:<12} {:>8} {:>8} {:>8} {:>6} {:>8} {:>10} {:>14}",
        "market", "score", "rvol", "rs", "trend", "depth", "spread_bp", "price"
    );
    for candidate in &result.candidates {
        println!(
            "{:<12} {:>8.3} {:>8.2} {:>8.4} {:>6} {:>8.2} {:>10.2} {:>14.0}",
            candidate.market,
            candidate.final_score,
            candidate.rvol,
            candidate.relative_strength,
            candidate.trend,
            candidate.depth_score,
            candidate.spread_bp,
            candidate.price
        );
    }

    Ok(())
}
