//! `health` subcommand: gateway and state-dir probe. Never places orders.

use anyhow::{bail, Result};
use std::sync::Arc;

use upbit_intraday::upbit::UpbitClient;
use upbit_intraday::StateStore;

pub async fn run(config_path: Option<String>) -> Result<()> {
    let config = super::load_config(config_path)?;

    let client = Arc::new(UpbitClient::new(config.exchange.clone(), None));
    let gateway_ok = client.health_check().await;
    println!("gateway: {}", if gateway_ok { "ok" } else { "UNREACHABLE" });

    let store_ok = StateStore::new(&config.runtime.data_dir).is_ok();
    println!(
        "state dir ({}): {}",
        config.runtime.data_dir,
        if store_ok { "ok" } else { "UNWRITABLE" }
    );

    if !gateway_ok || !store_ok {
        bail!("health check failed");
    }
    Ok(())
}
