//! Telegram push notifier
//!
//! Optional alert channel for trade fills, risk transitions and system
//! status. Constructed once at boot from environment variables and passed
//! into the orchestrator; a send failure is logged and never disturbs the
//! trading path.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::risk::RiskAlert;
use crate::types::Market;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: Client,
}

impl TelegramNotifier {
    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`; absent
    /// credentials simply disable push alerts
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        if token.is_empty() || chat_id.is_empty() {
            return None;
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()?;

        info!("telegram notifier enabled");
        Some(Self {
            token,
            chat_id,
            client,
        })
    }

    async fn send(&self, text: &str) {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("telegram notification sent");
            }
            Ok(response) => {
                warn!(status = %response.status(), "telegram notification rejected");
            }
            Err(e) => {
                warn!(error = %e, "telegram notification failed");
            }
        }
    }

    /// Entry or exit fill
    pub async fn send_trade(
        &self,
        action: &str,
        market: &Market,
        quantity: f64,
        price: f64,
        strategy: &str,
        is_paper: bool,
    ) {
        let mode = if is_paper { "[PAPER]" } else { "[LIVE]" };
        let text = format!(
            "{} <b>{}</b> {}\nqty {:.6} @ {:.0} KRW\nstrategy: {}",
            mode,
            action.to_uppercase(),
            market,
            quantity,
            price,
            strategy
        );
        self.send(&text).await;
    }

    /// Critical risk transition from the guard
    pub async fn send_risk_alert(&self, alert: &RiskAlert) {
        let text = match alert {
            RiskAlert::DailyDrawdownLimit {
                daily_pnl,
                daily_pnl_pct,
            } => format!(
                "\u{1F6A8} <b>DAILY DRAWDOWN LIMIT</b>\nloss {:.0} KRW ({:.2}%)\nnew entries suspended for today",
                daily_pnl,
                daily_pnl_pct * 100.0
            ),
            RiskAlert::MarketBanned {
                market,
                consecutive_losses,
                ban_expiry,
            } => format!(
                "\u{26A0} <b>MARKET BANNED</b>\n{} after {} consecutive losses\nban expires {}",
                market, consecutive_losses, ban_expiry
            ),
        };
        self.send(&text).await;
    }

    /// Session start/stop
    pub async fn send_system_status(&self, status: &str, uptime_minutes: f64) {
        let text = format!(
            "\u{2699} trading system <b>{}</b> (uptime {:.0} min)",
            status, uptime_minutes
        );
        self.send(&text).await;
    }
}
