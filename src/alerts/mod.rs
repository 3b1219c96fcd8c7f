//! Alert delivery.
//!
//! The scan loop emits `AlertEvent`s through the `AlertSink` trait and
//! moves on — delivery failures are logged by the caller and never
//! block or roll back anything. The Telegram implementation rate-limits
//! per opportunity so a persistent mispricing doesn't spam the channel
//! every cycle.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AlertsConfig;
use crate::types::{DetectionMode, Opportunity, Position, SeerError, TradingMode};

/// Everything the scan loop reports outward.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Started {
        mode: TradingMode,
        bankroll: Decimal,
        platforms: Vec<String>,
    },
    OpportunityDetected(Opportunity),
    PositionOpened {
        position: Position,
        bankroll: Decimal,
    },
    PositionResolved {
        position: Position,
        pnl: Decimal,
        won: bool,
        bankroll: Decimal,
    },
    Heartbeat {
        cycles: u64,
        opportunities: u64,
    },
    DailySummary {
        trades: u64,
        wins: u64,
        daily_pnl: Decimal,
        bankroll: Decimal,
    },
}

/// Sink for scan-loop events. Implementations must be safe to call
/// from the orchestrator without blocking it on delivery problems.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<(), SeerError>;
}

/// Sink that drops everything. Used in watch-only test setups and when
/// no Telegram credentials are configured.
pub struct NullAlerter;

#[async_trait]
impl AlertSink for NullAlerter {
    async fn send(&self, _event: &AlertEvent) -> Result<(), SeerError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

pub struct TelegramAlerter {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
    /// Only opportunities at or above this edge (percent) are pushed.
    min_edge_pct: f64,
    cooldown: Duration,
    /// Shorter window for fast-moving time-boxed markets.
    time_boxed_cooldown: Duration,
    /// Opportunity key -> last alert time.
    history: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl TelegramAlerter {
    /// Build from config, resolving the bot token and chat id from the
    /// environment. Returns `None` when either is unset — callers fall
    /// back to the `NullAlerter`.
    pub fn from_config(cfg: &AlertsConfig) -> Option<Self> {
        let token = std::env::var(&cfg.telegram_bot_token_env).ok()?;
        let chat_id = std::env::var(&cfg.telegram_chat_id_env).ok()?;

        Some(Self {
            http: Client::new(),
            bot_token: SecretString::new(token),
            chat_id,
            min_edge_pct: cfg.min_edge_pct,
            cooldown: Duration::seconds(cfg.cooldown_secs),
            time_boxed_cooldown: Duration::seconds(cfg.time_boxed_cooldown_secs),
            history: Mutex::new(HashMap::new()),
        })
    }

    /// Whether this opportunity clears the edge floor and isn't inside
    /// its cooldown window. Passing the check records the alert time.
    fn should_alert(&self, opp: &Opportunity) -> bool {
        if opp.net_edge * 100.0 < self.min_edge_pct {
            return false;
        }

        let window = if opp.mode == DetectionMode::TimeBoxed {
            self.time_boxed_cooldown
        } else {
            self.cooldown
        };

        let key = opp.dedup_key();
        let now = Utc::now();
        let mut history = self.history.lock().expect("alert history lock poisoned");
        if let Some(last) = history.get(&key) {
            if now - *last < window {
                return false;
            }
        }
        history.insert(key, now);
        true
    }

    fn format_event(event: &AlertEvent) -> String {
        match event {
            AlertEvent::Started {
                mode,
                bankroll,
                platforms,
            } => format!(
                "🔮 <b>SEER STARTED</b>\n\nMode: {mode}\nBankroll: ${bankroll:.2}\nPlatforms: {}",
                platforms.join(" + "),
            ),
            AlertEvent::OpportunityDetected(opp) => {
                let emoji = if opp.net_edge >= 0.05 {
                    "🔥"
                } else if opp.net_edge >= 0.03 {
                    "🎯"
                } else {
                    "📊"
                };
                format!(
                    "{emoji} <b>SEER ARBITRAGE ALERT</b>\n\n\
                     <b>📍 {}</b>\n\
                     Platform: {}\n\
                     Outcomes: {}\n\
                     Price sum: {:.1}%\n\n\
                     <b>💰 Strategy: {}</b>\n\
                     <b>Edge: ${:.2} per $100 (net {:.2}%)</b>\n\
                     <b>📅 Resolves in {} day(s)</b>",
                    truncate(&opp.title, 50),
                    opp.platform.to_uppercase(),
                    opp.num_outcomes,
                    opp.price_sum * 100.0,
                    opp.side,
                    opp.profit_per_100(),
                    opp.net_edge * 100.0,
                    opp.days_to_resolution(),
                )
            }
            AlertEvent::PositionOpened { position, bankroll } => format!(
                "📈 <b>PAPER TRADE EXECUTED</b>\n\n\
                 <b>{}</b>\n\
                 Platform: {}\n\
                 Strategy: {}\n\
                 Size: ${:.2}\n\
                 Bankroll: ${:.2}",
                truncate(&position.title, 50),
                position.platform.to_uppercase(),
                position.mode,
                position.stake,
                bankroll,
            ),
            AlertEvent::PositionResolved {
                position,
                pnl,
                won,
                bankroll,
            } => format!(
                "{} <b>PAPER TRADE {}</b>\n\n\
                 <b>{}</b>\n\
                 P&L: <b>${:+.2}</b>\n\
                 Bankroll: ${:.2}",
                if *won { "✅" } else { "❌" },
                if *won { "WIN" } else { "LOSS" },
                truncate(&position.title, 50),
                pnl,
                bankroll,
            ),
            AlertEvent::Heartbeat {
                cycles,
                opportunities,
            } => format!(
                "💓 <b>SEER HEARTBEAT</b>\n\n\
                 Scanner active and running\n\
                 Cycles completed: {cycles}\n\
                 Opportunities found: {opportunities}",
            ),
            AlertEvent::DailySummary {
                trades,
                wins,
                daily_pnl,
                bankroll,
            } => {
                let win_rate = if *trades > 0 {
                    *wins as f64 / *trades as f64 * 100.0
                } else {
                    0.0
                };
                format!(
                    "📈 <b>SEER DAILY SUMMARY</b>\n\n\
                     Trades: {trades}\n\
                     Win Rate: {win_rate:.1}%\n\
                     Daily P&L: <b>${daily_pnl:+.2}</b>\n\
                     Bankroll: ${bankroll:.2}",
                )
            }
        }
    }
}

#[async_trait]
impl AlertSink for TelegramAlerter {
    async fn send(&self, event: &AlertEvent) -> Result<(), SeerError> {
        if let AlertEvent::OpportunityDetected(opp) = event {
            if !self.should_alert(opp) {
                debug!(key = %opp.dedup_key(), "Alert suppressed (floor or cooldown)");
                return Ok(());
            }
        }

        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token.expose_secret(),
        );
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": Self::format_event(event),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SeerError::Alert(e.to_string()))?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Telegram rejected alert");
            return Err(SeerError::Alert(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
