//! SEER — Prediction Market Arbitrage Scanner & Paper-Trading Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores open paper positions from the database, and runs the
//! scan → detect → filter → simulate loop with graceful shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use seer::alerts::{AlertEvent, AlertSink, NullAlerter, TelegramAlerter};
use seer::config::AppConfig;
use seer::engine::scanner::Scanner;
use seer::feed::{PolymarketFeed, TokenRegistry};
use seer::platforms::kalshi::KalshiAdapter;
use seer::platforms::polymarket::PolymarketAdapter;
use seer::platforms::predictit::PredictItAdapter;
use seer::platforms::MarketAdapter;
use seer::storage::Store;

const BANNER: &str = r#"
  ____  _____ _____ ____
 / ___|| ____| ____|  _ \
 \___ \|  _| |  _| | |_) |
  ___) | |___| |___|  _ <
 |____/|_____|_____|_| \_\

  Scan · Evaluate · Execute · Record
  v0.1.0 — Arbitrage Paper-Trading Engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    println!("{BANNER}");
    info!(
        mode = %cfg.scanner.mode,
        scan_interval_secs = cfg.scanner.scan_interval_secs,
        bankroll = %cfg.scanner.initial_bankroll,
        "SEER starting up"
    );

    // -- Platform adapters ------------------------------------------------

    let mut adapters: Vec<Arc<dyn MarketAdapter>> = Vec::new();
    let mut platform_names = Vec::new();
    if cfg.platforms.kalshi.enabled {
        adapters.push(Arc::new(KalshiAdapter::new(&cfg.platforms.kalshi)?));
        platform_names.push("Kalshi".to_string());
    }
    if cfg.platforms.polymarket.enabled {
        adapters.push(Arc::new(PolymarketAdapter::new(&cfg.platforms.polymarket)?));
        platform_names.push("Polymarket".to_string());
    }
    if cfg.platforms.predictit.enabled {
        adapters.push(Arc::new(PredictItAdapter::new(&cfg.platforms.predictit)?));
        platform_names.push("PredictIt".to_string());
    }
    if adapters.is_empty() {
        anyhow::bail!("no platforms enabled — nothing to scan");
    }
    info!(platforms = platform_names.join(" + "), "Adapters initialized");

    // -- Collaborators ----------------------------------------------------

    let store = match Store::connect(&cfg.storage.db_path).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            // Trading correctness beats audit durability: run without.
            error!(error = %e, "Database unavailable — continuing without persistence");
            None
        }
    };

    let alerts: Arc<dyn AlertSink> = match TelegramAlerter::from_config(&cfg.alerts) {
        Some(telegram) => {
            info!("📱 Telegram alerts enabled");
            Arc::new(telegram)
        }
        None => {
            warn!("Telegram credentials not set — alerts disabled");
            Arc::new(NullAlerter)
        }
    };

    // -- Scanner ----------------------------------------------------------

    let mut scanner = Scanner::new(cfg.clone(), adapters, alerts.clone(), store.clone())?;

    if let Some(store) = &store {
        match store.open_trades().await {
            Ok(positions) => scanner.restore_positions(positions),
            Err(e) => warn!(error = %e, "Could not restore open positions"),
        }
    }

    // Optional push feed: a second writer into the same quote cache.
    if cfg.feed.enabled {
        let registry = TokenRegistry::new();
        let feed = PolymarketFeed::new(&cfg.feed, scanner.cache(), registry);
        tokio::spawn(feed.run());
        info!("⚡ Polymarket push feed enabled");
    }

    let _ = alerts
        .send(&AlertEvent::Started {
            mode: cfg.scanner.trading_mode()?,
            bankroll: cfg.scanner.initial_bankroll,
            platforms: platform_names,
        })
        .await;

    // -- Main loop --------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.scanner.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.scanner.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // A cycle in flight commits atomically: shutdown is only
                // observed between ticks.
                match scanner.run_cycle().await {
                    Ok(report) => report.log(),
                    Err(e) => {
                        error!(error = %e, "Cycle failed — continuing to next");
                        scanner.record_cycle_error().await;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    let state = scanner.risk_state();
    info!(
        bankroll = %state.bankroll,
        total_pnl = %state.total_pnl(),
        open_positions = state.open_positions,
        win_rate = state.win_rate(),
        "SEER shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seer=info"));

    if std::env::var("SEER_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
