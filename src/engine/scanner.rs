//! Scanner orchestrator — the poll-cycle control loop.
//!
//! One cycle per interval: roll the risk day, resolve due positions,
//! fan out to every platform adapter in parallel (each bounded by its
//! own timeout), merge quotes into the cache, snapshot, and drive
//! detector → estimator → scorer → correlation → risk → ledger for
//! each surviving candidate in descending net-edge order. Events flow
//! out to the alert sink and the store; neither is allowed to fail the
//! cycle.
//!
//! Candidate evaluation is serialized on purpose: the best edge gets
//! first claim on the limited position-count and exposure budget, and
//! every risk check commits in the same call that grants it.

use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertEvent, AlertSink};
use crate::config::AppConfig;
use crate::engine::cache::QuoteCache;
use crate::engine::correlation::{Approval, CorrelationChecker};
use crate::engine::detector::Detector;
use crate::engine::estimator::Estimator;
use crate::engine::ledger::PaperLedger;
use crate::engine::risk::RiskManager;
use crate::engine::scorer::score_market;
use crate::platforms::{AdapterError, MarketAdapter};
use crate::storage::Store;
use crate::types::{d, Market, Opportunity, OutcomeKey, Position, RiskState, TradingMode};

/// Summary of one completed poll cycle.
#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub markets_fetched: usize,
    pub adapter_failures: usize,
    pub opportunities: usize,
    pub opened: usize,
    pub resolved: usize,
    pub halted: bool,
}

impl CycleReport {
    pub fn log(&self) {
        info!(
            cycle = self.cycle,
            markets = self.markets_fetched,
            failures = self.adapter_failures,
            opportunities = self.opportunities,
            opened = self.opened,
            resolved = self.resolved,
            halted = self.halted,
            "Cycle complete"
        );
    }
}

pub struct Scanner {
    cfg: AppConfig,
    mode: TradingMode,
    adapters: Vec<Arc<dyn MarketAdapter>>,
    cache: QuoteCache,
    detector: Detector,
    estimator: Estimator,
    correlation: CorrelationChecker,
    risk: RiskManager,
    ledger: PaperLedger,
    alerts: Arc<dyn AlertSink>,
    store: Option<Arc<Store>>,
    /// Latest metadata per market; the quotes themselves live in the
    /// cache and are re-applied from the snapshot each cycle.
    markets: HashMap<String, Market>,
    cycle_count: u64,
    opportunities_found: u64,
    consecutive_errors: u32,
    last_heartbeat: chrono::DateTime<Utc>,
}

impl Scanner {
    pub fn new(
        cfg: AppConfig,
        adapters: Vec<Arc<dyn MarketAdapter>>,
        alerts: Arc<dyn AlertSink>,
        store: Option<Arc<Store>>,
    ) -> anyhow::Result<Self> {
        let mode = cfg.scanner.trading_mode()?;
        let detector = Detector::new(
            cfg.arbitrage.clone(),
            chrono::Duration::seconds(cfg.scanner.quote_max_age_secs),
            chrono::Duration::seconds(cfg.scanner.time_boxed_max_age_secs),
        );
        let estimator = Estimator::new(cfg.arbitrage.min_net_profit, cfg.fees.clone());
        let correlation =
            CorrelationChecker::new(cfg.risk.max_correlation, cfg.risk.max_group_exposure);
        let risk = RiskManager::new(
            cfg.risk.clone(),
            cfg.sizing.clone(),
            RiskState::new(cfg.scanner.initial_bankroll),
        );

        Ok(Self {
            cfg,
            mode,
            adapters,
            cache: QuoteCache::new(),
            detector,
            estimator,
            correlation,
            risk,
            ledger: PaperLedger::new(),
            alerts,
            store,
            markets: HashMap::new(),
            cycle_count: 0,
            opportunities_found: 0,
            consecutive_errors: 0,
            last_heartbeat: Utc::now(),
        })
    }

    /// Handle for concurrent writers (the push feed) that must share
    /// the scanner's quote store.
    pub fn cache(&self) -> QuoteCache {
        self.cache.clone()
    }

    pub fn risk_state(&self) -> &RiskState {
        self.risk.state()
    }

    /// Re-seed the ledger and risk accounting from positions persisted
    /// by a previous run.
    pub fn restore_positions(&mut self, positions: Vec<Position>) {
        if positions.is_empty() {
            return;
        }
        info!(count = positions.len(), "♻️  Restored open paper positions");
        for position in positions {
            self.risk.restore_open(position.stake);
            self.ledger.restore(position);
        }
    }

    /// Execute one full poll cycle.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let now = Utc::now();
        let mut report = CycleReport {
            cycle: self.cycle_count + 1,
            ..CycleReport::default()
        };

        // 1. Day boundary: summarize yesterday, then reset.
        if now.date_naive() > self.risk.state().day {
            self.emit_daily_summary().await;
            self.risk.roll_day(now.date_naive());
        }

        // 2. Resolve positions whose market has reached its deadline.
        report.resolved = self.resolve_due_positions(now).await;

        // 3. Kill switch: halted means no new trading, but resolution
        //    above still ran and open positions stay tracked.
        if let Some(reason) = self.risk.check_kill_switch() {
            warn!(reason = %reason, "Scanner halted — skipping detection");
            report.halted = true;
            self.cycle_count += 1;
            return Ok(report);
        }

        // 4. Fan out to all adapters, fan in results and failures.
        let (fetched, failures) = self.fetch_all_platforms().await;
        report.adapter_failures = failures;
        report.markets_fetched = fetched.len();

        // 5. Merge into the cache; quotes enter whole or not at all.
        for market in fetched {
            self.merge_market(market);
        }
        self.cache.evict_stale(chrono::Duration::seconds(
            self.cfg.scanner.quote_max_age_secs * 10,
        ));

        // 6. Snapshot and run the pure transform chain.
        let candidates = self.collect_candidates();

        // 7. Serialized approval in descending net-edge order.
        let mut seen: HashSet<String> = HashSet::new();
        for (opportunity, score) in candidates {
            if !seen.insert(opportunity.dedup_key()) {
                continue; // tie on the same market+mode this cycle
            }
            report.opportunities += 1;
            self.opportunities_found += 1;

            if self.try_execute(&opportunity, score).await {
                report.opened += 1;
            }
        }

        // Periodic heartbeat and metrics snapshot.
        self.emit_heartbeat(now).await;
        if let Some(store) = self.store.clone() {
            if let Err(e) = store.log_metrics(self.risk.state()).await {
                warn!(error = %e, "Metrics snapshot failed");
            }
        }

        self.cycle_count += 1;
        self.consecutive_errors = 0;
        Ok(report)
    }

    /// Count a failed cycle; repeated failures trip the emergency stop
    /// rather than killing the process.
    pub async fn record_cycle_error(&mut self) {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.cfg.risk.max_consecutive_errors
            && !self.risk.is_halted()
        {
            error!(
                errors = self.consecutive_errors,
                "🛑 Too many consecutive cycle errors"
            );
            self.risk.emergency_stop("too many consecutive errors");
            self.log_halt().await;
        }
    }

    // -- Cycle stages -----------------------------------------------------

    async fn resolve_due_positions(&mut self, now: chrono::DateTime<Utc>) -> usize {
        let was_halted = self.risk.is_halted();
        let resolutions = self.ledger.resolve_due(now);
        for resolution in &resolutions {
            let position = &resolution.position;
            self.risk.record_resolution(
                &position.market_id,
                position.stake,
                resolution.pnl,
                resolution.won,
            );

            if let Some(store) = self.store.clone() {
                if let Err(e) = store
                    .mark_trade_resolved(
                        &position.id,
                        position.status,
                        resolution.pnl.to_f64().unwrap_or(0.0),
                        resolution.won,
                    )
                    .await
                {
                    warn!(error = %e, position = %position.id, "Failed to persist resolution");
                }
            }

            self.emit(AlertEvent::PositionResolved {
                position: position.clone(),
                pnl: resolution.pnl,
                won: resolution.won,
                bankroll: self.risk.state().bankroll,
            })
            .await;
        }

        // Realized losses may have tripped the kill switch just now.
        if !was_halted && self.risk.is_halted() {
            self.log_halt().await;
        }
        resolutions.len()
    }

    /// One task per adapter, each under its own timeout. A platform
    /// failing — or timing out — never blocks the others.
    async fn fetch_all_platforms(&self) -> (Vec<Market>, usize) {
        let timeout = StdDuration::from_secs(self.cfg.scanner.adapter_timeout_secs);
        let tasks: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    let name = adapter.name().to_string();
                    let result = match tokio::time::timeout(timeout, adapter.fetch_markets()).await
                    {
                        Ok(r) => r,
                        Err(_) => Err(AdapterError::Timeout {
                            platform: name.clone(),
                        }),
                    };
                    (name, result)
                })
            })
            .collect();

        let mut markets = Vec::new();
        let mut failures = 0;
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok((name, Ok(batch))) => {
                    debug!(platform = %name, count = batch.len(), "Markets fetched");
                    markets.extend(batch);
                }
                Ok((name, Err(e))) => {
                    failures += 1;
                    if e.is_retryable() {
                        warn!(platform = %name, error = %e, "Fetch failed, will retry next cycle");
                    } else {
                        // Needs external credential refresh; keep running.
                        error!(platform = %name, error = %e, "Adapter degraded");
                    }
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "Adapter task panicked");
                }
            }
        }
        (markets, failures)
    }

    fn merge_market(&mut self, market: Market) {
        for outcome in &market.outcomes {
            if let Some(quote) = &outcome.quote {
                self.cache.upsert(
                    OutcomeKey::new(&market.platform, &market.id, &outcome.id),
                    quote.clone(),
                );
            }
        }
        self.markets
            .insert(Self::market_key(&market.platform, &market.id), market);
    }

    fn market_key(platform: &str, market_id: &str) -> String {
        format!("{platform}::{market_id}")
    }

    /// Snapshot the cache, rebuild per-market views, and run
    /// detector → estimator → scorer. Returns surviving candidates
    /// with their quality scores, best net edge first.
    fn collect_candidates(&self) -> Vec<(Opportunity, f64)> {
        let snapshot = self.cache.snapshot(chrono::Duration::seconds(
            self.cfg.scanner.quote_max_age_secs,
        ));

        let mut candidates = Vec::new();
        for market in self.markets.values() {
            if market.deadline <= Utc::now() {
                continue;
            }
            let mut view = market.clone();
            for outcome in &mut view.outcomes {
                outcome.quote = snapshot
                    .get(&OutcomeKey::new(&view.platform, &view.id, &outcome.id))
                    .cloned();
            }

            for detected in self.detector.detect(&view) {
                let Some(opportunity) = self.estimator.evaluate(detected) else {
                    continue; // edge does not survive fees and spread
                };
                let score = score_market(&view);
                if score < self.cfg.quality.min_market_score {
                    debug!(market = %view.id, score, "Opportunity dropped on quality score");
                    continue;
                }
                candidates.push((opportunity, score));
            }
        }

        candidates.sort_by(|a, b| {
            b.0.net_edge
                .partial_cmp(&a.0.net_edge)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Alert, persist, and (in paper mode) run a candidate through the
    /// serialized correlation → risk → ledger path. Returns true when
    /// a position was opened.
    async fn try_execute(&mut self, opportunity: &Opportunity, score: f64) -> bool {
        info!(opportunity = %opportunity, score, "🎯 Opportunity");
        self.emit(AlertEvent::OpportunityDetected(opportunity.clone()))
            .await;

        let executed = if self.mode == TradingMode::Paper {
            self.open_paper_position(opportunity).await
        } else {
            false // watch mode stops after the alert
        };

        if let Some(store) = self.store.clone() {
            if let Err(e) = store.log_opportunity(opportunity, score, executed).await {
                warn!(error = %e, "Failed to persist opportunity");
            }
        }
        executed
    }

    async fn open_paper_position(&mut self, opportunity: &Opportunity) -> bool {
        if self
            .ledger
            .has_open(&opportunity.market_id, opportunity.mode)
        {
            debug!(key = %opportunity.dedup_key(), "Position already open");
            return false;
        }

        let proposed = self.proposed_stake(opportunity);
        let open_positions = self.ledger.open_positions();
        match self.correlation.check(
            &open_positions,
            opportunity,
            proposed,
            self.risk.state().bankroll,
        ) {
            Approval::Approve => {}
            Approval::Reject(reason) => {
                info!(reason = %reason, "Candidate rejected by correlation check");
                return false;
            }
        }

        let granted = match self.risk.approve_open(&opportunity.market_id, proposed) {
            Ok(granted) => {
                if let Some(note) = &granted.adjusted {
                    info!(note = %note, "Position size adjusted");
                }
                granted
            }
            Err(reason) => {
                info!(reason = %reason, "Candidate rejected by risk manager");
                return false;
            }
        };

        let position = self.ledger.open(opportunity, granted.stake);

        if let Some(store) = self.store.clone() {
            if let Err(e) = store.log_trade(&position).await {
                warn!(error = %e, position = %position.id, "Failed to persist trade");
            }
        }
        self.emit(AlertEvent::PositionOpened {
            position,
            bankroll: self.risk.state().bankroll,
        })
        .await;
        true
    }

    /// Base stake scaled by how many times the edge clears the floor,
    /// clamped to the configured fraction band. The risk manager
    /// applies the absolute caps afterwards.
    fn proposed_stake(&self, opportunity: &Opportunity) -> Decimal {
        let min_profit = self.cfg.arbitrage.min_profit.max(0.0001);
        let edge_multiple = (opportunity.net_edge / min_profit).max(1.0);
        let fraction = (self.cfg.sizing.base_position_size * edge_multiple).clamp(
            self.cfg.sizing.min_position_size,
            self.cfg.sizing.max_position_size,
        );
        d(fraction) * self.risk.state().bankroll
    }

    // -- Event plumbing ---------------------------------------------------

    /// Deliver one event; failures are logged and dropped, never
    /// propagated into the cycle.
    async fn emit(&self, event: AlertEvent) {
        if let Err(e) = self.alerts.send(&event).await {
            warn!(error = %e, "Alert delivery failed");
        }
    }

    async fn emit_heartbeat(&mut self, now: chrono::DateTime<Utc>) {
        let interval = chrono::Duration::seconds(self.cfg.alerts.heartbeat_interval_secs as i64);
        if now - self.last_heartbeat < interval {
            return;
        }
        self.last_heartbeat = now;
        self.emit(AlertEvent::Heartbeat {
            cycles: self.cycle_count,
            opportunities: self.opportunities_found,
        })
        .await;
    }

    async fn emit_daily_summary(&self) {
        let state = self.risk.state();
        self.emit(AlertEvent::DailySummary {
            trades: state.trades_won + state.trades_lost,
            wins: state.trades_won,
            daily_pnl: state.daily_pnl(),
            bankroll: state.bankroll,
        })
        .await;
    }

    async fn log_halt(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let state = self.risk.state();
        if let Some(reason) = &state.halt_reason {
            if let Err(e) = store
                .log_halt_event(
                    reason,
                    state.bankroll.to_f64().unwrap_or(0.0),
                    state.daily_loss_fraction(),
                )
                .await
            {
                warn!(error = %e, "Failed to persist halt event");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
