//! Arbitrage detection.
//!
//! Pure transforms over a market view assembled from the quote cache
//! snapshot. Three modes share one inequality: the sum of mutually
//! exclusive prices must equal $1.00, and any sufficient departure is a
//! guaranteed-profit set.
//!
//! - Single-condition: binary market, YES + NO departs from $1.00.
//! - Bracket: N >= 3 outcomes whose YES asks don't sum to $1.00.
//! - Time-boxed: the same checks on markets resolving within a short
//!   horizon, with a lower edge floor and a tighter staleness bound
//!   because those prices move faster.
//!
//! The detector only flags; ranking and de-duplication belong to the
//! scanner. Ties are all emitted.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::ArbitrageConfig;
use crate::types::{ArbSide, DetectionMode, Market, Opportunity, Outcome, Quote};

pub struct Detector {
    cfg: ArbitrageConfig,
    /// Staleness bound for regular markets.
    quote_max_age: Duration,
    /// Tighter bound for time-boxed markets.
    time_boxed_max_age: Duration,
}

impl Detector {
    pub fn new(cfg: ArbitrageConfig, quote_max_age: Duration, time_boxed_max_age: Duration) -> Self {
        Self {
            cfg,
            quote_max_age,
            time_boxed_max_age,
        }
    }

    /// Evaluate one market against all applicable detection modes.
    ///
    /// Skip policy: a market is never partially evaluated. Fewer than
    /// two active outcomes, or any outcome without a fresh valid quote,
    /// means no result at all. Outcomes quoted below the dust floor are
    /// excluded from the set before that rule applies; they carry no
    /// meaningful liquidity.
    pub fn detect(&self, market: &Market) -> Vec<Opportunity> {
        let now = Utc::now();

        if market.deadline <= now {
            return Vec::new();
        }
        if self.cfg.max_days_to_resolution > 0
            && market.days_to_resolution() > self.cfg.max_days_to_resolution
        {
            return Vec::new();
        }

        let time_boxed =
            market.deadline - now <= Duration::seconds(self.cfg.time_boxed_horizon_secs);
        let max_age = if time_boxed {
            self.time_boxed_max_age
        } else {
            self.quote_max_age
        };
        let min_profit = if time_boxed {
            self.cfg.time_boxed_min_profit
        } else {
            self.cfg.min_profit
        };

        let mut active: Vec<(&Outcome, &Quote)> = Vec::new();
        for outcome in &market.outcomes {
            let quote = match &outcome.quote {
                Some(q) if !q.is_stale(max_age) => q,
                // Missing or stale quote — the set can't be priced.
                _ => return Vec::new(),
            };
            if quote.mid() < self.cfg.ignore_below {
                continue; // dust outcome, excluded from the set
            }
            active.push((outcome, quote));
        }
        if active.len() < 2 {
            return Vec::new();
        }

        let mode = if time_boxed {
            DetectionMode::TimeBoxed
        } else if market.is_binary() {
            DetectionMode::SingleCondition
        } else {
            DetectionMode::Bracket
        };

        let ask_sum: f64 = active.iter().map(|(_, q)| q.ask).sum();
        let bid_sum: f64 = active.iter().map(|(_, q)| q.bid).sum();
        // Buying the set pays asks; half the total spread approximates
        // the cost of crossing versus fair value.
        let spread_cost = (ask_sum - bid_sum) / 2.0;

        let mut found = Vec::new();

        if ask_sum < 1.0 - min_profit {
            found.push(self.build(
                market,
                mode,
                ArbSide::BuySet,
                active.len(),
                ask_sum,
                1.0 - ask_sum,
                spread_cost,
                now,
            ));
        }
        if bid_sum > 1.0 + min_profit {
            found.push(self.build(
                market,
                mode,
                ArbSide::SellSet,
                active.len(),
                bid_sum,
                bid_sum - 1.0,
                spread_cost,
                now,
            ));
        }

        found
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        market: &Market,
        mode: DetectionMode,
        side: ArbSide,
        num_outcomes: usize,
        price_sum: f64,
        gross_edge: f64,
        spread_cost: f64,
        now: chrono::DateTime<Utc>,
    ) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4().to_string(),
            platform: market.platform.clone(),
            market_id: market.id.clone(),
            title: market.title.clone(),
            category: market.category,
            mode,
            side,
            num_outcomes,
            price_sum,
            gross_edge,
            spread_cost,
            net_edge: 0.0,
            deadline: market.deadline,
            detected_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
