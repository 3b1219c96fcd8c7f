//! Probability and expected-value estimation.
//!
//! Two jobs, deliberately separated from detection:
//!
//! 1. Convert a candidate's gross edge into a **net edge** after
//!    platform fees and spread cost. Fee schedules are pluggable per
//!    platform because the platforms are structurally different —
//!    Kalshi charges a per-contract trading fee, PredictIt takes a cut
//!    of profit plus a withdrawal fee, Polymarket currently charges no
//!    taker fee. Candidates whose net edge falls below the configured
//!    floor are discarded before risk evaluation.
//!
//! 2. Produce an independent true-probability estimate per outcome
//!    from historical base rates, not from the quote being evaluated.
//!    This is advisory sizing input for non-guaranteed EV trades only;
//!    a detector-confirmed arbitrage is guaranteed by its inequality
//!    and is never vetoed here.

use std::collections::HashMap;

use crate::config::FeeScheduleConfig;
use crate::types::{Market, Opportunity, Outcome, Side};

/// Historical base rates by title keyword. Small and hand-curated;
/// expanded as resolved-market data accumulates.
const BASE_RATES: &[(&str, f64)] = &[
    ("indictment", 0.021),
    ("indicted", 0.021),
    ("cpi", 0.084),
    ("fed rate", 0.732),
    ("election", 0.15),
];

/// Base rate for weather extremes, keyed by category rather than title.
const WEATHER_EXTREME_RATE: f64 = 0.05;

/// A withdrawal fee is paid once, not per trade; spread it over a
/// plausible number of round trips.
const WITHDRAWAL_AMORTIZATION_TRADES: f64 = 20.0;

pub struct Estimator {
    min_net_profit: f64,
    /// Config-supplied fee overrides by platform name. Platforms
    /// without an entry fall back to built-in defaults.
    fees: HashMap<String, FeeScheduleConfig>,
}

impl Estimator {
    pub fn new(min_net_profit: f64, fees: HashMap<String, FeeScheduleConfig>) -> Self {
        Self {
            min_net_profit,
            fees,
        }
    }

    /// Attach the net edge to a candidate, or discard it if the edge
    /// doesn't survive costs. The arbitrage itself is already
    /// guaranteed by the detector inequality — this gate only asks
    /// whether it is still worth capital after fees.
    pub fn evaluate(&self, opportunity: Opportunity) -> Option<Opportunity> {
        let net = self.net_edge(&opportunity);
        if net < self.min_net_profit {
            return None;
        }
        Some(opportunity.with_net_edge(net))
    }

    /// Net edge = gross edge − platform fee − spread cost.
    pub fn net_edge(&self, opp: &Opportunity) -> f64 {
        opp.gross_edge - self.platform_fee(opp) - opp.spread_cost
    }

    /// Fee for entering (and settling) one guaranteed set, in the same
    /// per-$1-payout units as the gross edge.
    fn platform_fee(&self, opp: &Opportunity) -> f64 {
        if let Some(schedule) = self.fees.get(&opp.platform) {
            return schedule.taker_fee
                + schedule.profit_fee * opp.gross_edge
                + schedule.withdrawal_fee / WITHDRAWAL_AMORTIZATION_TRADES;
        }

        match opp.platform.as_str() {
            // Trading fee of 0.07 * p * (1-p) per contract, summed
            // across the legs using the average leg price.
            "kalshi" => {
                let n = opp.num_outcomes.max(1) as f64;
                let p = (opp.price_sum / n).clamp(0.0, 1.0);
                0.07 * p * (1.0 - p) * n
            }
            // No taker fee on the CLOB today.
            "polymarket" => 0.0,
            // 10% of profit on winning positions plus the 5% withdrawal
            // fee amortized across trades.
            "predictit" => {
                0.10 * opp.gross_edge + 0.05 / WITHDRAWAL_AMORTIZATION_TRADES
            }
            // Unknown venue: assume a modest flat taker fee.
            _ => 0.01,
        }
    }

    /// Independent probability estimate for one outcome.
    ///
    /// blended = base_rate * 0.7 + recency * 0.3, discounted by a
    /// news-noise penalty inferred from volume concentration, clamped
    /// to [0.01, 0.99]. The market's own quote only enters as the
    /// recency signal and the fallback base rate — never as the answer.
    pub fn adjusted_probability(&self, market: &Market, outcome: &Outcome) -> f64 {
        let mid = outcome.quote.as_ref().map(|q| q.mid()).unwrap_or(0.5);

        let base_rate = Self::match_base_rate(market).unwrap_or(mid * 0.7);
        let recency = mid;
        let blended = base_rate * 0.7 + recency * 0.3;

        let noise_penalty = (Self::news_intensity(market) * 0.25).min(0.5);
        (blended * (1.0 - noise_penalty)).clamp(0.01, 0.99)
    }

    fn match_base_rate(market: &Market) -> Option<f64> {
        let title = market.title.to_lowercase();
        for (keyword, rate) in BASE_RATES {
            if keyword.contains(' ') {
                // Multi-word keys require every word present.
                if keyword.split(' ').all(|w| title.contains(w)) {
                    return Some(*rate);
                }
            } else if title.contains(keyword) {
                return Some(*rate);
            }
        }
        if market.category == crate::types::MarketCategory::Weather {
            return Some(WEATHER_EXTREME_RATE);
        }
        None
    }

    /// Rough noise estimate: a volume spike relative to standing
    /// liquidity suggests the market is trading on headlines.
    fn news_intensity(market: &Market) -> f64 {
        if market.liquidity <= 0.0 {
            return 0.5;
        }
        let ratio = market.volume_24h / market.liquidity;
        if ratio > 3.0 {
            0.8
        } else if ratio > 1.5 {
            0.4
        } else {
            0.1
        }
    }
}

/// Expected value of a single-sided position at `market_price` given an
/// independent `true_prob` estimate. Used by the advisory EV flow, not
/// by arbitrage approval.
pub fn expected_value(market_price: f64, true_prob: f64, side: Side) -> f64 {
    let market_price = market_price.clamp(0.0, 1.0);
    let true_prob = true_prob.clamp(0.0, 1.0);

    match side {
        Side::Yes => true_prob - market_price,
        Side::No => (1.0 - true_prob) - (1.0 - market_price),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
