//! Market quality scoring.
//!
//! Maps liquidity, spread tightness, resolution clarity, trader
//! diversity, and category reliability into one 0–10 score. Low-scoring
//! markets are dropped before risk evaluation — an edge in a market
//! nobody trades is an edge that can't be captured.

use crate::types::{Market, MarketCategory};

/// Title terms that suggest a fuzzy resolution criterion.
const AMBIGUOUS_TERMS: &[&str] = &["might", "could", "possibly", "likely"];

/// Component weights. Sum to 1.0.
const W_LIQUIDITY: f64 = 0.25;
const W_SPREAD: f64 = 0.25;
const W_CLARITY: f64 = 0.20;
const W_DIVERSITY: f64 = 0.15;
const W_CATEGORY: f64 = 0.15;

/// Quality score in [0, 10].
pub fn score_market(market: &Market) -> f64 {
    // 24h volume, $10k and above maxes out
    let liquidity_score = (market.volume_24h / 10_000.0).min(10.0);

    // Widest leg spread; every cent of spread costs a point
    let spread_score = (10.0 - market.max_spread() * 100.0).max(0.0);

    let title = market.title.to_lowercase();
    let clarity_score = if AMBIGUOUS_TERMS.iter().any(|t| title.contains(t)) {
        5.0
    } else {
        10.0
    };

    let diversity_score = (market.traders_count as f64 / 50.0).min(10.0);

    let category_score = category_reliability(market.category);

    let total = liquidity_score * W_LIQUIDITY
        + spread_score * W_SPREAD
        + clarity_score * W_CLARITY
        + diversity_score * W_DIVERSITY
        + category_score * W_CATEGORY;

    (total * 100.0).round() / 100.0
}

/// How reliably markets in this category have resolved as quoted.
/// Weather and economics resolve against hard published numbers;
/// politics is noisier.
pub fn category_reliability(category: MarketCategory) -> f64 {
    match category {
        MarketCategory::Weather => 9.5,
        MarketCategory::Economics => 9.0,
        MarketCategory::Sports => 8.0,
        MarketCategory::Politics => 7.0,
        MarketCategory::Crypto => 6.0,
        MarketCategory::Other => 5.0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
