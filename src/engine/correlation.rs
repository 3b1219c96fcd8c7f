//! Correlation checking.
//!
//! Guards against stacking positions that will win or lose together.
//! Pure function of (open positions, candidate): no hidden state, so
//! the scanner can call it anywhere in the serialized approval path.
//!
//! Two independent rules:
//! 1. Group exposure — positions sharing a correlation group (same
//!    event family) must not exceed a configured fraction of bankroll
//!    in aggregate.
//! 2. Portfolio penalty — the max of category concentration,
//!    close-time clustering, and title-token overlap across the whole
//!    portfolio plus the candidate must stay under a cap.

use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::types::{d, MarketCategory, Opportunity, Position};

/// Derived, non-owning key tying positions to an event family.
/// Carries no lifecycle of its own — it exists only for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationGroup(String);

impl CorrelationGroup {
    /// Build the group key from a category and title. Markets about
    /// the same event share leading title tokens even across
    /// platforms, so the key is category plus the first few
    /// normalized words.
    pub fn derive(category: MarketCategory, title: &str) -> Self {
        let tokens: Vec<String> = normalize_tokens(title).into_iter().take(4).collect();
        Self(format!("{}::{}", category, tokens.join("-")))
    }

    pub fn of_position(position: &Position) -> Self {
        Self::derive(position.category, &position.title)
    }

    pub fn of_opportunity(opportunity: &Opportunity) -> Self {
        Self::derive(opportunity.category, &opportunity.title)
    }
}

/// Outcome of a correlation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Reject(String),
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        matches!(self, Approval::Approve)
    }
}

pub struct CorrelationChecker {
    /// Maximum portfolio correlation penalty for a new position.
    max_correlation: f64,
    /// Aggregate exposure cap per group, as a fraction of bankroll.
    max_group_exposure: f64,
}

impl CorrelationChecker {
    pub fn new(max_correlation: f64, max_group_exposure: f64) -> Self {
        Self {
            max_correlation,
            max_group_exposure,
        }
    }

    /// Decide whether `candidate` may be opened at `proposed_stake`
    /// given the currently open positions.
    pub fn check(
        &self,
        open_positions: &[Position],
        candidate: &Opportunity,
        proposed_stake: Decimal,
        bankroll: Decimal,
    ) -> Approval {
        let group = CorrelationGroup::of_opportunity(candidate);
        let group_exposure: Decimal = open_positions
            .iter()
            .filter(|p| p.is_open() && CorrelationGroup::of_position(p) == group)
            .map(|p| p.stake)
            .sum();

        let cap = d(self.max_group_exposure) * bankroll;
        if group_exposure + proposed_stake > cap {
            return Approval::Reject(format!(
                "group exposure ${:.2} + ${:.2} exceeds cap ${:.2}",
                group_exposure, proposed_stake, cap,
            ));
        }

        let mut exposures: Vec<ExposureView> = open_positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| ExposureView {
                category: p.category,
                deadline: p.deadline,
                title: p.title.clone(),
            })
            .collect();
        exposures.push(ExposureView {
            category: candidate.category,
            deadline: candidate.deadline,
            title: candidate.title.clone(),
        });

        let penalty = correlation_penalty(&exposures);
        if penalty > self.max_correlation {
            return Approval::Reject(format!(
                "portfolio correlation {:.2} exceeds limit {:.2}",
                penalty, self.max_correlation,
            ));
        }

        Approval::Approve
    }
}

/// The fields of a position the penalty calculation actually looks at.
struct ExposureView {
    category: MarketCategory,
    deadline: DateTime<Utc>,
    title: String,
}

/// Max overlap across categories, resolution times, and title tokens.
/// Returns 0–1, higher = more correlated.
fn correlation_penalty(positions: &[ExposureView]) -> f64 {
    if positions.len() <= 1 {
        return 0.0;
    }

    let n = positions.len() as f64;

    let categories: Vec<MarketCategory> = positions.iter().map(|p| p.category).collect();
    let category_overlap = MarketCategory::ALL
        .iter()
        .map(|c| categories.iter().filter(|x| *x == c).count() as f64 / n)
        .fold(0.0, f64::max);

    let mut times: Vec<DateTime<Utc>> = positions.iter().map(|p| p.deadline).collect();
    times.sort();
    let close_pairs = times
        .windows(2)
        .filter(|w| (w[1] - w[0]).num_days() <= 3)
        .count() as f64;
    let time_overlap = close_pairs / n;

    let token_sets: Vec<HashSet<String>> = positions
        .iter()
        .map(|p| normalize_tokens(&p.title).into_iter().collect())
        .filter(|s: &HashSet<String>| !s.is_empty())
        .collect();
    let news_overlap = if token_sets.is_empty() {
        0.0
    } else {
        let mut common = token_sets[0].clone();
        for set in &token_sets[1..] {
            common = common.intersection(set).cloned().collect();
        }
        (common.len() as f64 / 5.0).min(1.0)
    };

    category_overlap.max(time_overlap).max(news_overlap)
}

const STOP_WORDS: &[&str] = &[
    "will", "the", "be", "in", "a", "an", "is", "it", "of", "to",
    "for", "and", "or", "by", "at", "on", "this", "that", "before",
    "after", "than", "more", "less", "above", "below", "between",
    "any", "has", "have", "do", "does",
];

/// Lowercase alphanumeric tokens, minus short words and stop words.
fn normalize_tokens(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(w))
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
