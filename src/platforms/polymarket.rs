//! Polymarket integration.
//!
//! Market discovery via the Gamma API. Binary markets map to YES/NO
//! pairs; the legs of a negative-risk bracket share a `questionID`
//! prefix (the last two hex chars are the outcome index) and are
//! grouped into one multi-outcome Market. Short-horizon crypto
//! up/down markets are optionally surfaced as well — their deadlines
//! put them on the time-boxed detection path.
//!
//! Gamma encodes several fields as stringified JSON (`outcomePrices`,
//! `outcomes`); parsing failures drop the offending market only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::PolymarketConfig;
use crate::platforms::{AdapterError, MarketAdapter};
use crate::types::{Market, MarketCategory, Outcome, Quote};

const PLATFORM: &str = "polymarket";

/// Assumed spread when Gamma only reports a midpoint price.
const SYNTHETIC_SPREAD: f64 = 0.02;

/// Question keywords marking rapid crypto up/down markets.
const CRYPTO_KEYWORDS: &[&str] = &[
    "up or down",
    "higher or lower",
    "bitcoin",
    "btc",
    "ethereum",
    "eth",
    "sol",
    "xrp",
];

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub question: String,
    /// Bracket legs share this id up to the last two hex chars.
    #[serde(rename = "questionID", default)]
    pub question_id: String,
    /// Stringified JSON array, e.g. `"[\"0.45\", \"0.55\"]"`.
    #[serde(rename = "outcomePrices", default)]
    pub outcome_prices: Option<String>,
    #[serde(rename = "bestBid", default)]
    pub best_bid: Option<f64>,
    #[serde(rename = "bestAsk", default)]
    pub best_ask: Option<f64>,
    #[serde(rename = "volumeNum", default)]
    pub volume_num: Option<f64>,
    #[serde(rename = "liquidityNum", default)]
    pub liquidity_num: Option<f64>,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Bracket leg label, e.g. the bucket name.
    #[serde(rename = "groupItemTitle", default)]
    pub group_item_title: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
}

fn default_true() -> bool {
    true
}

impl GammaMarket {
    fn is_open(&self) -> bool {
        self.active && !self.closed
    }

    /// Best YES bid/ask, preferring the live book over the midpoint.
    fn yes_quote(&self) -> Option<Quote> {
        if let (Some(bid), Some(ask)) = (self.best_bid, self.best_ask) {
            if let Some(q) = Quote::new(bid, ask, PLATFORM) {
                return Some(q);
            }
        }

        // Fall back to outcomePrices[0] with a synthetic spread.
        let prices = self.parsed_outcome_prices()?;
        let mid = *prices.first()?;
        if mid <= 0.0 || mid >= 1.0 {
            return None;
        }
        Quote::new(
            (mid - SYNTHETIC_SPREAD / 2.0).max(0.0),
            (mid + SYNTHETIC_SPREAD / 2.0).min(1.0),
            PLATFORM,
        )
    }

    fn parsed_outcome_prices(&self) -> Option<Vec<f64>> {
        let raw = self.outcome_prices.as_deref()?;
        let strings: Vec<String> = serde_json::from_str(raw).ok()?;
        strings.iter().map(|s| s.parse::<f64>().ok()).collect()
    }

    fn is_crypto_updown(&self) -> bool {
        let q = self.question.to_lowercase();
        CRYPTO_KEYWORDS.iter().any(|kw| q.contains(kw))
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        let raw = self.end_date.as_deref()?;
        DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn category(&self) -> MarketCategory {
        if self.is_crypto_updown() {
            return MarketCategory::Crypto;
        }
        self.category
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(MarketCategory::Other)
    }

    /// The shared event key for bracket legs: the questionID minus the
    /// trailing outcome index. Markets with a short or missing id
    /// stand alone.
    fn event_key(&self) -> Option<String> {
        if self.question_id.len() > 4 {
            Some(self.question_id[..self.question_id.len() - 2].to_string())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketAdapter {
    http: Client,
    gamma_url: String,
    max_markets: u32,
    crypto_markets: bool,
}

impl PolymarketAdapter {
    pub fn new(cfg: &PolymarketConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("seer/0.1")
            .build()?;

        Ok(Self {
            http,
            gamma_url: cfg.gamma_url.clone(),
            max_markets: cfg.max_markets,
            crypto_markets: cfg.crypto_markets,
        })
    }

    async fn fetch_gamma(&self, query: &[(&str, String)]) -> Result<Vec<GammaMarket>, AdapterError> {
        let url = format!("{}/markets", self.gamma_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(PLATFORM, e))?;

        if !resp.status().is_success() {
            return Err(AdapterError::from_status(PLATFORM, resp.status()));
        }

        resp.json::<Vec<GammaMarket>>()
            .await
            .map_err(|e| AdapterError::MalformedData {
                platform: PLATFORM.to_string(),
                message: e.to_string(),
            })
    }

    /// Group raw Gamma markets into canonical Markets: bracket legs by
    /// event key, everything else as standalone binaries.
    pub fn group_markets(raw: Vec<GammaMarket>) -> Vec<Market> {
        let mut standalone = Vec::new();
        let mut groups: HashMap<String, Vec<GammaMarket>> = HashMap::new();

        for market in raw {
            if !market.is_open() || market.id.is_empty() {
                continue;
            }
            match market.event_key() {
                Some(key) => groups.entry(key).or_default().push(market),
                None => standalone.push(market),
            }
        }

        let mut markets = Vec::new();
        for (key, mut group) in groups {
            if group.len() >= 2 {
                group.sort_by(|a, b| a.question_id.cmp(&b.question_id));
                if let Some(market) = Self::convert_bracket(&key, &group) {
                    markets.push(market);
                }
            } else if let Some(leg) = group.pop() {
                standalone.push(leg);
            }
        }
        for leg in standalone {
            if let Some(market) = Self::convert_binary(&leg) {
                markets.push(market);
            }
        }
        markets
    }

    /// A standalone market becomes a binary YES/NO pair. The NO side
    /// is the complement of the YES book.
    pub fn convert_binary(raw: &GammaMarket) -> Option<Market> {
        let yes = raw.yes_quote()?;
        let no = Quote::new((1.0 - yes.ask).max(0.0), (1.0 - yes.bid).min(1.0), PLATFORM)?;
        let deadline = raw.deadline()?;

        Some(Market {
            id: raw.id.clone(),
            platform: PLATFORM.to_string(),
            event_id: raw.event_key(),
            title: raw.question.clone(),
            category: raw.category(),
            outcomes: vec![
                Outcome::new("yes", "Yes", Some(yes)),
                Outcome::new("no", "No", Some(no)),
            ],
            deadline,
            volume_24h: raw.volume_num.unwrap_or(0.0),
            liquidity: raw.liquidity_num.unwrap_or(0.0),
            traders_count: 0,
        })
    }

    /// Legs sharing an event key become one bracket Market whose
    /// outcomes are the legs' YES sides. A leg without a usable quote
    /// is kept with `quote: None` so the detector skips the whole set
    /// rather than mispricing it.
    pub fn convert_bracket(event_key: &str, legs: &[GammaMarket]) -> Option<Market> {
        let deadline = legs.iter().filter_map(|l| l.deadline()).min()?;
        let first = legs.first()?;

        let outcomes = legs
            .iter()
            .map(|leg| {
                let name = leg
                    .group_item_title
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| leg.question.clone());
                Outcome::new(&leg.id, &name, leg.yes_quote())
            })
            .collect();

        Some(Market {
            id: event_key.to_string(),
            platform: PLATFORM.to_string(),
            event_id: Some(event_key.to_string()),
            title: first.question.clone(),
            category: first.category(),
            outcomes,
            deadline,
            volume_24h: legs.iter().filter_map(|l| l.volume_num).sum(),
            liquidity: legs.iter().filter_map(|l| l.liquidity_num).sum(),
            traders_count: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// MarketAdapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketAdapter for PolymarketAdapter {
    async fn fetch_markets(&self) -> Result<Vec<Market>, AdapterError> {
        let mut raw = self
            .fetch_gamma(&[
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", self.max_markets.to_string()),
            ])
            .await?;
        debug!(count = raw.len(), "Fetched Gamma markets");

        if self.crypto_markets {
            let crypto = self
                .fetch_gamma(&[
                    ("active", "true".to_string()),
                    ("closed", "false".to_string()),
                    ("limit", "100".to_string()),
                    ("tag", "crypto".to_string()),
                ])
                .await?;
            let seen: std::collections::HashSet<String> =
                raw.iter().map(|m| m.id.clone()).collect();
            raw.extend(
                crypto
                    .into_iter()
                    .filter(|m| m.is_crypto_updown() && !seen.contains(&m.id)),
            );
        }

        let markets = Self::group_markets(raw);
        info!(count = markets.len(), "Polymarket markets normalized");
        Ok(markets)
    }

    fn name(&self) -> &str {
        PLATFORM
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn gamma(id: &str, question_id: &str, question: &str, bid: f64, ask: f64) -> GammaMarket {
        GammaMarket {
            id: id.to_string(),
            question: question.to_string(),
            question_id: question_id.to_string(),
            outcome_prices: None,
            best_bid: Some(bid),
            best_ask: Some(ask),
            volume_num: Some(10_000.0),
            liquidity_num: Some(5_000.0),
            end_date: Some("2026-09-01T00:00:00Z".to_string()),
            category: Some("politics".to_string()),
            group_item_title: None,
            active: true,
            closed: false,
        }
    }

    #[test]
    fn test_binary_conversion_with_book_prices() {
        let raw = gamma("m1", "", "Will X happen?", 0.44, 0.46);
        let market = PolymarketAdapter::convert_binary(&raw).unwrap();

        assert!(market.is_binary());
        assert_eq!(market.platform, "polymarket");
        let yes = market.outcomes[0].quote.as_ref().unwrap();
        assert!((yes.bid - 0.44).abs() < 1e-10);
        assert!((yes.ask - 0.46).abs() < 1e-10);
        // NO is the complement of the YES book
        let no = market.outcomes[1].quote.as_ref().unwrap();
        assert!((no.bid - 0.54).abs() < 1e-10);
        assert!((no.ask - 0.56).abs() < 1e-10);
    }

    #[test]
    fn test_outcome_prices_fallback_with_synthetic_spread() {
        let mut raw = gamma("m1", "", "Will X happen?", 0.0, 0.0);
        raw.best_bid = None;
        raw.best_ask = None;
        raw.outcome_prices = Some(r#"["0.45", "0.55"]"#.to_string());

        let market = PolymarketAdapter::convert_binary(&raw).unwrap();
        let yes = market.outcomes[0].quote.as_ref().unwrap();
        assert!((yes.bid - 0.44).abs() < 1e-10);
        assert!((yes.ask - 0.46).abs() < 1e-10);
    }

    #[test]
    fn test_malformed_outcome_prices_dropped() {
        let mut raw = gamma("m1", "", "Will X happen?", 0.0, 0.0);
        raw.best_bid = None;
        raw.best_ask = None;
        raw.outcome_prices = Some("not json at all".to_string());

        assert!(PolymarketAdapter::convert_binary(&raw).is_none());
    }

    #[test]
    fn test_bracket_grouping_by_question_id_prefix() {
        // Three legs, questionID differing only in the last two chars
        let legs = vec![
            gamma("m1", "0xabc00", "Who wins? Candidate A", 0.49, 0.51),
            gamma("m2", "0xabc01", "Who wins? Candidate B", 0.41, 0.43),
            gamma("m3", "0xabc02", "Who wins? Other", 0.02, 0.04),
        ];
        let markets = PolymarketAdapter::group_markets(legs);

        assert_eq!(markets.len(), 1);
        let bracket = &markets[0];
        assert_eq!(bracket.id, "0xabc");
        assert_eq!(bracket.outcomes.len(), 3);
        let sum: f64 = bracket
            .outcomes
            .iter()
            .filter_map(|o| o.quote.as_ref().map(|q| q.ask))
            .sum();
        assert!((sum - 0.98).abs() < 1e-10);
    }

    #[test]
    fn test_lone_leg_falls_back_to_binary() {
        let legs = vec![gamma("m1", "0xdef01", "Will X happen?", 0.44, 0.46)];
        let markets = PolymarketAdapter::group_markets(legs);

        assert_eq!(markets.len(), 1);
        assert!(markets[0].is_binary());
    }

    #[test]
    fn test_closed_markets_excluded() {
        let mut closed = gamma("m1", "", "Done deal?", 0.99, 1.0);
        closed.closed = true;
        let mut inactive = gamma("m2", "", "Paused?", 0.50, 0.52);
        inactive.active = false;

        assert!(PolymarketAdapter::group_markets(vec![closed, inactive]).is_empty());
    }

    #[test]
    fn test_bracket_leg_without_quote_kept_as_unquoted() {
        let mut bad = gamma("m2", "0xabc01", "Who wins? Candidate B", 0.0, 0.0);
        bad.best_bid = None;
        bad.best_ask = None;
        let legs = vec![gamma("m1", "0xabc00", "Who wins? Candidate A", 0.49, 0.51), bad];

        let markets = PolymarketAdapter::group_markets(legs);
        assert_eq!(markets.len(), 1);
        // Detector will skip the set because one leg is unquoted
        assert!(markets[0].outcomes[1].quote.is_none());
    }

    #[test]
    fn test_crypto_updown_detection_and_category() {
        let raw = gamma("m1", "", "Bitcoin up or down at 19:00?", 0.48, 0.50);
        assert!(raw.is_crypto_updown());
        let market = PolymarketAdapter::convert_binary(&raw).unwrap();
        assert_eq!(market.category, MarketCategory::Crypto);
    }

    #[test]
    fn test_missing_end_date_dropped() {
        let mut raw = gamma("m1", "", "Will X happen?", 0.44, 0.46);
        raw.end_date = None;
        assert!(PolymarketAdapter::convert_binary(&raw).is_none());
    }

    #[test]
    fn test_group_item_title_names_bracket_outcomes() {
        let mut a = gamma("m1", "0xabc00", "Who wins?", 0.49, 0.51);
        a.group_item_title = Some("Candidate A".to_string());
        let mut b = gamma("m2", "0xabc01", "Who wins?", 0.41, 0.43);
        b.group_item_title = Some("Candidate B".to_string());

        let markets = PolymarketAdapter::group_markets(vec![a, b]);
        assert_eq!(markets[0].outcomes[0].name, "Candidate A");
        assert_eq!(markets[0].outcomes[1].name, "Candidate B");
    }
}
