//! PredictIt integration.
//!
//! Public read-only market data API — no authentication, and no
//! trading API at all, so PredictIt opportunities are alert/paper
//! material only. One API "market" holds multiple contracts; a
//! multi-contract market maps directly onto a bracket Market, a
//! single-contract market onto a binary YES/NO pair.
//!
//! Prices are dollar amounts on [0,1]. `bestBuyYesCost` is what you
//! pay to buy YES (the ask); `bestSellYesCost` is what you receive
//! selling it (the bid).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::PredictItConfig;
use crate::platforms::{AdapterError, MarketAdapter};
use crate::types::{Market, MarketCategory, Outcome, Quote};

const PLATFORM: &str = "predictit";

/// Synthetic half-spread around a last-trade price when the book is
/// empty.
const LAST_TRADE_SPREAD: f64 = 0.02;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AllMarketsResponse {
    #[serde(default)]
    markets: Vec<PredictItMarket>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictItMarket {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub contracts: Vec<PredictItContract>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PredictItContract {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default)]
    pub last_trade_price: Option<f64>,
    #[serde(default)]
    pub best_buy_yes_cost: Option<f64>,
    #[serde(default)]
    pub best_sell_yes_cost: Option<f64>,
    #[serde(default)]
    pub best_buy_no_cost: Option<f64>,
    #[serde(default)]
    pub best_sell_no_cost: Option<f64>,
}

impl PredictItContract {
    fn is_open(&self) -> bool {
        self.status == "Open"
    }

    /// YES bid/ask from the book, falling back to the last trade with
    /// a synthetic spread.
    fn yes_quote(&self) -> Option<Quote> {
        let bid = self.best_sell_yes_cost.unwrap_or(0.0);
        let ask = self.best_buy_yes_cost.unwrap_or(0.0);
        if ask > 0.0 {
            if let Some(q) = Quote::new(bid, ask, PLATFORM) {
                return Some(q);
            }
        }

        let last = self.last_trade_price?;
        if last <= 0.0 || last >= 1.0 {
            return None;
        }
        Quote::new(
            (last - LAST_TRADE_SPREAD).max(0.0),
            (last + LAST_TRADE_SPREAD).min(1.0),
            PLATFORM,
        )
    }

    fn no_quote(&self) -> Option<Quote> {
        let bid = self.best_sell_no_cost.unwrap_or(0.0);
        let ask = self.best_buy_no_cost.unwrap_or(0.0);
        if ask > 0.0 {
            if let Some(q) = Quote::new(bid, ask, PLATFORM) {
                return Some(q);
            }
        }
        // Complement of the YES quote.
        let yes = self.yes_quote()?;
        Quote::new((1.0 - yes.ask).max(0.0), (1.0 - yes.bid).min(1.0), PLATFORM)
    }

    fn deadline(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_end.as_deref()?;
        if raw.eq_ignore_ascii_case("n/a") {
            return None;
        }
        // Timestamps come with or without an offset.
        DateTime::parse_from_rfc3339(&raw.replace('Z', "+00:00"))
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PredictItAdapter {
    http: Client,
    base_url: String,
}

impl PredictItAdapter {
    pub fn new(cfg: &PredictItConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("seer/0.1")
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
        })
    }

    /// Convert one PredictIt market (and its open contracts) into a
    /// canonical Market. Contracts without a usable quote stay in the
    /// set unquoted so the detector skips the market whole.
    pub fn convert_market(raw: &PredictItMarket) -> Option<Market> {
        if raw.status != "Open" {
            return None;
        }
        let open: Vec<&PredictItContract> =
            raw.contracts.iter().filter(|c| c.is_open()).collect();
        if open.is_empty() {
            return None;
        }

        let deadline = open.iter().filter_map(|c| c.deadline()).min()?;

        let outcomes = if open.len() == 1 {
            let contract = open[0];
            vec![
                Outcome::new("yes", "Yes", contract.yes_quote()),
                Outcome::new("no", "No", contract.no_quote()),
            ]
        } else {
            open.iter()
                .map(|c| Outcome::new(&c.id.to_string(), &c.name, c.yes_quote()))
                .collect()
        };

        Some(Market {
            id: raw.id.to_string(),
            platform: PLATFORM.to_string(),
            event_id: Some(raw.id.to_string()),
            title: raw.name.clone(),
            // The whole venue trades political events.
            category: MarketCategory::Politics,
            outcomes,
            deadline,
            // The API exposes no volume or depth figures.
            volume_24h: 0.0,
            liquidity: 0.0,
            traders_count: 0,
        })
    }
}

// ---------------------------------------------------------------------------
// MarketAdapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketAdapter for PredictItAdapter {
    async fn fetch_markets(&self) -> Result<Vec<Market>, AdapterError> {
        let url = format!("{}/all/", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(PLATFORM, e))?;

        if !resp.status().is_success() {
            return Err(AdapterError::from_status(PLATFORM, resp.status()));
        }

        let all: AllMarketsResponse =
            resp.json().await.map_err(|e| AdapterError::MalformedData {
                platform: PLATFORM.to_string(),
                message: e.to_string(),
            })?;
        debug!(count = all.markets.len(), "Fetched PredictIt markets");

        let markets: Vec<Market> = all
            .markets
            .iter()
            .filter_map(Self::convert_market)
            .collect();
        info!(count = markets.len(), "PredictIt markets normalized");
        Ok(markets)
    }

    fn name(&self) -> &str {
        PLATFORM
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
