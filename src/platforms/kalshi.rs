//! Kalshi integration.
//!
//! Uses the Elections API with events-first discovery: events group the
//! mutually exclusive legs of a bracket, which is exactly the shape the
//! detector wants. Parlay/combo markets are skipped — they are not
//! mutually exclusive sets.
//!
//! Prices arrive in cents (0–100) and are normalized to [0,1]. The API
//! key, if configured, rides along as a header; request signing lives
//! below this boundary and is not in scope here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::KalshiConfig;
use crate::platforms::{normalize_price, AdapterError, MarketAdapter};
use crate::types::{Market, MarketCategory, Outcome, Quote};

const PLATFORM: &str = "kalshi";
const EVENT_PAGE_LIMIT: u32 = 100;
const MAX_EVENT_PAGES: u32 = 10;

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<KalshiEvent>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiEvent {
    #[serde(default)]
    pub event_ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiMarket {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    /// Leg label within an event (e.g. the bracket bucket name).
    #[serde(default)]
    pub yes_sub_title: String,
    #[serde(default)]
    pub yes_bid: f64,
    #[serde(default)]
    pub yes_ask: f64,
    #[serde(default)]
    pub no_bid: f64,
    #[serde(default)]
    pub no_ask: f64,
    #[serde(default)]
    pub close_time: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub open_interest: f64,
    #[serde(default)]
    pub liquidity: f64,
    /// Present on parlay/combo markets — these are skipped.
    #[serde(default)]
    pub mve_collection_ticker: Option<String>,
    #[serde(default)]
    pub custom_strike: Option<serde_json::Value>,
}

impl KalshiMarket {
    fn is_parlay(&self) -> bool {
        self.mve_collection_ticker.is_some() || self.custom_strike.is_some()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiAdapter {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    max_events: u32,
}

impl KalshiAdapter {
    pub fn new(cfg: &KalshiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .map(SecretString::new);
        if api_key.is_none() {
            warn!(env = %cfg.api_key_env, "Kalshi API key not set — public endpoints only");
        }

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
            api_key,
            max_events: cfg.max_events,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.header("KALSHI-ACCESS-KEY", key.expose_secret());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(PLATFORM, e))?;

        if !resp.status().is_success() {
            return Err(AdapterError::from_status(PLATFORM, resp.status()));
        }

        resp.json::<T>()
            .await
            .map_err(|e| AdapterError::MalformedData {
                platform: PLATFORM.to_string(),
                message: e.to_string(),
            })
    }

    async fn fetch_events(&self) -> Result<Vec<KalshiEvent>, AdapterError> {
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_EVENT_PAGES {
            let mut query = vec![
                ("status", "open".to_string()),
                ("limit", EVENT_PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let page: EventsResponse = self.get_json("/events", &query).await?;
            events.extend(page.events);

            if events.len() as u32 >= self.max_events {
                events.truncate(self.max_events as usize);
                break;
            }
            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(events)
    }

    async fn fetch_event_markets(
        &self,
        event_ticker: &str,
    ) -> Result<Vec<KalshiMarket>, AdapterError> {
        let query = vec![
            ("event_ticker", event_ticker.to_string()),
            ("status", "open".to_string()),
        ];
        let resp: MarketsResponse = self.get_json("/markets", &query).await?;
        Ok(resp.markets)
    }

    /// Parse a Kalshi ISO timestamp into UTC.
    pub fn parse_close_time(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert one event (and its leg markets) into a canonical Market.
    ///
    /// A single-leg event becomes a binary YES/NO market; a multi-leg
    /// event becomes a bracket whose outcomes are the legs' YES sides.
    /// Legs with malformed quotes are dropped individually; an event
    /// with no usable leg yields `None`.
    pub fn convert_event(event: &KalshiEvent, legs: &[KalshiMarket]) -> Option<Market> {
        let usable: Vec<&KalshiMarket> = legs
            .iter()
            .filter(|m| !m.is_parlay() && !m.ticker.is_empty())
            .collect();
        if usable.is_empty() {
            return None;
        }

        let deadline = usable
            .iter()
            .filter_map(|m| m.close_time.as_deref().and_then(Self::parse_close_time))
            .min()?;

        let category = event
            .category
            .parse::<MarketCategory>()
            .unwrap_or(MarketCategory::Other);

        let volume_24h: f64 = usable.iter().map(|m| m.volume_24h).sum();
        let liquidity: f64 = usable
            .iter()
            .map(|m| if m.liquidity > 0.0 { m.liquidity } else { m.open_interest })
            .sum();

        let outcomes = if usable.len() == 1 {
            let leg = usable[0];
            vec![
                Outcome::new("yes", "Yes", Self::leg_quote(leg.yes_bid, leg.yes_ask)),
                Outcome::new("no", "No", Self::leg_quote(leg.no_bid, leg.no_ask)),
            ]
        } else {
            usable
                .iter()
                .map(|leg| {
                    let name = if leg.yes_sub_title.is_empty() {
                        leg.title.clone()
                    } else {
                        leg.yes_sub_title.clone()
                    };
                    Outcome::new(&leg.ticker, &name, Self::leg_quote(leg.yes_bid, leg.yes_ask))
                })
                .collect()
        };

        Some(Market {
            id: event.event_ticker.clone(),
            platform: PLATFORM.to_string(),
            event_id: Some(event.event_ticker.clone()),
            title: if event.title.is_empty() {
                usable[0].title.clone()
            } else {
                event.title.clone()
            },
            category,
            outcomes,
            deadline,
            volume_24h,
            liquidity,
            traders_count: 0,
        })
    }

    /// Normalize a cent-denominated bid/ask pair into a validated Quote.
    fn leg_quote(bid: f64, ask: f64) -> Option<Quote> {
        let bid = normalize_price(bid)?;
        let ask = normalize_price(ask)?;
        Quote::new(bid, ask, PLATFORM)
    }
}

// ---------------------------------------------------------------------------
// MarketAdapter trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketAdapter for KalshiAdapter {
    async fn fetch_markets(&self) -> Result<Vec<Market>, AdapterError> {
        let events = self.fetch_events().await?;
        debug!(count = events.len(), "Fetched Kalshi events");

        let mut markets = Vec::new();
        for event in &events {
            if event.event_ticker.is_empty() {
                continue;
            }
            // A single failing event shouldn't sink the whole fetch;
            // only transport-level failures propagate.
            match self.fetch_event_markets(&event.event_ticker).await {
                Ok(legs) => {
                    if let Some(market) = Self::convert_event(event, &legs) {
                        markets.push(market);
                    }
                }
                Err(e @ AdapterError::MalformedData { .. }) => {
                    warn!(event = %event.event_ticker, error = %e, "Skipping malformed event");
                }
                Err(e) => return Err(e),
            }
        }

        info!(count = markets.len(), "Kalshi markets normalized");
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

    fn make_leg(ticker: &str, sub: &str, yes_bid: f64, yes_ask: f64) -> KalshiMarket {
        KalshiMarket {
            ticker: ticker.to_string(),
            title: format!("Leg {ticker}"),
            yes_sub_title: sub.to_string(),
            yes_bid,
            yes_ask,
            no_bid: 100.0 - yes_ask,
            no_ask: 100.0 - yes_bid,
            close_time: Some("2026-09-01T00:00:00Z".to_string()),
            status: "active".to_string(),
            volume_24h: 5000.0,
            open_interest: 1000.0,
            liquidity: 2000.0,
            mve_collection_ticker: None,
            custom_strike: None,
        }
    }

    fn make_event(ticker: &str, category: &str) -> KalshiEvent {
        KalshiEvent {
            event_ticker: ticker.to_string(),
            title: format!("Event {ticker}"),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_convert_single_leg_to_binary() {
        let event = make_event("EVT-RAIN", "weather");
        let legs = vec![make_leg("RAIN-YES", "", 45.0, 47.0)];

        let market = KalshiAdapter::convert_event(&event, &legs).unwrap();
        assert!(market.is_binary());
        assert_eq!(market.platform, "kalshi");
        assert_eq!(market.category, MarketCategory::Weather);

        let yes = market.outcomes[0].quote.as_ref().unwrap();
        assert!((yes.bid - 0.45).abs() < 1e-10);
        assert!((yes.ask - 0.47).abs() < 1e-10);

        let no = market.outcomes[1].quote.as_ref().unwrap();
        assert!((no.bid - 0.53).abs() < 1e-10);
        assert!((no.ask - 0.55).abs() < 1e-10);
    }

    #[test]
    fn test_convert_multi_leg_to_bracket() {
        let event = make_event("EVT-PRES", "elections");
        let legs = vec![
            make_leg("PRES-A", "Candidate A", 50.0, 51.0),
            make_leg("PRES-B", "Candidate B", 42.0, 43.0),
            make_leg("PRES-C", "Other", 2.0, 3.0),
        ];

        let market = KalshiAdapter::convert_event(&event, &legs).unwrap();
        assert_eq!(market.outcomes.len(), 3);
        assert_eq!(market.category, MarketCategory::Politics);
        assert_eq!(market.outcomes[0].name, "Candidate A");
        assert!((market.outcomes[2].quote.as_ref().unwrap().ask - 0.03).abs() < 1e-10);
        assert!((market.volume_24h - 15_000.0).abs() < 1e-10);
    }

    #[test]
    fn test_convert_skips_parlay_legs() {
        let event = make_event("EVT-COMBO", "sports");
        let mut parlay = make_leg("COMBO-1", "", 30.0, 32.0);
        parlay.mve_collection_ticker = Some("MVE-123".to_string());
        let legs = vec![parlay, make_leg("REG-1", "", 40.0, 42.0)];

        let market = KalshiAdapter::convert_event(&event, &legs).unwrap();
        // Only the regular leg survives → binary market
        assert!(market.is_binary());
    }

    #[test]
    fn test_convert_all_parlay_yields_none() {
        let event = make_event("EVT-COMBO", "sports");
        let mut parlay = make_leg("COMBO-1", "", 30.0, 32.0);
        parlay.custom_strike = Some(serde_json::json!({"strike": 1}));
        assert!(KalshiAdapter::convert_event(&event, &[parlay]).is_none());
    }

    #[test]
    fn test_convert_no_close_time_yields_none() {
        let event = make_event("EVT-X", "other");
        let mut leg = make_leg("X-1", "", 40.0, 42.0);
        leg.close_time = None;
        assert!(KalshiAdapter::convert_event(&event, &[leg]).is_none());
    }

    #[test]
    fn test_malformed_leg_quote_dropped_not_market() {
        let event = make_event("EVT-PRES", "elections");
        let mut bad = make_leg("PRES-B", "Candidate B", 0.0, 0.0);
        bad.yes_bid = 120.0; // out of range after normalization
        bad.yes_ask = 130.0;
        let legs = vec![make_leg("PRES-A", "Candidate A", 50.0, 51.0), bad];

        let market = KalshiAdapter::convert_event(&event, &legs).unwrap();
        assert_eq!(market.outcomes.len(), 2);
        assert!(market.outcomes[0].quote.is_some());
        // Malformed quote stored as None — detector will skip this market
        assert!(market.outcomes[1].quote.is_none());
    }

    #[test]
    fn test_parse_close_time() {
        let dt = KalshiAdapter::parse_close_time("2026-09-01T12:30:00Z").unwrap();
        assert_eq!(dt.date_naive().to_string(), "2026-09-01");
        assert!(KalshiAdapter::parse_close_time("not a date").is_none());
    }

    #[test]
    fn test_unknown_category_falls_back_to_other() {
        let event = make_event("EVT-Z", "esoteric");
        let legs = vec![make_leg("Z-1", "", 40.0, 42.0)];
        let market = KalshiAdapter::convert_event(&event, &legs).unwrap();
        assert_eq!(market.category, MarketCategory::Other);
    }
}
