//! Mock platform for integration testing.
//!
//! Provides a deterministic `MarketAdapter` implementation that
//! returns known markets with controllable prices and failures — all
//! in-memory with no external dependencies.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};

use seer::platforms::{AdapterError, MarketAdapter};
use seer::types::{Market, MarketCategory, Outcome, Quote};

/// A mock prediction platform for deterministic testing.
///
/// All state is in-memory. Markets and forced failures are fully
/// controllable from test code.
pub struct MockPlatform {
    name: String,
    markets: Mutex<Vec<Market>>,
    /// If set, fetches return this failure.
    force_error: Mutex<Option<AdapterError>>,
    fetch_count: Mutex<u32>,
}

impl MockPlatform {
    pub fn new(name: &str, markets: Vec<Market>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            markets: Mutex::new(markets),
            force_error: Mutex::new(None),
            fetch_count: Mutex::new(0),
        })
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, error: AdapterError) {
        *self.force_error.lock().unwrap() = Some(error);
    }

    /// Clear any forced failure.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Replace the market set.
    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.lock().unwrap() = markets;
    }

    pub fn fetch_count(&self) -> u32 {
        *self.fetch_count.lock().unwrap()
    }

    /// A bracket market whose YES asks sum to an arbitrage.
    pub fn arb_bracket(id: &str, asks: &[f64], deadline_in: Duration) -> Market {
        let outcomes = asks
            .iter()
            .enumerate()
            .map(|(i, &ask)| {
                Outcome::new(
                    &format!("o{i}"),
                    &format!("Outcome {i}"),
                    Quote::new((ask - 0.005).max(0.0), ask, "mock"),
                )
            })
            .collect();
        Market {
            id: id.to_string(),
            platform: "mock".to_string(),
            event_id: Some(id.to_string()),
            title: format!("Mock bracket {id}"),
            category: MarketCategory::Politics,
            outcomes,
            deadline: Utc::now() + deadline_in,
            volume_24h: 60_000.0,
            liquidity: 80_000.0,
            traders_count: 400,
        }
    }

    /// A fairly priced binary market (no edge).
    pub fn fair_binary(id: &str) -> Market {
        Market {
            id: id.to_string(),
            platform: "mock".to_string(),
            event_id: Some(id.to_string()),
            title: format!("Mock binary {id}"),
            category: MarketCategory::Sports,
            outcomes: vec![
                Outcome::new("yes", "Yes", Quote::new(0.49, 0.51, "mock")),
                Outcome::new("no", "No", Quote::new(0.48, 0.50, "mock")),
            ],
            deadline: Utc::now() + Duration::days(7),
            volume_24h: 40_000.0,
            liquidity: 50_000.0,
            traders_count: 300,
        }
    }
}

#[async_trait]
impl MarketAdapter for MockPlatform {
    async fn fetch_markets(&self) -> Result<Vec<Market>, AdapterError> {
        *self.fetch_count.lock().unwrap() += 1;
        if let Some(e) = self.force_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.markets.lock().unwrap().clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_fetch_markets() {
        let platform = MockPlatform::new(
            "mock",
            vec![
                MockPlatform::arb_bracket("ARB-1", &[0.50, 0.35, 0.08], Duration::days(5)),
                MockPlatform::fair_binary("FAIR-1"),
            ],
        );
        let markets = platform.fetch_markets().await.unwrap();
        assert_eq!(markets.len(), 2);
        assert_eq!(platform.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let platform = MockPlatform::new("mock", vec![MockPlatform::fair_binary("FAIR-1")]);
        platform.set_error(AdapterError::RateLimited {
            platform: "mock".to_string(),
        });

        assert!(platform.fetch_markets().await.is_err());

        platform.clear_error();
        assert!(platform.fetch_markets().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_market_shapes() {
        let bracket = MockPlatform::arb_bracket("ARB-1", &[0.50, 0.35, 0.08], Duration::days(5));
        assert_eq!(bracket.outcomes.len(), 3);
        let sum: f64 = bracket
            .quoted_outcomes()
            .iter()
            .map(|(_, q)| q.ask)
            .sum();
        assert!((sum - 0.93).abs() < 1e-10);

        let fair = MockPlatform::fair_binary("FAIR-1");
        assert!(fair.is_binary());
    }
}
