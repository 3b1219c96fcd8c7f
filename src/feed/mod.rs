//! Experimental Polymarket push feed.
//!
//! A second, independent writer into the quote cache: subscribes to
//! CLOB book updates for tracked tokens and writes best bid/ask
//! through the same `upsert` contract the polling adapters use. The
//! feed merges into the cache — it never replaces a cycle's snapshot,
//! and its quotes are subject to the same validation and staleness
//! rules as polled ones.
//!
//! Off by default; enabled via `[feed]` in the config.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::engine::cache::QuoteCache;
use crate::types::{OutcomeKey, Quote};

const PLATFORM: &str = "polymarket";
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Shared registry of CLOB token id → cache key. The scanner side
/// registers tokens it wants live prices for; the feed task reads it
/// on every (re)connect.
#[derive(Clone, Default)]
pub struct TokenRegistry {
    inner: Arc<RwLock<HashMap<String, OutcomeKey>>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, token_id: &str, key: OutcomeKey) {
        self.inner
            .write()
            .expect("token registry lock poisoned")
            .insert(token_id.to_string(), key);
    }

    pub fn untrack(&self, token_id: &str) {
        self.inner
            .write()
            .expect("token registry lock poisoned")
            .remove(token_id);
    }

    fn resolve(&self, token_id: &str) -> Option<OutcomeKey> {
        self.inner
            .read()
            .expect("token registry lock poisoned")
            .get(token_id)
            .cloned()
    }

    fn token_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("token registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

pub struct PolymarketFeed {
    url: String,
    reconnect_delay: Duration,
    cache: QuoteCache,
    registry: TokenRegistry,
}

impl PolymarketFeed {
    pub fn new(cfg: &FeedConfig, cache: QuoteCache, registry: TokenRegistry) -> Self {
        Self {
            url: cfg.url.clone(),
            reconnect_delay: Duration::from_secs(cfg.reconnect_delay_secs),
            cache,
            registry,
        }
    }

    /// Connect-read loop with capped exponential backoff. Runs until
    /// the task is dropped at shutdown.
    pub async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_and_read().await {
                Ok(()) => {
                    info!("Feed connection closed cleanly, reconnecting");
                    attempt = 0;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    warn!(error = %e, attempt, "Feed connection failed");
                }
            }
            let backoff = self
                .reconnect_delay
                .saturating_mul(1 << attempt.min(4))
                .min(MAX_BACKOFF);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn connect_and_read(&self) -> anyhow::Result<()> {
        let (ws, _) = connect_async(&self.url).await?;
        info!(url = %self.url, "🔌 Polymarket feed connected");
        let (mut write, mut read) = ws.split();

        let tokens = self.registry.token_ids();
        if !tokens.is_empty() {
            let subscribe = serde_json::json!({
                "type": "subscribe",
                "channel": "market",
                "assets_ids": tokens,
            });
            write.send(Message::Text(subscribe.to_string())).await?;
            debug!(count = self.registry.token_ids().len(), "Subscribed to tokens");
        }

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => {
                    self.apply_message(&text);
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(())
    }

    /// Parse one frame and merge any usable price updates into the
    /// cache. Returns how many quotes were written; malformed frames
    /// and unknown tokens are dropped silently.
    pub fn apply_message(&self, text: &str) -> usize {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return 0;
        };

        // Frames arrive as a single event or an array of events.
        let events: Vec<&Value> = match &value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut applied = 0;
        for event in events {
            let Some((token_id, bid, ask)) = parse_book_update(event) else {
                continue;
            };
            let Some(key) = self.registry.resolve(&token_id) else {
                continue;
            };
            // Same validation as polled quotes: crossed or out-of-range
            // books never enter the cache.
            let Some(quote) = Quote::new(bid, ask, PLATFORM) else {
                debug!(token = %token_id, bid, ask, "Rejected malformed feed quote");
                continue;
            };
            self.cache.upsert(key, quote);
            applied += 1;
        }
        applied
    }
}

/// Extract (token, best bid, best ask) from one book/price event.
/// Level arrays carry either `{price, size}` objects or bare strings;
/// some events report `best_bid`/`best_ask` directly.
fn parse_book_update(event: &Value) -> Option<(String, f64, f64)> {
    let event_type = event
        .get("event_type")
        .or_else(|| event.get("type"))
        .or_else(|| event.get("event"))
        .and_then(Value::as_str)?;
    if !matches!(event_type, "book" | "book_update" | "price_change") {
        return None;
    }

    let token_id = event
        .get("asset_id")
        .or_else(|| event.get("token_id"))
        .and_then(Value::as_str)?
        .to_string();

    let mut bid = best_level(event.get("bids"));
    let mut ask = best_level(event.get("asks"));

    if bid.is_none() {
        bid = number_field(event, "best_bid");
    }
    if ask.is_none() {
        ask = number_field(event, "best_ask");
    }

    Some((token_id, bid?, ask?))
}

fn best_level(levels: Option<&Value>) -> Option<f64> {
    let first = levels?.as_array()?.first()?;
    match first {
        Value::Object(map) => map.get("price").and_then(parse_number),
        other => parse_number(other),
    }
}

fn number_field(event: &Value, field: &str) -> Option<f64> {
    event.get(field).and_then(parse_number)
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn feed_with(registry: TokenRegistry, cache: QuoteCache) -> PolymarketFeed {
        PolymarketFeed::new(&FeedConfig::default(), cache, registry)
    }

    fn key() -> OutcomeKey {
        OutcomeKey::new("polymarket", "0xabc", "m1")
    }

    #[test]
    fn test_book_update_with_object_levels() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        let cache = QuoteCache::new();
        let feed = feed_with(registry, cache.clone());

        let msg = r#"{
            "event_type": "book",
            "asset_id": "tok-1",
            "bids": [{"price": "0.44", "size": "120"}],
            "asks": [{"price": "0.46", "size": "80"}]
        }"#;
        assert_eq!(feed.apply_message(msg), 1);

        let snap = cache.snapshot(ChronoDuration::seconds(60));
        let q = &snap[&key()];
        assert!((q.bid - 0.44).abs() < 1e-10);
        assert!((q.ask - 0.46).abs() < 1e-10);
        assert_eq!(q.source, "polymarket");
    }

    #[test]
    fn test_direct_best_fields() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        let cache = QuoteCache::new();
        let feed = feed_with(registry, cache.clone());

        let msg = r#"{"type": "price_change", "token_id": "tok-1", "best_bid": 0.41, "best_ask": "0.43"}"#;
        assert_eq!(feed.apply_message(msg), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_array_frame_applies_all() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        registry.track("tok-2", OutcomeKey::new("polymarket", "0xabc", "m2"));
        let cache = QuoteCache::new();
        let feed = feed_with(registry, cache.clone());

        let msg = r#"[
            {"event_type": "book", "asset_id": "tok-1", "bids": [{"price": "0.44"}], "asks": [{"price": "0.46"}]},
            {"event_type": "book", "asset_id": "tok-2", "bids": [{"price": "0.30"}], "asks": [{"price": "0.33"}]}
        ]"#;
        assert_eq!(feed.apply_message(msg), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_untracked_token_ignored() {
        let registry = TokenRegistry::new();
        let cache = QuoteCache::new();
        let feed = feed_with(registry, cache.clone());

        let msg = r#"{"event_type": "book", "asset_id": "nobody", "bids": [{"price": "0.44"}], "asks": [{"price": "0.46"}]}"#;
        assert_eq!(feed.apply_message(msg), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_crossed_book_rejected() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        let cache = QuoteCache::new();
        let feed = feed_with(registry, cache.clone());

        // bid above ask violates the quote invariant
        let msg = r#"{"event_type": "book", "asset_id": "tok-1", "bids": [{"price": "0.50"}], "asks": [{"price": "0.45"}]}"#;
        assert_eq!(feed.apply_message(msg), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unrelated_event_types_ignored() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        let feed = feed_with(registry, QuoteCache::new());

        assert_eq!(feed.apply_message(r#"{"event_type": "trade", "asset_id": "tok-1"}"#), 0);
        assert_eq!(feed.apply_message(r#"{"event_type": "heartbeat", "ts": 1}"#), 0);
        assert_eq!(feed.apply_message("not json"), 0);
    }

    #[test]
    fn test_feed_merges_not_replaces() {
        // A polled quote for a different outcome survives a feed write.
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        let cache = QuoteCache::new();
        cache.upsert(
            OutcomeKey::new("kalshi", "EVT-1", "yes"),
            Quote::new(0.50, 0.52, "kalshi").unwrap(),
        );
        let feed = feed_with(registry, cache.clone());

        let msg = r#"{"event_type": "book", "asset_id": "tok-1", "bids": [{"price": "0.44"}], "asks": [{"price": "0.46"}]}"#;
        feed.apply_message(msg);

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_untrack() {
        let registry = TokenRegistry::new();
        registry.track("tok-1", key());
        registry.untrack("tok-1");
        let feed = feed_with(registry, QuoteCache::new());

        let msg = r#"{"event_type": "book", "asset_id": "tok-1", "bids": [{"price": "0.44"}], "asks": [{"price": "0.46"}]}"#;
        assert_eq!(feed.apply_message(msg), 0);
    }
}
