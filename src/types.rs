//! Shared types for the SEER scanner.
//!
//! These types form the canonical data model used across all modules.
//! Platform adapters normalize their native formats into `Market` /
//! `Outcome` / `Quote`; the detection and paper-trading pipeline only
//! ever sees this model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Convert an `f64` dollar amount to `Decimal` at the money boundary.
///
/// Prices and probabilities stay `f64`; anything denominated in dollars
/// is `Decimal`. Uses the rounding conversion rather than
/// `from_f64_retain`: config fractions like `0.05` must come out as
/// exactly `0.05`, not the binary expansion, or dollar caps drift off
/// their configured values. Non-finite inputs collapse to zero rather
/// than panic.
pub fn d(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Best bid/ask for one outcome, normalized to the [0,1] probability scale.
///
/// Construction is validated: a quote violating `0 <= bid <= ask <= 1`
/// is rejected, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub fetched_at: DateTime<Utc>,
    /// Source platform tag ("kalshi", "polymarket", ...).
    pub source: String,
}

impl Quote {
    /// Build a validated quote. Returns `None` for malformed prices.
    pub fn new(bid: f64, ask: f64, source: &str) -> Option<Self> {
        if !bid.is_finite() || !ask.is_finite() {
            return None;
        }
        if bid < 0.0 || ask > 1.0 || bid > ask {
            return None;
        }
        Some(Self {
            bid,
            ask,
            fetched_at: Utc::now(),
            source: source.to_string(),
        })
    }

    /// Midpoint price.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Bid/ask spread width.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Whether the quote is older than `max_age`.
    pub fn is_stale(&self, max_age: chrono::Duration) -> bool {
        Utc::now() - self.fetched_at > max_age
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.0}¢/{:.0}¢ [{}]",
            self.bid * 100.0,
            self.ask * 100.0,
            self.source,
        )
    }
}

// ---------------------------------------------------------------------------
// Market & Outcome
// ---------------------------------------------------------------------------

/// One outcome of a market, carrying its current quote (if any).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: String,
    pub name: String,
    pub quote: Option<Quote>,
}

impl Outcome {
    pub fn new(id: &str, name: &str, quote: Option<Quote>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            quote,
        }
    }
}

/// A prediction market on any platform.
///
/// Invariant: outcomes are mutually exclusive and collectively exhaustive —
/// exactly one resolves true. Binary markets carry YES and NO as two
/// outcomes; bracket markets carry one outcome per bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    /// Platform identifier: "kalshi" | "polymarket" | "predictit"
    pub platform: String,
    /// Event/series key grouping related markets (bracket legs share one).
    pub event_id: Option<String>,
    pub title: String,
    pub category: MarketCategory,
    pub outcomes: Vec<Outcome>,
    /// Market resolution deadline.
    pub deadline: DateTime<Utc>,
    /// 24-hour volume in USD equivalent.
    pub volume_24h: f64,
    /// Available liquidity in USD equivalent.
    pub liquidity: f64,
    /// Rough unique-trader count where the platform exposes it.
    pub traders_count: u32,
}

impl Market {
    /// Whether this is a binary YES/NO market.
    pub fn is_binary(&self) -> bool {
        self.outcomes.len() == 2
    }

    /// Whether the market is still active (deadline in the future).
    pub fn is_active(&self) -> bool {
        self.deadline > Utc::now()
    }

    /// Whole days until the resolution deadline (negative if past).
    pub fn days_to_resolution(&self) -> i64 {
        (self.deadline - Utc::now()).num_days()
    }

    /// All outcomes that carry a valid quote.
    pub fn quoted_outcomes(&self) -> Vec<(&Outcome, &Quote)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.quote.as_ref().map(|q| (o, q)))
            .collect()
    }

    /// Widest bid/ask spread across quoted outcomes (0.0 if unquoted).
    pub fn max_spread(&self) -> f64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.quote.as_ref().map(|q| q.spread()))
            .fold(0.0, f64::max)
    }

    /// Helper to build a binary test market with sensible defaults.
    #[cfg(test)]
    pub fn sample_binary(yes_ask: f64, no_ask: f64) -> Self {
        let spread = 0.01;
        Market {
            id: "TEST-BIN-001".to_string(),
            platform: "kalshi".to_string(),
            event_id: Some("TEST-EVT".to_string()),
            title: "Will it rain in NYC tomorrow?".to_string(),
            category: MarketCategory::Weather,
            outcomes: vec![
                Outcome::new(
                    "yes",
                    "Yes",
                    Quote::new((yes_ask - spread).max(0.0), yes_ask, "kalshi"),
                ),
                Outcome::new(
                    "no",
                    "No",
                    Quote::new((no_ask - spread).max(0.0), no_ask, "kalshi"),
                ),
            ],
            deadline: Utc::now() + chrono::Duration::days(5),
            volume_24h: 20_000.0,
            liquidity: 10_000.0,
            traders_count: 250,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} outcomes | vol: ${:.0} | {})",
            self.platform,
            self.title,
            self.outcomes.len(),
            self.volume_24h,
            self.category,
        )
    }
}

/// Cache key identifying one outcome across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutcomeKey {
    pub platform: String,
    pub market_id: String,
    pub outcome_id: String,
}

impl OutcomeKey {
    pub fn new(platform: &str, market_id: &str, outcome_id: &str) -> Self {
        Self {
            platform: platform.to_string(),
            market_id: market_id.to_string(),
            outcome_id: outcome_id.to_string(),
        }
    }
}

impl fmt::Display for OutcomeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.platform, self.market_id, self.outcome_id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bet direction on a single outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Market category, used for scoring reliability and correlation grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    Politics,
    Sports,
    Economics,
    Crypto,
    Weather,
    Other,
}

impl MarketCategory {
    /// All known categories (useful for iteration).
    pub const ALL: &'static [MarketCategory] = &[
        MarketCategory::Politics,
        MarketCategory::Sports,
        MarketCategory::Economics,
        MarketCategory::Crypto,
        MarketCategory::Weather,
        MarketCategory::Other,
    ];
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCategory::Politics => write!(f, "Politics"),
            MarketCategory::Sports => write!(f, "Sports"),
            MarketCategory::Economics => write!(f, "Economics"),
            MarketCategory::Crypto => write!(f, "Crypto"),
            MarketCategory::Weather => write!(f, "Weather"),
            MarketCategory::Other => write!(f, "Other"),
        }
    }
}

impl std::str::FromStr for MarketCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "politics" | "political" | "elections" | "election" => Ok(MarketCategory::Politics),
            "sports" | "sport" => Ok(MarketCategory::Sports),
            "economics" | "economic" | "econ" | "financials" | "finance" => {
                Ok(MarketCategory::Economics)
            }
            "crypto" | "cryptocurrency" => Ok(MarketCategory::Crypto),
            "weather" | "climate" => Ok(MarketCategory::Weather),
            "other" | "unknown" => Ok(MarketCategory::Other),
            _ => Err(anyhow::anyhow!("Unknown market category: {s}")),
        }
    }
}

/// Operating mode for the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    /// Alerts only — no simulated positions.
    Watch,
    /// Simulated fills tracked through the paper ledger.
    Paper,
    /// Real execution. Recognized but unimplemented; rejected at startup.
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Watch => write!(f, "watch"),
            TradingMode::Paper => write!(f, "paper"),
            TradingMode::Live => write!(f, "live"),
        }
    }
}

impl std::str::FromStr for TradingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "watch" => Ok(TradingMode::Watch),
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            _ => Err(anyhow::anyhow!("Unknown trading mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// How a mispricing was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Binary market where YES + NO departs from $1.00.
    SingleCondition,
    /// N >= 3 mutually exclusive outcomes whose YES prices don't sum to $1.00.
    Bracket,
    /// Bracket/condition logic on markets resolving within a short horizon.
    TimeBoxed,
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionMode::SingleCondition => write!(f, "single_condition"),
            DetectionMode::Bracket => write!(f, "bracket"),
            DetectionMode::TimeBoxed => write!(f, "time_boxed"),
        }
    }
}

/// Which set of orders captures the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbSide {
    /// Prices sum below $1 — buy one unit of every outcome at the ask.
    BuySet,
    /// Prices sum above $1 — sell every outcome at the bid.
    SellSet,
}

impl fmt::Display for ArbSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbSide::BuySet => write!(f, "BUY_ALL_YES"),
            ArbSide::SellSet => write!(f, "SELL_ALL_YES"),
        }
    }
}

/// A detected mispricing. Immutable once created; superseded by
/// re-detection on a later snapshot, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub platform: String,
    pub market_id: String,
    pub title: String,
    pub category: MarketCategory,
    pub mode: DetectionMode,
    pub side: ArbSide,
    pub num_outcomes: usize,
    /// Sum of the relevant prices (asks for BuySet, bids for SellSet).
    pub price_sum: f64,
    /// Raw pricing discrepancy before costs.
    pub gross_edge: f64,
    /// Estimated slippage from crossing the bid/ask spread.
    pub spread_cost: f64,
    /// Edge after platform fees and spread cost. Zero until the
    /// estimator attaches it via `with_net_edge`.
    pub net_edge: f64,
    pub deadline: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Attach the estimator's net edge, consuming the candidate.
    pub fn with_net_edge(self, net_edge: f64) -> Self {
        Self { net_edge, ..self }
    }

    /// De-duplication key: one live position per market+mode.
    pub fn dedup_key(&self) -> String {
        format!("{}::{}::{}", self.platform, self.market_id, self.mode)
    }

    /// Edge expressed as dollars per $100 deployed.
    pub fn profit_per_100(&self) -> f64 {
        self.gross_edge * 100.0
    }

    /// Days until the underlying market resolves.
    pub fn days_to_resolution(&self) -> i64 {
        (self.deadline - Utc::now()).num_days()
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} | {} {} | {} outcomes, sum {:.3} | gross {:.2}% net {:.2}%",
            self.platform,
            self.title,
            self.mode,
            self.side,
            self.num_outcomes,
            self.price_sum,
            self.gross_edge * 100.0,
            self.net_edge * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// What a paper position actually holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionKind {
    /// One unit of every outcome in the set — pays $1 whichever resolves.
    Basket { contracts: Decimal },
    /// A single-outcome stake; wins only if that outcome resolves true.
    Single {
        outcome_id: String,
        side: Side,
        contracts: Decimal,
    },
}

impl PositionKind {
    pub fn contracts(&self) -> Decimal {
        match self {
            PositionKind::Basket { contracts } => *contracts,
            PositionKind::Single { contracts, .. } => *contracts,
        }
    }
}

/// Lifecycle of a paper position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    ResolvedWin,
    ResolvedLoss,
    Cancelled,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::ResolvedWin => write!(f, "resolved_win"),
            PositionStatus::ResolvedLoss => write!(f, "resolved_loss"),
            PositionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A simulated trade spawned from an approved opportunity.
/// Never deleted — only appended and transitioned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market_id: String,
    pub platform: String,
    pub title: String,
    pub category: MarketCategory,
    pub mode: DetectionMode,
    pub kind: PositionKind,
    /// Entry cost in dollars.
    pub stake: Decimal,
    /// Fill price per contract. For baskets this is the synthetic price
    /// `1/(1+edge)` so binary settlement math applies unchanged.
    pub entry_price: f64,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: PositionStatus,
    /// Realized P&L, set on resolution (zero while open).
    pub pnl: Decimal,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_win(&self) -> bool {
        self.status == PositionStatus::ResolvedWin
    }

    /// Whether the underlying market has reached its deadline.
    pub fn is_due(&self) -> bool {
        Utc::now() >= self.deadline
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} stake=${:.2} entry={:.3} status={} pnl=${:.2}",
            self.platform,
            self.mode,
            self.market_id,
            self.stake,
            self.entry_price,
            self.status,
            self.pnl,
        )
    }
}

// ---------------------------------------------------------------------------
// Risk state
// ---------------------------------------------------------------------------

/// Process-wide risk accounting, one logical instance per trading day.
///
/// Read freely, mutated only by the `RiskManager` — every mutation site
/// lives in `engine::risk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub starting_bankroll: Decimal,
    pub daily_start_bankroll: Decimal,
    pub bankroll: Decimal,
    pub open_positions: usize,
    pub open_exposure: Decimal,
    pub halted: bool,
    pub halt_reason: Option<String>,
    /// Trading day the daily accounting belongs to.
    pub day: NaiveDate,
    /// Per-market last-exit timestamps for re-entry cooldown.
    pub cooldowns: HashMap<String, DateTime<Utc>>,
    pub trades_won: u64,
    pub trades_lost: u64,
}

impl RiskState {
    pub fn new(initial_bankroll: Decimal) -> Self {
        Self {
            starting_bankroll: initial_bankroll,
            daily_start_bankroll: initial_bankroll,
            bankroll: initial_bankroll,
            open_positions: 0,
            open_exposure: Decimal::ZERO,
            halted: false,
            halt_reason: None,
            day: Utc::now().date_naive(),
            cooldowns: HashMap::new(),
            trades_won: 0,
            trades_lost: 0,
        }
    }

    /// Realized P&L since the daily reset.
    pub fn daily_pnl(&self) -> Decimal {
        self.bankroll - self.daily_start_bankroll
    }

    /// Daily loss as a positive fraction of the daily-start bankroll
    /// (0.0 when flat or up).
    pub fn daily_loss_fraction(&self) -> f64 {
        if self.daily_start_bankroll <= Decimal::ZERO {
            return 0.0;
        }
        let pnl = self.daily_pnl();
        if pnl >= Decimal::ZERO {
            return 0.0;
        }
        (-pnl / self.daily_start_bankroll).to_f64().unwrap_or(0.0)
    }

    /// Lifetime P&L against the starting bankroll.
    pub fn total_pnl(&self) -> Decimal {
        self.bankroll - self.starting_bankroll
    }

    /// Win rate as a percentage. Returns 0.0 if nothing has resolved.
    pub fn win_rate(&self) -> f64 {
        let resolved = self.trades_won + self.trades_lost;
        if resolved == 0 {
            0.0
        } else {
            (self.trades_won as f64 / resolved as f64) * 100.0
        }
    }
}

impl fmt::Display for RiskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bankroll=${:.2} daily=${:.2} open={} exposure=${:.2} {}",
            self.bankroll,
            self.daily_pnl(),
            self.open_positions,
            self.open_exposure,
            if self.halted { "🛑 HALTED" } else { "✅ active" },
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SEER.
#[derive(Debug, thiserror::Error)]
pub enum SeerError {
    #[error("Platform error ({platform}): {message}")]
    Platform { platform: String, message: String },

    #[error("Risk limit exceeded: {0}")]
    RiskLimit(String),

    #[error("Malformed market data: {0}")]
    MalformedData(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Alert delivery failed: {0}")]
    Alert(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
