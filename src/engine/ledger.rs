//! Paper trading ledger.
//!
//! Simulates instantaneous fills and tracks every position from open
//! to resolution. Positions are never deleted — a cancel or resolution
//! only transitions status, so the ledger doubles as the audit trail
//! the persistence layer mirrors.
//!
//! Basket fills use a synthetic entry price: a guaranteed set bought
//! for `1/(1+edge)` per dollar of payout lets ordinary binary
//! settlement math (`payout = contracts × $1`) price the arb without a
//! special case.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::types::{d, Opportunity, Position, PositionKind, PositionStatus};

/// Floor on the synthetic edge so the entry price stays below $1.
const MIN_SYNTHETIC_EDGE: f64 = 0.001;

/// A resolved position together with its realized numbers, for the
/// risk manager and alert sink.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub position: Position,
    pub pnl: Decimal,
    pub won: bool,
}

#[derive(Default)]
pub struct PaperLedger {
    positions: Vec<Position>,
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate filling a whole opportunity set at the quoted prices.
    pub fn open(&mut self, opportunity: &Opportunity, stake: Decimal) -> Position {
        let entry_price = 1.0 / (1.0 + opportunity.gross_edge.max(MIN_SYNTHETIC_EDGE));
        let contracts = stake / d(entry_price);

        let position = Position {
            id: Uuid::new_v4().to_string(),
            market_id: opportunity.market_id.clone(),
            platform: opportunity.platform.clone(),
            title: opportunity.title.clone(),
            category: opportunity.category,
            mode: opportunity.mode,
            kind: PositionKind::Basket { contracts },
            stake,
            entry_price,
            opened_at: Utc::now(),
            deadline: opportunity.deadline,
            status: PositionStatus::Open,
            pnl: Decimal::ZERO,
        };

        info!(position = %position, "📈 Paper position opened");
        self.positions.push(position.clone());
        position
    }

    /// Re-insert a position restored from persistence at startup.
    pub fn restore(&mut self, position: Position) {
        self.positions.push(position);
    }

    /// Settle every open position on a resolved market.
    ///
    /// `winning_outcome` identifies which outcome paid $1. Baskets hold
    /// every outcome, so they win regardless of which one it was;
    /// single-outcome positions win only if they held the winner.
    pub fn resolve_market(
        &mut self,
        market_id: &str,
        winning_outcome: Option<&str>,
    ) -> Vec<Resolution> {
        let mut resolved = Vec::new();
        for position in &mut self.positions {
            if position.market_id != market_id || !position.is_open() {
                continue;
            }
            resolved.push(Self::settle(position, winning_outcome));
        }
        resolved
    }

    /// Settle every open basket whose deadline has passed. Baskets are
    /// guaranteed sets, so no market result lookup is needed; single
    /// positions wait for an explicit `resolve_market` with the winner.
    pub fn resolve_due(&mut self, now: DateTime<Utc>) -> Vec<Resolution> {
        let mut resolved = Vec::new();
        for position in &mut self.positions {
            if !position.is_open() || position.deadline > now {
                continue;
            }
            if matches!(position.kind, PositionKind::Basket { .. }) {
                resolved.push(Self::settle(position, None));
            }
        }
        resolved
    }

    fn settle(position: &mut Position, winning_outcome: Option<&str>) -> Resolution {
        let won = match &position.kind {
            PositionKind::Basket { .. } => true,
            PositionKind::Single { outcome_id, .. } => {
                winning_outcome.is_some_and(|w| w == outcome_id)
            }
        };

        // Winning contracts pay $1 apiece; losers pay nothing.
        let payout = if won {
            position.kind.contracts()
        } else {
            Decimal::ZERO
        };
        let pnl = payout - position.stake;

        position.status = if won {
            PositionStatus::ResolvedWin
        } else {
            PositionStatus::ResolvedLoss
        };
        position.pnl = pnl;

        info!(
            position = %position,
            pnl = %pnl,
            "{}",
            if won { "✅ Position resolved: WIN" } else { "❌ Position resolved: LOSS" }
        );

        Resolution {
            position: position.clone(),
            pnl,
            won,
        }
    }

    /// Cancel an open position whose fill assumption turned out to be
    /// invalid. The record stays, status becomes Cancelled.
    pub fn cancel(&mut self, position_id: &str) -> Option<Position> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id && p.is_open())?;
        position.status = PositionStatus::Cancelled;
        info!(position = %position, "Position cancelled");
        Some(position.clone())
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.iter().filter(|p| p.is_open()).cloned().collect()
    }

    /// Whether an open position already exists for this market+mode.
    pub fn has_open(&self, market_id: &str, mode: crate::types::DetectionMode) -> bool {
        self.positions
            .iter()
            .any(|p| p.is_open() && p.market_id == market_id && p.mode == mode)
    }

    /// Total dollars committed to open positions.
    pub fn open_exposure(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.stake)
            .sum()
    }

    /// Every position ever recorded, any status.
    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }

    #[cfg(test)]
    pub(crate) fn positions_mut(&mut self) -> &mut Vec<Position> {
        &mut self.positions
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArbSide, DetectionMode, MarketCategory, Side};
    use chrono::Duration;
    use rust_decimal::prelude::*;
    use rust_decimal_macros::dec;

    fn opportunity(market_id: &str, gross: f64, days_out: i64) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4().to_string(),
            platform: "kalshi".to_string(),
            market_id: market_id.to_string(),
            title: format!("Market {market_id}"),
            category: MarketCategory::Politics,
            mode: DetectionMode::Bracket,
            side: ArbSide::BuySet,
            num_outcomes: 3,
            price_sum: 1.0 - gross,
            gross_edge: gross,
            spread_cost: 0.01,
            net_edge: gross - 0.015,
            deadline: Utc::now() + Duration::days(days_out),
            detected_at: Utc::now(),
        }
    }

    fn single_position(market_id: &str, outcome: &str, stake: Decimal, entry: f64) -> Position {
        Position {
            id: Uuid::new_v4().to_string(),
            market_id: market_id.to_string(),
            platform: "kalshi".to_string(),
            title: format!("Market {market_id}"),
            category: MarketCategory::Politics,
            mode: DetectionMode::SingleCondition,
            kind: PositionKind::Single {
                outcome_id: outcome.to_string(),
                side: Side::Yes,
                contracts: stake / d(entry),
            },
            stake,
            entry_price: entry,
            opened_at: Utc::now(),
            deadline: Utc::now() - Duration::hours(1),
            status: PositionStatus::Open,
            pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn test_open_uses_synthetic_entry_price() {
        let mut ledger = PaperLedger::new();
        let position = ledger.open(&opportunity("EVT-1", 0.05, 10), dec!(100));

        assert!((position.entry_price - 1.0 / 1.05).abs() < 1e-10);
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.stake, dec!(100));
        // contracts = 100 / (1/1.05) = 105
        let contracts = position.kind.contracts().to_f64().unwrap();
        assert!((contracts - 105.0).abs() < 1e-6);
    }

    #[test]
    fn test_basket_resolution_realizes_edge() {
        let mut ledger = PaperLedger::new();
        ledger.open(&opportunity("EVT-1", 0.05, 0), dec!(100));

        let resolutions = ledger.resolve_due(Utc::now() + Duration::hours(1));
        assert_eq!(resolutions.len(), 1);
        let r = &resolutions[0];
        assert!(r.won);
        assert_eq!(r.position.status, PositionStatus::ResolvedWin);
        // payout 105, stake 100 => pnl ≈ 5
        let pnl = r.pnl.to_f64().unwrap();
        assert!((pnl - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_win_and_loss_pnl() {
        // The winning outcome's holders collect $1 per contract; the
        // loser forfeits the full stake.
        let mut ledger = PaperLedger::new();
        ledger.restore(single_position("EVT-1", "yes", dec!(50), 0.50));
        ledger.restore(single_position("EVT-1", "no", dec!(30), 0.60));

        let resolutions = ledger.resolve_market("EVT-1", Some("yes"));
        assert_eq!(resolutions.len(), 2);

        let winner = resolutions.iter().find(|r| r.won).unwrap();
        let loser = resolutions.iter().find(|r| !r.won).unwrap();

        // 100 contracts at $1 minus $50 stake
        assert_eq!(winner.pnl, dec!(50));
        assert_eq!(winner.position.status, PositionStatus::ResolvedWin);

        // payout 0 minus $30 stake
        assert_eq!(loser.pnl, dec!(-30));
        assert_eq!(loser.position.status, PositionStatus::ResolvedLoss);
    }

    #[test]
    fn test_resolve_due_skips_future_deadlines() {
        let mut ledger = PaperLedger::new();
        ledger.open(&opportunity("EVT-1", 0.05, 10), dec!(100));
        assert!(ledger.resolve_due(Utc::now()).is_empty());
        assert_eq!(ledger.open_positions().len(), 1);
    }

    #[test]
    fn test_resolve_due_skips_single_positions() {
        // Singles need a market result, not just a passed deadline
        let mut ledger = PaperLedger::new();
        ledger.restore(single_position("EVT-1", "yes", dec!(50), 0.50));
        assert!(ledger.resolve_due(Utc::now()).is_empty());
    }

    #[test]
    fn test_cancel_keeps_record() {
        let mut ledger = PaperLedger::new();
        let position = ledger.open(&opportunity("EVT-1", 0.05, 10), dec!(100));

        let cancelled = ledger.cancel(&position.id).unwrap();
        assert_eq!(cancelled.status, PositionStatus::Cancelled);
        assert!(ledger.open_positions().is_empty());
        // Never deleted — the record survives with its new status
        assert_eq!(ledger.all_positions().len(), 1);
        // A second cancel is a no-op
        assert!(ledger.cancel(&position.id).is_none());
    }

    #[test]
    fn test_has_open_by_market_and_mode() {
        let mut ledger = PaperLedger::new();
        ledger.open(&opportunity("EVT-1", 0.05, 10), dec!(100));

        assert!(ledger.has_open("EVT-1", DetectionMode::Bracket));
        assert!(!ledger.has_open("EVT-1", DetectionMode::SingleCondition));
        assert!(!ledger.has_open("EVT-2", DetectionMode::Bracket));
    }

    #[test]
    fn test_open_exposure_sums_open_stakes() {
        let mut ledger = PaperLedger::new();
        ledger.open(&opportunity("EVT-1", 0.05, 10), dec!(100));
        let p2 = ledger.open(&opportunity("EVT-2", 0.03, 10), dec!(80));
        assert_eq!(ledger.open_exposure(), dec!(180));

        ledger.cancel(&p2.id);
        assert_eq!(ledger.open_exposure(), dec!(100));
    }

    #[test]
    fn test_resolution_is_per_market() {
        let mut ledger = PaperLedger::new();
        ledger.open(&opportunity("EVT-1", 0.05, 0), dec!(100));
        ledger.open(&opportunity("EVT-2", 0.04, 10), dec!(100));

        let resolutions = ledger.resolve_market("EVT-1", None);
        assert_eq!(resolutions.len(), 1);
        assert_eq!(ledger.open_positions().len(), 1);
        assert_eq!(ledger.open_positions()[0].market_id, "EVT-2");
    }
}
