//! Persistence layer.
//!
//! Append-only SQLite store for opportunities, paper trades, metrics
//! snapshots, and halt events. Writes are best-effort from the
//! scanner's point of view: a persistence failure is logged and
//! retried on the next occasion, never allowed to block or roll back a
//! committed ledger or risk-state mutation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::types::{
    d, DetectionMode, MarketCategory, Opportunity, Position, PositionKind, PositionStatus,
    RiskState, Side,
};

/// Aggregate trade performance, fed into metrics and the daily summary.
#[derive(Debug, Clone, Default)]
pub struct PerformanceStats {
    pub total_trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub open_trades: u64,
}

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database and ensure the schema exists.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {db_path}"))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = db_path, "Database initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                market_id TEXT NOT NULL,
                market_title TEXT,
                platform TEXT,
                category TEXT,
                mode TEXT,
                side TEXT,
                num_outcomes INTEGER,
                price_sum REAL,
                gross_edge REAL,
                net_edge REAL,
                quality_score REAL,
                executed INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                position_id TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                market_id TEXT NOT NULL,
                market_title TEXT,
                platform TEXT,
                category TEXT,
                mode TEXT,
                kind TEXT NOT NULL DEFAULT 'basket',
                outcome_id TEXT,
                side TEXT,
                contracts REAL NOT NULL,
                stake REAL NOT NULL,
                entry_price REAL NOT NULL,
                deadline TEXT,
                status TEXT DEFAULT 'open',
                pnl REAL,
                win INTEGER,
                resolved_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                bankroll REAL,
                daily_pnl REAL,
                total_pnl REAL,
                open_positions INTEGER,
                win_rate REAL,
                total_trades INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS halt_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                reason TEXT NOT NULL,
                bankroll REAL,
                daily_loss_pct REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- Opportunities ----------------------------------------------------

    pub async fn log_opportunity(
        &self,
        opp: &Opportunity,
        quality_score: f64,
        executed: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities
            (timestamp, market_id, market_title, platform, category, mode, side,
             num_outcomes, price_sum, gross_edge, net_edge, quality_score, executed)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(opp.detected_at.to_rfc3339())
        .bind(&opp.market_id)
        .bind(&opp.title)
        .bind(&opp.platform)
        .bind(opp.category.to_string())
        .bind(opp.mode.to_string())
        .bind(opp.side.to_string())
        .bind(opp.num_outcomes as i64)
        .bind(opp.price_sum)
        .bind(opp.gross_edge)
        .bind(opp.net_edge)
        .bind(quality_score)
        .bind(executed as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Paper trades -----------------------------------------------------

    pub async fn log_trade(&self, position: &Position) -> Result<()> {
        let (kind, outcome_id, side) = match &position.kind {
            PositionKind::Basket { .. } => ("basket", None, None),
            PositionKind::Single {
                outcome_id, side, ..
            } => ("single", Some(outcome_id.clone()), Some(side.to_string())),
        };

        sqlx::query(
            r#"
            INSERT INTO paper_trades
            (position_id, timestamp, market_id, market_title, platform, category,
             mode, kind, outcome_id, side, contracts, stake, entry_price, deadline, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.id)
        .bind(position.opened_at.to_rfc3339())
        .bind(&position.market_id)
        .bind(&position.title)
        .bind(&position.platform)
        .bind(position.category.to_string())
        .bind(position.mode.to_string())
        .bind(kind)
        .bind(outcome_id)
        .bind(side)
        .bind(position.kind.contracts().to_f64().unwrap_or(0.0))
        .bind(position.stake.to_f64().unwrap_or(0.0))
        .bind(position.entry_price)
        .bind(position.deadline.to_rfc3339())
        .bind(position.status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_trade_resolved(
        &self,
        position_id: &str,
        status: PositionStatus,
        pnl: f64,
        win: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE paper_trades
            SET status = ?, pnl = ?, win = ?, resolved_at = ?
            WHERE position_id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(pnl)
        .bind(win as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_trade_cancelled(&self, position_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE paper_trades SET status = ?, resolved_at = ? WHERE position_id = ?",
        )
        .bind(PositionStatus::Cancelled.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Open positions to restore into the ledger at startup.
    pub async fn open_trades(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT position_id, timestamp, market_id, market_title, platform,
                   category, mode, kind, outcome_id, side, contracts, stake,
                   entry_price, deadline
            FROM paper_trades
            WHERE status = 'open'
            ORDER BY timestamp DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::new();
        for row in rows {
            match Self::row_to_position(&row) {
                Ok(p) => positions.push(p),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable open trade row");
                }
            }
        }
        Ok(positions)
    }

    fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
        let contracts = d(row.get::<f64, _>("contracts"));
        let kind = match row.get::<String, _>("kind").as_str() {
            "single" => PositionKind::Single {
                outcome_id: row.get::<Option<String>, _>("outcome_id").unwrap_or_default(),
                side: match row.get::<Option<String>, _>("side").as_deref() {
                    Some("NO") => Side::No,
                    _ => Side::Yes,
                },
                contracts,
            },
            _ => PositionKind::Basket { contracts },
        };

        Ok(Position {
            id: row.get("position_id"),
            market_id: row.get("market_id"),
            platform: row.get::<Option<String>, _>("platform").unwrap_or_default(),
            title: row.get::<Option<String>, _>("market_title").unwrap_or_default(),
            category: row
                .get::<Option<String>, _>("category")
                .and_then(|c| c.parse::<MarketCategory>().ok())
                .unwrap_or(MarketCategory::Other),
            mode: parse_mode(row.get::<Option<String>, _>("mode").as_deref()),
            kind,
            stake: d(row.get::<f64, _>("stake")),
            entry_price: row.get("entry_price"),
            opened_at: parse_time(row.get::<String, _>("timestamp").as_str())?,
            deadline: parse_time(
                row.get::<Option<String>, _>("deadline")
                    .as_deref()
                    .unwrap_or_default(),
            )?,
            status: PositionStatus::Open,
            pnl: Decimal::ZERO,
        })
    }

    // -- Aggregation ------------------------------------------------------

    pub async fn performance_stats(&self) -> Result<PerformanceStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN win = 1 THEN 1 ELSE 0 END), 0) AS wins,
                COALESCE(SUM(CASE WHEN win = 0 THEN 1 ELSE 0 END), 0) AS losses,
                COALESCE(SUM(pnl), 0.0) AS total_pnl,
                COALESCE(AVG(pnl), 0.0) AS avg_pnl,
                COUNT(CASE WHEN status = 'open' THEN 1 END) AS open_trades
            FROM paper_trades
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let wins: i64 = row.get("wins");
        let losses: i64 = row.get("losses");
        let resolved = wins + losses;

        Ok(PerformanceStats {
            total_trades: total as u64,
            wins: wins as u64,
            losses: losses as u64,
            win_rate: if resolved > 0 {
                wins as f64 / resolved as f64 * 100.0
            } else {
                0.0
            },
            total_pnl: row.get("total_pnl"),
            avg_pnl: row.get("avg_pnl"),
            open_trades: row.get::<i64, _>("open_trades") as u64,
        })
    }

    /// Realized P&L per category, best first.
    pub async fn category_pnl(&self) -> Result<Vec<(String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT category, COALESCE(SUM(pnl), 0.0) AS pnl
            FROM paper_trades
            WHERE status IN ('resolved_win', 'resolved_loss')
            GROUP BY category
            ORDER BY pnl DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Option<String>, _>("category").unwrap_or_default(), r.get("pnl")))
            .collect())
    }

    // -- Metrics & halt events --------------------------------------------

    pub async fn log_metrics(&self, state: &RiskState) -> Result<()> {
        let stats = self.performance_stats().await?;
        sqlx::query(
            r#"
            INSERT INTO metrics
            (timestamp, bankroll, daily_pnl, total_pnl, open_positions, win_rate, total_trades)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(state.bankroll.to_f64().unwrap_or(0.0))
        .bind(state.daily_pnl().to_f64().unwrap_or(0.0))
        .bind(state.total_pnl().to_f64().unwrap_or(0.0))
        .bind(state.open_positions as i64)
        .bind(stats.win_rate)
        .bind(stats.total_trades as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn log_halt_event(
        &self,
        reason: &str,
        bankroll: f64,
        daily_loss_pct: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO halt_events (timestamp, reason, bankroll, daily_loss_pct) VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(reason)
        .bind(bankroll)
        .bind(daily_loss_pct)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_mode(s: Option<&str>) -> DetectionMode {
    match s {
        Some("single_condition") => DetectionMode::SingleCondition,
        Some("time_boxed") => DetectionMode::TimeBoxed,
        _ => DetectionMode::Bracket,
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Bad timestamp in database: {s}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArbSide;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn temp_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("seer_test_{}.db", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    fn opportunity(market_id: &str) -> Opportunity {
        Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            platform: "kalshi".to_string(),
            market_id: market_id.to_string(),
            title: "Test market".to_string(),
            category: MarketCategory::Politics,
            mode: DetectionMode::Bracket,
            side: ArbSide::BuySet,
            num_outcomes: 3,
            price_sum: 0.93,
            gross_edge: 0.07,
            spread_cost: 0.01,
            net_edge: 0.05,
            deadline: Utc::now() + Duration::days(5),
            detected_at: Utc::now(),
        }
    }

    fn position(market_id: &str, stake: Decimal) -> Position {
        Position {
            id: uuid::Uuid::new_v4().to_string(),
            market_id: market_id.to_string(),
            platform: "kalshi".to_string(),
            title: "Test market".to_string(),
            category: MarketCategory::Politics,
            mode: DetectionMode::Bracket,
            kind: PositionKind::Basket {
                contracts: dec!(105),
            },
            stake,
            entry_price: 0.952,
            opened_at: Utc::now(),
            deadline: Utc::now() + Duration::days(5),
            status: PositionStatus::Open,
            pnl: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_log_and_restore_open_trades() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        let p = position("EVT-1", dec!(100));
        store.log_trade(&p).await.unwrap();

        let open = store.open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, p.id);
        assert_eq!(open[0].market_id, "EVT-1");
        assert_eq!(open[0].stake, dec!(100));
        assert_eq!(open[0].mode, DetectionMode::Bracket);
        assert!(matches!(open[0].kind, PositionKind::Basket { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_resolved_trades_not_restored() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        let p = position("EVT-1", dec!(100));
        store.log_trade(&p).await.unwrap();
        store
            .mark_trade_resolved(&p.id, PositionStatus::ResolvedWin, 5.0, true)
            .await
            .unwrap();

        assert!(store.open_trades().await.unwrap().is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_performance_stats() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        let a = position("EVT-1", dec!(100));
        let b = position("EVT-2", dec!(100));
        let c = position("EVT-3", dec!(100));
        store.log_trade(&a).await.unwrap();
        store.log_trade(&b).await.unwrap();
        store.log_trade(&c).await.unwrap();

        store
            .mark_trade_resolved(&a.id, PositionStatus::ResolvedWin, 5.0, true)
            .await
            .unwrap();
        store
            .mark_trade_resolved(&b.id, PositionStatus::ResolvedLoss, -100.0, false)
            .await
            .unwrap();

        let stats = store.performance_stats().await.unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 50.0).abs() < 1e-10);
        assert!((stats.total_pnl - (-95.0)).abs() < 1e-10);
        assert_eq!(stats.open_trades, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_category_pnl_aggregation() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        let mut a = position("EVT-1", dec!(100));
        a.category = MarketCategory::Politics;
        let mut b = position("EVT-2", dec!(100));
        b.category = MarketCategory::Sports;
        store.log_trade(&a).await.unwrap();
        store.log_trade(&b).await.unwrap();
        store
            .mark_trade_resolved(&a.id, PositionStatus::ResolvedWin, 5.0, true)
            .await
            .unwrap();
        store
            .mark_trade_resolved(&b.id, PositionStatus::ResolvedLoss, -100.0, false)
            .await
            .unwrap();

        let by_category = store.category_pnl().await.unwrap();
        assert_eq!(by_category.len(), 2);
        assert_eq!(by_category[0].0, "Politics");
        assert!((by_category[0].1 - 5.0).abs() < 1e-10);
        assert_eq!(by_category[1].0, "Sports");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_cancelled_trade_excluded_from_open() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        let p = position("EVT-1", dec!(100));
        store.log_trade(&p).await.unwrap();
        store.mark_trade_cancelled(&p.id).await.unwrap();

        assert!(store.open_trades().await.unwrap().is_empty());
        // Cancelled trades don't count toward win rate
        let stats = store.performance_stats().await.unwrap();
        assert_eq!(stats.wins + stats.losses, 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_log_opportunity_and_metrics() {
        let path = temp_path();
        let store = Store::connect(&path).await.unwrap();

        store
            .log_opportunity(&opportunity("EVT-1"), 7.5, false)
            .await
            .unwrap();
        store
            .log_metrics(&RiskState::new(dec!(5000)))
            .await
            .unwrap();
        store
            .log_halt_event("daily loss limit exceeded", 4750.0, 0.05)
            .await
            .unwrap();

        // No panics and the schema accepted everything; smoke-read one back
        let stats = store.performance_stats().await.unwrap();
        assert_eq!(stats.total_trades, 0);

        let _ = std::fs::remove_file(&path);
    }
}
