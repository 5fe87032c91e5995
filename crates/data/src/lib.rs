//! Embedded SQLite persistence.
//!
//! The store is a recovery and reporting aid only: the live strategies
//! never read from it for decisions. Writes are fire-and-forget from
//! the strategy loop's point of view (awaited, but failures are logged
//! and swallowed by the caller). The schema is append-oriented:
//! positions and fills are recorded as they happened, not updated in
//! place, with the one exception of the singleton baselines row.
//!
//! Decimals are stored as TEXT to survive SQLite's float affinity.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::info;

/// Embedded relational store.
pub struct Store {
    pool: SqlitePool,
}

/// A persisted fill row.
#[derive(Debug, Clone)]
pub struct FillRow {
    pub market: String,
    pub order_id: String,
    pub side: String,
    pub size: Decimal,
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// A persisted trade (cycle or lock) row.
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub market: String,
    pub strategy: String,
    pub kind: String,
    pub pnl: Decimal,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl Store {
    /// Opens (and creates if missing) the store at `url`
    /// (e.g. `sqlite://splitflip.db`).
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(%url, "store opened");
        Ok(store)
    }

    /// Creates the schema when absent. One statement per call; the
    /// prepared-statement path cannot batch them.
    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS positions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        side TEXT NOT NULL,
        qty TEXT NOT NULL,
        cost TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS fills (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        order_id TEXT NOT NULL,
        side TEXT NOT NULL,
        size TEXT NOT NULL,
        price TEXT NOT NULL,
        filled_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS trades (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        strategy TEXT NOT NULL,
        kind TEXT NOT NULL,
        pnl TEXT NOT NULL,
        detail TEXT NOT NULL,
        traded_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS baselines (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        market TEXT NOT NULL,
        imbalance TEXT NOT NULL,
        up_qty TEXT NOT NULL,
        down_qty TEXT NOT NULL,
        saved_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS redemption_attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        outcome_index INTEGER NOT NULL,
        attempted_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS monitor_trades (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        market TEXT NOT NULL,
        token_id TEXT NOT NULL,
        price TEXT NOT NULL,
        size TEXT NOT NULL,
        observed_at TEXT NOT NULL
    )"#,
];

impl Store {
    /// Appends a position snapshot for one side.
    pub async fn record_position(
        &self,
        market: &str,
        side: &str,
        qty: Decimal,
        cost: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO positions (market, side, qty, cost, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(market)
        .bind(side)
        .bind(qty.to_string())
        .bind(cost.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends an observed fill.
    pub async fn record_fill(&self, fill: &FillRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO fills (market, order_id, side, size, price, filled_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&fill.market)
        .bind(&fill.order_id)
        .bind(&fill.side)
        .bind(fill.size.to_string())
        .bind(fill.price.to_string())
        .bind(fill.at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a completed trade (profit lock, cycle close, redeem).
    pub async fn record_trade(&self, trade: &TradeRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades (market, strategy, kind, pnl, detail, traded_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&trade.market)
        .bind(&trade.strategy)
        .bind(&trade.kind)
        .bind(trade.pnl.to_string())
        .bind(&trade.detail)
        .bind(trade.at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upserts the singleton baselines row.
    pub async fn save_baseline(
        &self,
        market: &str,
        imbalance: Decimal,
        up_qty: Decimal,
        down_qty: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO baselines (id, market, imbalance, up_qty, down_qty, saved_at)
            VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                market = excluded.market,
                imbalance = excluded.imbalance,
                up_qty = excluded.up_qty,
                down_qty = excluded.down_qty,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(market)
        .bind(imbalance.to_string())
        .bind(up_qty.to_string())
        .bind(down_qty.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a redemption attempt.
    pub async fn record_redemption_attempt(&self, market: &str, outcome_index: usize) -> Result<()> {
        sqlx::query(
            "INSERT INTO redemption_attempts (market, outcome_index, attempted_at) VALUES (?, ?, ?)",
        )
        .bind(market)
        .bind(outcome_index as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a trade print observed on the market channel
    /// (anyone's trade, not necessarily ours).
    pub async fn record_monitor_trade(
        &self,
        market: &str,
        token_id: &str,
        price: Decimal,
        size: Decimal,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO monitor_trades (market, token_id, price, size, observed_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(market)
        .bind(token_id)
        .bind(price.to_string())
        .bind(size.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total realized PnL across recorded trades, for the reporting
    /// verbs.
    pub async fn total_pnl(&self) -> Result<Decimal> {
        let rows = sqlx::query("SELECT pnl FROM trades").fetch_all(&self.pool).await?;
        let mut total = Decimal::ZERO;
        for row in rows {
            let pnl: String = row.get("pnl");
            total += pnl.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }

    /// Most recent trades, newest first.
    pub async fn recent_trades(&self, limit: u32) -> Result<Vec<TradeRow>> {
        let rows = sqlx::query(
            "SELECT market, strategy, kind, pnl, detail, traded_at FROM trades ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let pnl: String = row.get("pnl");
                let at: String = row.get("traded_at");
                TradeRow {
                    market: row.get("market"),
                    strategy: row.get("strategy"),
                    kind: row.get("kind"),
                    pnl: pnl.parse().unwrap_or(Decimal::ZERO),
                    detail: row.get("detail"),
                    at: DateTime::parse_from_rfc3339(&at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                }
            })
            .collect())
    }
}
