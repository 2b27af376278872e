//! Trade journal - SQLite log of every order the bot submits
//!
//! Used for the end-of-session summary and to seed the risk ledger with the
//! amount already committed today after a restart.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStatus {
    Confirmed,
    Failed,
}

impl TradeStatus {
    fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Confirmed => "CONFIRMED",
            TradeStatus::Failed => "FAILED",
        }
    }
}

/// Fixed-width UTC timestamps so string order is time order
fn stored_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One submitted order, successful or not
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub market_title: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub price: Decimal,
    pub probability: f64,
    pub status: TradeStatus,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub is_dry_run: bool,
}

/// Aggregates over confirmed trades
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeSummary {
    pub total_trades: u32,
    pub total_amount: Decimal,
    pub up_trades: u32,
    pub down_trades: u32,
    pub failed_trades: u32,
    pub avg_probability: f64,
    pub last_trade: Option<DateTime<Utc>>,
}

/// Trade journal backed by SQLite. The connection sits behind a mutex so
/// concurrent cycles can share one journal.
pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open trade journal at {}", path.display()))?;
        let journal = Self::init(conn)?;
        info!("Trade journal initialized at {}", path.display());
        Ok(journal)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                market_id TEXT NOT NULL,
                market_title TEXT NOT NULL,
                direction TEXT NOT NULL,
                amount TEXT NOT NULL,
                price TEXT NOT NULL,
                probability REAL NOT NULL,
                status TEXT NOT NULL,
                order_id TEXT,
                error TEXT,
                is_dry_run INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_timestamp ON trades(timestamp)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn insert_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trades (
                timestamp, market_id, market_title, direction, amount,
                price, probability, status, order_id, error, is_dry_run
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                stored_time(trade.timestamp),
                trade.market_id,
                trade.market_title,
                trade.direction.to_string(),
                trade.amount.to_string(),
                trade.price.to_string(),
                trade.probability,
                trade.status.as_str(),
                trade.order_id,
                trade.error,
                trade.is_dry_run as i32,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Summary of trades at or after `since`
    pub fn summary_since(&self, since: DateTime<Utc>) -> Result<TradeSummary> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT timestamp, direction, amount, probability, status
             FROM trades WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;

        let rows = stmt
            .query_map([stored_time(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = TradeSummary::default();
        let mut probability_sum = 0.0;

        for (timestamp, direction, amount, probability, status) in rows {
            if status != TradeStatus::Confirmed.as_str() {
                summary.failed_trades += 1;
                continue;
            }
            summary.total_trades += 1;
            summary.total_amount += Decimal::from_str(&amount).unwrap_or_default();
            probability_sum += probability;
            match direction.as_str() {
                "UP" => summary.up_trades += 1,
                "DOWN" => summary.down_trades += 1,
                _ => {}
            }
            summary.last_trade = DateTime::parse_from_rfc3339(&timestamp)
                .ok()
                .map(|t| t.with_timezone(&Utc));
        }

        if summary.total_trades > 0 {
            summary.avg_probability = probability_sum / summary.total_trades as f64;
        }
        Ok(summary)
    }

    /// Confirmed amount at or after `since` in one mode. Dry-run fills never
    /// count against the live budget and live fills never count against a
    /// dry run.
    pub fn committed_since(&self, since: DateTime<Utc>, dry_run: bool) -> Result<Decimal> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT amount FROM trades
             WHERE timestamp >= ?1 AND status = ?2 AND is_dry_run = ?3",
        )?;
        let amounts = stmt
            .query_map(
                params![stored_time(since), TradeStatus::Confirmed.as_str(), dry_run as i32],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(amounts
            .iter()
            .map(|a| Decimal::from_str(a).unwrap_or_default())
            .sum())
    }
}
