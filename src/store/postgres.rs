//! Postgres persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::models::{
    DecisionLog, EquitySnapshot, Method, MethodTag, Position, PositionStatus, Side, Signal,
    StrategyParams, Trade, TradingConfig,
};

use super::Store;

pub struct PgStore {
    pool: PgPool,
}

fn dec(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default()
}

fn num(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn bad_column(column: &str, value: &str) -> BotError {
    BotError::InconsistentState(format!("unrecognized {column} value in store: {value}"))
}

fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position> {
    let side_str: String = row.get("side");
    let status_str: String = row.get("status");
    let open_method_str: String = row.get("open_method");
    let close_method_str: Option<String> = row.get("close_method");

    let close_method = match close_method_str {
        Some(s) => Some(MethodTag::parse(&s).ok_or_else(|| bad_column("close_method", &s))?),
        None => None,
    };

    Ok(Position {
        id: row.get("id"),
        symbol: row.get("symbol"),
        side: Side::parse(&side_str).ok_or_else(|| bad_column("side", &side_str))?,
        qty: num(row.get("qty")),
        entry_price: num(row.get("entry_price")),
        stop_loss: row.get::<Option<Decimal>, _>("stop_loss").map(num),
        take_profit: row.get::<Option<Decimal>, _>("take_profit").map(num),
        status: PositionStatus::parse(&status_str)
            .ok_or_else(|| bad_column("status", &status_str))?,
        opened_at: row.get("opened_at"),
        closed_at: row.get("closed_at"),
        open_method: MethodTag::parse(&open_method_str)
            .ok_or_else(|| bad_column("open_method", &open_method_str))?,
        close_method,
    })
}

fn row_to_trade(row: &sqlx::postgres::PgRow) -> Result<Trade> {
    let side_str: String = row.get("side");
    Ok(Trade {
        id: row.get("id"),
        position_id: row.get("position_id"),
        symbol: row.get("symbol"),
        side: Side::parse(&side_str).ok_or_else(|| bad_column("side", &side_str))?,
        price: num(row.get("price")),
        qty: num(row.get("qty")),
        fees: num(row.get("fees")),
        created_at: row.get("created_at"),
    })
}

fn row_to_snapshot(row: &sqlx::postgres::PgRow) -> EquitySnapshot {
    EquitySnapshot {
        ts: row.get("ts"),
        free_quote: num(row.get("free_quote")),
        invested_quote: num(row.get("invested_quote")),
        equity: num(row.get("equity")),
    }
}

const POSITION_COLUMNS: &str = "id, symbol, side, qty, entry_price, stop_loss, take_profit, \
     status, opened_at, closed_at, open_method, close_method";

impl PgStore {
    /// Connect and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| BotError::Configuration(format!("migration failed: {e}")))?;

        tracing::info!("Connected to Postgres");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_position(&self, p: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, side, qty, entry_price, stop_loss, take_profit,
                status, opened_at, closed_at, open_method, close_method
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(p.id)
        .bind(&p.symbol)
        .bind(p.side.as_str())
        .bind(dec(p.qty))
        .bind(dec(p.entry_price))
        .bind(p.stop_loss.map(dec))
        .bind(p.take_profit.map(dec))
        .bind(p.status.as_str())
        .bind(p.opened_at)
        .bind(p.closed_at)
        .bind(p.open_method.as_str())
        .bind(p.close_method.map(|m| m.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE status = 'OPEN' ORDER BY opened_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn open_positions_for(&self, symbol: &str) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE symbol = $1 AND status = 'OPEN' ORDER BY opened_at DESC"
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn close_position_if_open(
        &self,
        id: Uuid,
        tag: MethodTag,
        new_qty: Option<f64>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        // Guarded update: the WHERE clause loses the race instead of the data
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'CLOSED',
                closed_at = $2,
                close_method = $3,
                qty = COALESCE($4, qty),
                updated_at = NOW()
            WHERE id = $1 AND status = 'OPEN'
            "#,
        )
        .bind(id)
        .bind(closed_at)
        .bind(tag.as_str())
        .bind(new_qty.map(dec))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn closed_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE status = 'CLOSED' ORDER BY closed_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn closed_positions_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE symbol = $1 AND status = 'CLOSED' AND closed_at >= $2 \
             ORDER BY closed_at DESC"
        ))
        .bind(symbol)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    async fn insert_trade(&self, t: &Trade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, position_id, symbol, side, price, qty, fees, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(t.id)
        .bind(t.position_id)
        .bind(&t.symbol)
        .bind(t.side.as_str())
        .bind(dec(t.price))
        .bind(dec(t.qty))
        .bind(dec(t.fees))
        .bind(t.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn trades_for_position(&self, position_id: Uuid) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT id, position_id, symbol, side, price, qty, fees, created_at \
             FROM trades WHERE position_id = $1 ORDER BY created_at ASC",
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn trading_configs(&self) -> Result<Vec<TradingConfig>> {
        let rows = sqlx::query("SELECT symbol, method, params FROM trading_configs")
            .fetch_all(&self.pool)
            .await?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let method_str: String = row.get("method");
            let params_json: serde_json::Value = row.get("params");
            configs.push(TradingConfig {
                symbol: row.get("symbol"),
                method: Method::parse(&method_str)
                    .ok_or_else(|| bad_column("method", &method_str))?,
                params: serde_json::from_value::<StrategyParams>(params_json)?,
            });
        }
        Ok(configs)
    }

    async fn upsert_trading_config(&self, config: &TradingConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trading_configs (symbol, method, params)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol) DO UPDATE SET
                method = EXCLUDED.method,
                params = EXCLUDED.params,
                updated_at = NOW()
            "#,
        )
        .bind(&config.symbol)
        .bind(config.method.as_str())
        .bind(serde_json::to_value(&config.params)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_equity_snapshot(&self, s: &EquitySnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO equity_snapshots (ts, free_quote, invested_quote, equity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ts) DO NOTHING
            "#,
        )
        .bind(s.ts)
        .bind(dec(s.free_quote))
        .bind(dec(s.invested_quote))
        .bind(dec(s.equity))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<EquitySnapshot>> {
        let row = sqlx::query(
            "SELECT ts, free_quote, invested_quote, equity \
             FROM equity_snapshots ORDER BY ts DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_snapshot))
    }

    async fn snapshot_at_or_before(&self, ts: DateTime<Utc>) -> Result<Option<EquitySnapshot>> {
        let row = sqlx::query(
            "SELECT ts, free_quote, invested_quote, equity \
             FROM equity_snapshots WHERE ts <= $1 ORDER BY ts DESC LIMIT 1",
        )
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_snapshot))
    }

    async fn insert_decision(&self, log: &DecisionLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decision_logs (id, symbol, method, signal, price, params, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(&log.symbol)
        .bind(log.method.as_str())
        .bind(log.signal.as_str())
        .bind(dec(log.price))
        .bind(&log.params)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionLog>> {
        let rows = sqlx::query(
            "SELECT id, symbol, method, signal, price, params, created_at \
             FROM decision_logs ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let method_str: String = row.get("method");
            let signal_str: String = row.get("signal");
            let signal = match signal_str.as_str() {
                "BUY" => Signal::Buy,
                "SELL" => Signal::Sell,
                "HOLD" => Signal::Hold,
                other => return Err(bad_column("signal", other)),
            };
            logs.push(DecisionLog {
                id: row.get("id"),
                symbol: row.get("symbol"),
                method: Method::parse(&method_str)
                    .ok_or_else(|| bad_column("method", &method_str))?,
                signal,
                price: num(row.get("price")),
                params: row.get("params"),
                created_at: row.get("created_at"),
            });
        }
        Ok(logs)
    }
}
