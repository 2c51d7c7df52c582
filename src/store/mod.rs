//! Persistence seam. Postgres is the real backend; the in-memory store backs
//! tests and keeps the bot degradable when no database is configured.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DecisionLog, EquitySnapshot, MethodTag, Position, Trade, TradingConfig,
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_position(&self, position: &Position) -> Result<()>;

    /// All OPEN positions, most recently opened first
    async fn open_positions(&self) -> Result<Vec<Position>>;

    /// OPEN positions for one symbol, most recently opened first
    async fn open_positions_for(&self, symbol: &str) -> Result<Vec<Position>>;

    /// Close the position only if it is still OPEN.
    ///
    /// Returns false when someone else already closed it; the guard is what
    /// keeps concurrent close paths from double-closing. `new_qty` overrides
    /// the recorded quantity (reconciliation zeroes it out).
    async fn close_position_if_open(
        &self,
        id: Uuid,
        tag: MethodTag,
        new_qty: Option<f64>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// All CLOSED positions, most recently closed first
    async fn closed_positions(&self) -> Result<Vec<Position>>;

    /// CLOSED positions for one symbol closed at or after `cutoff`
    async fn closed_positions_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Position>>;

    async fn insert_trade(&self, trade: &Trade) -> Result<()>;

    /// Trades of one position in execution order
    async fn trades_for_position(&self, position_id: Uuid) -> Result<Vec<Trade>>;

    async fn trading_configs(&self) -> Result<Vec<TradingConfig>>;

    async fn upsert_trading_config(&self, config: &TradingConfig) -> Result<()>;

    async fn insert_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()>;

    /// Most recent snapshot, if any
    async fn latest_snapshot(&self) -> Result<Option<EquitySnapshot>>;

    /// Most recent snapshot taken at or before `ts`
    async fn snapshot_at_or_before(&self, ts: DateTime<Utc>) -> Result<Option<EquitySnapshot>>;

    async fn insert_decision(&self, log: &DecisionLog) -> Result<()>;

    /// Latest decision-log entries, newest first
    async fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionLog>>;
}
