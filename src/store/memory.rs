//! In-memory store. Used directly by tests and as the fallback backend when
//! no DATABASE_URL is configured; everything is lost on restart.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DecisionLog, EquitySnapshot, MethodTag, Position, PositionStatus, Trade, TradingConfig,
};

use super::Store;

#[derive(Default)]
struct Inner {
    positions: Vec<Position>,
    trades: Vec<Trade>,
    configs: Vec<TradingConfig>,
    snapshots: Vec<EquitySnapshot>,
    decisions: Vec<DecisionLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_position(&self, position: &Position) -> Result<()> {
        self.inner.lock().unwrap().positions.push(position.clone());
        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        let mut open: Vec<Position> = inner
            .positions
            .iter()
            .filter(|p| p.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        Ok(open)
    }

    async fn open_positions_for(&self, symbol: &str) -> Result<Vec<Position>> {
        let mut open = self.open_positions().await?;
        open.retain(|p| p.symbol == symbol);
        Ok(open)
    }

    async fn close_position_if_open(
        &self,
        id: Uuid,
        tag: MethodTag,
        new_qty: Option<f64>,
        closed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        for p in inner.positions.iter_mut() {
            if p.id == id && p.is_open() {
                p.status = PositionStatus::Closed;
                p.closed_at = Some(closed_at);
                p.close_method = Some(tag);
                if let Some(qty) = new_qty {
                    p.qty = qty;
                }
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn closed_positions(&self) -> Result<Vec<Position>> {
        let inner = self.inner.lock().unwrap();
        let mut closed: Vec<Position> = inner
            .positions
            .iter()
            .filter(|p| !p.is_open())
            .cloned()
            .collect();
        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        Ok(closed)
    }

    async fn closed_positions_since(
        &self,
        symbol: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let mut closed = self.closed_positions().await?;
        closed.retain(|p| p.symbol == symbol && p.closed_at.is_some_and(|t| t >= cutoff));
        Ok(closed)
    }

    async fn insert_trade(&self, trade: &Trade) -> Result<()> {
        self.inner.lock().unwrap().trades.push(trade.clone());
        Ok(())
    }

    async fn trades_for_position(&self, position_id: Uuid) -> Result<Vec<Trade>> {
        let inner = self.inner.lock().unwrap();
        let mut trades: Vec<Trade> = inner
            .trades
            .iter()
            .filter(|t| t.position_id == position_id)
            .cloned()
            .collect();
        trades.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(trades)
    }

    async fn trading_configs(&self) -> Result<Vec<TradingConfig>> {
        Ok(self.inner.lock().unwrap().configs.clone())
    }

    async fn upsert_trading_config(&self, config: &TradingConfig) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.configs.iter_mut().find(|c| c.symbol == config.symbol) {
            *existing = config.clone();
        } else {
            inner.configs.push(config.clone());
        }
        Ok(())
    }

    async fn insert_equity_snapshot(&self, snapshot: &EquitySnapshot) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshots.push(snapshot.clone());
        inner.snapshots.sort_by(|a, b| a.ts.cmp(&b.ts));
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<EquitySnapshot>> {
        Ok(self.inner.lock().unwrap().snapshots.last().cloned())
    }

    async fn snapshot_at_or_before(&self, ts: DateTime<Utc>) -> Result<Option<EquitySnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .rev()
            .find(|s| s.ts <= ts)
            .cloned())
    }

    async fn insert_decision(&self, log: &DecisionLog) -> Result<()> {
        self.inner.lock().unwrap().decisions.push(log.clone());
        Ok(())
    }

    async fn recent_decisions(&self, limit: usize) -> Result<Vec<DecisionLog>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.decisions.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;

    #[tokio::test]
    async fn test_open_positions_most_recent_first() {
        let store = MemoryStore::new();
        let mut first = Position::open("BTCUSDT".into(), Side::Buy, 1.0, 100.0, MethodTag::Auto);
        first.opened_at = Utc::now() - chrono::Duration::hours(2);
        let second = Position::open("BTCUSDT".into(), Side::Buy, 2.0, 110.0, MethodTag::Auto);

        store.insert_position(&first).await.unwrap();
        store.insert_position(&second).await.unwrap();

        let open = store.open_positions_for("BTCUSDT").await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].id, second.id);
    }

    #[tokio::test]
    async fn test_close_if_open_is_single_shot() {
        let store = MemoryStore::new();
        let p = Position::open("BTCUSDT".into(), Side::Buy, 1.0, 100.0, MethodTag::Auto);
        store.insert_position(&p).await.unwrap();

        let now = Utc::now();
        assert!(store
            .close_position_if_open(p.id, MethodTag::Auto, None, now)
            .await
            .unwrap());
        // Second attempt finds it already closed
        assert!(!store
            .close_position_if_open(p.id, MethodTag::Manual, None, now)
            .await
            .unwrap());

        let closed = store.closed_positions().await.unwrap();
        assert_eq!(closed[0].close_method, Some(MethodTag::Auto));
    }

    #[tokio::test]
    async fn test_close_with_qty_override() {
        let store = MemoryStore::new();
        let p = Position::open("SOLUSDT".into(), Side::Buy, 5.0, 20.0, MethodTag::Auto);
        store.insert_position(&p).await.unwrap();

        store
            .close_position_if_open(p.id, MethodTag::Sync, Some(0.0), Utc::now())
            .await
            .unwrap();
        let closed = store.closed_positions().await.unwrap();
        assert_eq!(closed[0].qty, 0.0);
    }

    #[tokio::test]
    async fn test_upsert_config_replaces() {
        let store = MemoryStore::new();
        let mut cfg = TradingConfig {
            symbol: "BTCUSDT".into(),
            method: crate::models::Method::Rsi,
            params: Default::default(),
        };
        store.upsert_trading_config(&cfg).await.unwrap();
        cfg.method = crate::models::Method::Macd;
        store.upsert_trading_config(&cfg).await.unwrap();

        let configs = store.trading_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].method, crate::models::Method::Macd);
    }

    #[tokio::test]
    async fn test_snapshot_at_or_before() {
        let store = MemoryStore::new();
        let t0 = Utc::now() - chrono::Duration::hours(3);
        for (i, equity) in [100.0, 110.0, 120.0].iter().enumerate() {
            store
                .insert_equity_snapshot(&EquitySnapshot {
                    ts: t0 + chrono::Duration::hours(i as i64),
                    free_quote: *equity,
                    invested_quote: 0.0,
                    equity: *equity,
                })
                .await
                .unwrap();
        }

        let s = store
            .snapshot_at_or_before(t0 + chrono::Duration::minutes(90))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(s.equity, 110.0);

        assert!(store
            .snapshot_at_or_before(t0 - chrono::Duration::hours(1))
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.latest_snapshot().await.unwrap().unwrap().equity, 120.0);
    }
}
