//! Reconciliation: exchange balances are ground truth, local OPEN positions
//! are beliefs. Both passes are idempotent; running them again without an
//! external change corrects nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::exchange::Exchange;
use crate::models::{base_asset, MethodTag};
use crate::store::Store;

/// Balance at or below this counts as not held
const DUST_THRESHOLD: f64 = 0.0001;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanReport {
    pub count: usize,
    pub symbols: Vec<String>,
}

pub struct Reconciler {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    quote_asset: String,
}

impl Reconciler {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<dyn Store>, quote_asset: &str) -> Self {
        Self {
            exchange,
            store,
            quote_asset: quote_asset.to_string(),
        }
    }

    async fn balance_totals(&self) -> Result<HashMap<String, f64>> {
        Ok(self
            .exchange
            .account()
            .await?
            .into_iter()
            .map(|b| (b.asset.clone(), b.total()))
            .collect())
    }

    async fn force_close(&self, id: uuid::Uuid) -> Result<bool> {
        self.store
            .close_position_if_open(id, MethodTag::Sync, Some(0.0), Utc::now())
            .await
    }

    /// Force-close every OPEN position whose base asset is no longer held on
    /// the exchange. Returns how many rows were corrected.
    pub async fn sync(&self) -> Result<usize> {
        let balances = self.balance_totals().await?;
        let open = self.store.open_positions().await?;

        let mut corrected = 0;
        for position in &open {
            let base = base_asset(&position.symbol, &self.quote_asset);
            let held = balances.get(base).copied().unwrap_or(0.0);
            if held <= 0.0 && self.force_close(position.id).await? {
                tracing::info!(
                    symbol = %position.symbol,
                    id = %position.id,
                    "🔄 sync: no balance on exchange, force-closing"
                );
                corrected += 1;
            }
        }

        if corrected > 0 {
            tracing::info!(corrected, "sync pass corrected positions");
        }
        Ok(corrected)
    }

    /// Stricter sweep: also drops zero-quantity rows, dust-level holdings,
    /// and positions that only exist as earlier sync artifacts.
    pub async fn clean(&self) -> Result<CleanReport> {
        let balances = self.balance_totals().await?;
        let open = self.store.open_positions().await?;

        let mut report = CleanReport::default();
        for position in &open {
            let base = base_asset(&position.symbol, &self.quote_asset);
            let held = balances.get(base).copied().unwrap_or(0.0);
            let stale = position.qty <= 0.0
                || held <= DUST_THRESHOLD
                || position.open_method == MethodTag::Sync;
            if stale && self.force_close(position.id).await? {
                tracing::info!(symbol = %position.symbol, "🧹 clean: dropping stale position");
                report.count += 1;
                report.symbols.push(position.symbol.clone());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::models::{Position, Side};
    use crate::store::memory::MemoryStore;

    fn reconciler(exchange: Arc<MockExchange>, store: Arc<MemoryStore>) -> Reconciler {
        Reconciler::new(exchange, store, "USDT")
    }

    #[tokio::test]
    async fn test_sync_closes_unbacked_position() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(exchange.clone(), store.clone());

        let backed = Position::open("SOLUSDT".into(), Side::Buy, 2.0, 20.0, MethodTag::Auto);
        let unbacked = Position::open("BTCUSDT".into(), Side::Buy, 0.5, 30000.0, MethodTag::Auto);
        store.insert_position(&backed).await.unwrap();
        store.insert_position(&unbacked).await.unwrap();
        exchange.set_balance("SOL", 2.0, 0.0);

        assert_eq!(r.sync().await.unwrap(), 1);

        let open = store.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "SOLUSDT");

        let closed = store.closed_positions().await.unwrap();
        assert_eq!(closed[0].close_method, Some(MethodTag::Sync));
        assert_eq!(closed[0].qty, 0.0);
    }

    #[tokio::test]
    async fn test_sync_idempotent() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(exchange, store.clone());

        let p = Position::open("BTCUSDT".into(), Side::Buy, 0.5, 30000.0, MethodTag::Auto);
        store.insert_position(&p).await.unwrap();

        assert_eq!(r.sync().await.unwrap(), 1);
        // Nothing changed externally: the second pass corrects zero rows
        assert_eq!(r.sync().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clean_drops_sync_artifacts_and_dust() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(exchange.clone(), store.clone());

        // Survives sync (balance > 0) but is dust-level
        let dust = Position::open("AAAUSDT".into(), Side::Buy, 0.00005, 10.0, MethodTag::Auto);
        // Artifact of an earlier sync pass
        let artifact = Position::open("BBBUSDT".into(), Side::Buy, 1.0, 10.0, MethodTag::Sync);
        // Healthy
        let healthy = Position::open("CCCUSDT".into(), Side::Buy, 3.0, 10.0, MethodTag::Auto);
        for p in [&dust, &artifact, &healthy] {
            store.insert_position(p).await.unwrap();
        }
        exchange.set_balance("AAA", 0.00005, 0.0);
        exchange.set_balance("BBB", 1.0, 0.0);
        exchange.set_balance("CCC", 3.0, 0.0);

        // sync alone keeps all three: every base asset has a balance
        assert_eq!(r.sync().await.unwrap(), 0);

        let report = r.clean().await.unwrap();
        assert_eq!(report.count, 2);
        assert!(report.symbols.contains(&"AAAUSDT".to_string()));
        assert!(report.symbols.contains(&"BBBUSDT".to_string()));

        let open = store.open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "CCCUSDT");
    }

    #[tokio::test]
    async fn test_clean_idempotent() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let r = reconciler(exchange, store.clone());

        let p = Position::open("BBBUSDT".into(), Side::Buy, 1.0, 10.0, MethodTag::Sync);
        store.insert_position(&p).await.unwrap();

        assert_eq!(r.clean().await.unwrap().count, 1);
        assert_eq!(r.clean().await.unwrap().count, 0);
    }
}
