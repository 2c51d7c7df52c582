//! Account equity and profitability reporting.
//!
//! Equity = free + locked quote balance plus every OPEN position marked to the
//! last traded price. A symbol missing from the ticker falls back to its entry
//! price so one delisted pair cannot sink the whole valuation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::exchange::Exchange;
use crate::models::{EquitySnapshot, Side};
use crate::store::Store;

/// Reporting windows: label and length in days
const WINDOWS: [(&str, f64); 7] = [
    ("1h", 1.0 / 24.0),
    ("24h", 1.0),
    ("7d", 7.0),
    ("30d", 30.0),
    ("3m", 90.0),
    ("6m", 180.0),
    ("12m", 365.0),
];

#[derive(Debug, Clone, PartialEq)]
pub struct EquityBreakdown {
    pub free_quote: f64,
    pub invested_quote: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowPerf {
    pub label: &'static str,
    pub pct: f64,
    /// Equity in 30 days if this window's trend continues
    pub projection_30d: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfitabilityReport {
    pub latest_equity: f64,
    pub windows: Vec<WindowPerf>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TradeStats {
    pub total: usize,
    pub wins: usize,
    /// Outcomes of the five most recently closed positions, newest first
    pub last5: Vec<bool>,
}

pub struct EquityEngine {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    quote_asset: String,
}

impl EquityEngine {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<dyn Store>, quote_asset: &str) -> Self {
        Self {
            exchange,
            store,
            quote_asset: quote_asset.to_string(),
        }
    }

    pub async fn calculate_equity(&self) -> Result<EquityBreakdown> {
        let free_quote = self
            .exchange
            .account()
            .await?
            .iter()
            .find(|b| b.asset == self.quote_asset)
            .map(|b| b.total())
            .unwrap_or(0.0);

        // A dead ticker feed degrades to entry-price valuation
        let prices = match self.exchange.ticker_prices().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("ticker feed unavailable, valuing at entry prices: {}", e);
                Default::default()
            }
        };

        let mut invested_quote = 0.0;
        for position in self.store.open_positions().await? {
            let mark = prices
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.entry_price);
            invested_quote += position.qty * mark;
        }

        Ok(EquityBreakdown {
            free_quote,
            invested_quote,
            equity: free_quote + invested_quote,
        })
    }

    /// Persist the current valuation as a snapshot row
    pub async fn snapshot(&self) -> Result<EquitySnapshot> {
        let breakdown = self.calculate_equity().await?;
        let snapshot = EquitySnapshot {
            ts: Utc::now(),
            free_quote: breakdown.free_quote,
            invested_quote: breakdown.invested_quote,
            equity: breakdown.equity,
        };
        self.store.insert_equity_snapshot(&snapshot).await?;
        tracing::debug!(equity = snapshot.equity, "💰 equity snapshot");
        Ok(snapshot)
    }

    /// Windowed performance against historical snapshots.
    ///
    /// A window without a reference snapshot (or with a zero reference)
    /// reports 0% rather than an error; young accounts simply have flat
    /// history.
    pub async fn profitability(&self, now: DateTime<Utc>) -> Result<ProfitabilityReport> {
        let Some(latest) = self.store.latest_snapshot().await? else {
            return Ok(ProfitabilityReport::default());
        };

        let mut windows = Vec::with_capacity(WINDOWS.len());
        for (label, days) in WINDOWS {
            let cutoff = now - Duration::seconds((days * 86400.0) as i64);
            let reference = self.store.snapshot_at_or_before(cutoff).await?;
            let pct = match reference {
                Some(r) if r.equity != 0.0 => (latest.equity - r.equity) / r.equity * 100.0,
                _ => 0.0,
            };
            windows.push(WindowPerf {
                label,
                pct,
                projection_30d: latest.equity * (1.0 + pct / 100.0 * 30.0 / days),
            });
        }

        Ok(ProfitabilityReport {
            latest_equity: latest.equity,
            windows,
        })
    }

    /// Realized profit of one closed position: exit value minus entry value
    /// minus fees, taken from its first and last trades.
    async fn position_pnl(&self, position_id: uuid::Uuid) -> Result<Option<f64>> {
        let trades = self.store.trades_for_position(position_id).await?;
        let entry = trades.iter().find(|t| t.side == Side::Buy);
        let exit = trades.iter().rev().find(|t| t.side == Side::Sell);
        match (entry, exit) {
            (Some(entry), Some(exit)) => Ok(Some(
                (exit.price - entry.price) * exit.qty - entry.fees - exit.fees,
            )),
            _ => Ok(None),
        }
    }

    /// Summed realized PnL for one symbol over the past `days` days
    pub async fn realized_pnl(&self, symbol: &str, days: i64) -> Result<f64> {
        let cutoff = Utc::now() - Duration::days(days);
        let closed = self.store.closed_positions_since(symbol, cutoff).await?;

        let mut total = 0.0;
        for position in &closed {
            if let Some(pnl) = self.position_pnl(position.id).await? {
                total += pnl;
            }
        }
        Ok(total)
    }

    /// Win/loss record over all closed positions
    pub async fn trade_stats(&self) -> Result<TradeStats> {
        let closed = self.store.closed_positions().await?;
        let mut stats = TradeStats::default();
        for position in &closed {
            let Some(pnl) = self.position_pnl(position.id).await? else {
                continue;
            };
            stats.total += 1;
            if pnl > 0.0 {
                stats.wins += 1;
            }
            if stats.last5.len() < 5 {
                stats.last5.push(pnl > 0.0);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::models::{MethodTag, Position, Trade};
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    fn engine(exchange: Arc<MockExchange>, store: Arc<MemoryStore>) -> EquityEngine {
        EquityEngine::new(exchange, store, "USDT")
    }

    #[tokio::test]
    async fn test_equity_marks_to_ticker_with_entry_fallback() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("USDT", 900.0, 100.0);
        exchange.set_price("SOLUSDT", 25.0);
        let store = Arc::new(MemoryStore::new());

        // Priced by ticker
        let sol = Position::open("SOLUSDT".into(), Side::Buy, 2.0, 20.0, MethodTag::Auto);
        // Ticker has no DEADUSDT entry: valued at entry price
        let dead = Position::open("DEADUSDT".into(), Side::Buy, 10.0, 3.0, MethodTag::Auto);
        store.insert_position(&sol).await.unwrap();
        store.insert_position(&dead).await.unwrap();

        let breakdown = engine(exchange, store).calculate_equity().await.unwrap();
        assert_eq!(breakdown.free_quote, 1000.0);
        assert_eq!(breakdown.invested_quote, 2.0 * 25.0 + 10.0 * 3.0);
        assert_eq!(breakdown.equity, 1080.0);
    }

    #[tokio::test]
    async fn test_profitability_no_history() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let report = engine(exchange, store)
            .profitability(Utc::now())
            .await
            .unwrap();
        assert_eq!(report, ProfitabilityReport::default());
    }

    #[tokio::test]
    async fn test_profitability_windows() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        for (hours_ago, equity) in [(25, 100.0), (2, 105.0), (0, 110.0)] {
            store
                .insert_equity_snapshot(&EquitySnapshot {
                    ts: now - Duration::hours(hours_ago),
                    free_quote: equity,
                    invested_quote: 0.0,
                    equity,
                })
                .await
                .unwrap();
        }

        let report = engine(exchange, store).profitability(now).await.unwrap();
        assert_eq!(report.latest_equity, 110.0);

        let h1 = &report.windows[0];
        assert_eq!(h1.label, "1h");
        // Reference at -2h has equity 105
        assert!((h1.pct - (110.0 - 105.0) / 105.0 * 100.0).abs() < 1e-9);
        // 30-day projection scales the 1h trend by 30 / (1/24) periods
        let expected = 110.0 * (1.0 + h1.pct / 100.0 * 30.0 / (1.0 / 24.0));
        assert!((h1.projection_30d - expected).abs() < 1e-6);

        let d24 = &report.windows[1];
        assert!((d24.pct - 10.0).abs() < 1e-9);

        // No snapshot older than 7 days: flat
        assert_eq!(report.windows[2].pct, 0.0);
        assert_eq!(report.windows[2].projection_30d, 110.0);
    }

    async fn closed_position_with_trades(
        store: &MemoryStore,
        symbol: &str,
        entry: f64,
        exit: f64,
        qty: f64,
    ) {
        let p = Position::open(symbol.into(), Side::Buy, qty, entry, MethodTag::Auto);
        store.insert_position(&p).await.unwrap();
        let t0 = Utc::now() - Duration::minutes(10);
        for (side, price, at) in [(Side::Buy, entry, t0), (Side::Sell, exit, Utc::now())] {
            store
                .insert_trade(&Trade {
                    id: Uuid::new_v4(),
                    position_id: p.id,
                    symbol: symbol.into(),
                    side,
                    price,
                    qty,
                    fees: 0.0,
                    created_at: at,
                })
                .await
                .unwrap();
        }
        store
            .close_position_if_open(p.id, MethodTag::Auto, None, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_realized_pnl_and_stats() {
        let exchange = Arc::new(MockExchange::new());
        let store = Arc::new(MemoryStore::new());

        closed_position_with_trades(&store, "SOLUSDT", 20.0, 25.0, 2.0).await;
        closed_position_with_trades(&store, "SOLUSDT", 25.0, 24.0, 2.0).await;
        closed_position_with_trades(&store, "BTCUSDT", 30000.0, 31000.0, 0.01).await;

        let eng = engine(exchange, store);
        let pnl = eng.realized_pnl("SOLUSDT", 7).await.unwrap();
        assert!((pnl - (10.0 - 2.0)).abs() < 1e-9);

        let stats = eng.trade_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.last5.len(), 3);
    }
}
