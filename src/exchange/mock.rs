//! Scripted in-memory exchange for tests.
//!
//! Prices, balances, and filters are seeded up front; market orders fill at
//! the seeded price and mutate the base-asset balance, so settlement checks
//! behave like the real venue.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BotError, Result};
use crate::models::{Kline, Side, SymbolFilters};

use super::{AccountBalance, Exchange, OrderFill};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedOrder {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
}

#[derive(Default)]
struct Inner {
    prices: HashMap<String, f64>,
    // asset -> (free, locked)
    balances: HashMap<String, (f64, f64)>,
    filters: HashMap<String, SymbolFilters>,
    klines: HashMap<String, Vec<Kline>>,
    fail_orders: HashSet<String>,
    fail_cancels: HashSet<String>,
    orders: Vec<RecordedOrder>,
    next_order_id: i64,
}

#[derive(Default)]
pub struct MockExchange {
    inner: Mutex<Inner>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.inner
            .lock()
            .unwrap()
            .prices
            .insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, asset: &str, free: f64, locked: f64) {
        self.inner
            .lock()
            .unwrap()
            .balances
            .insert(asset.to_string(), (free, locked));
    }

    pub fn set_filters(&self, symbol: &str, filters: SymbolFilters) {
        self.inner
            .lock()
            .unwrap()
            .filters
            .insert(symbol.to_string(), filters);
    }

    pub fn set_klines(&self, symbol: &str, klines: Vec<Kline>) {
        self.inner
            .lock()
            .unwrap()
            .klines
            .insert(symbol.to_string(), klines);
    }

    /// Make every market order on `symbol` fail with a rejection
    pub fn fail_orders_for(&self, symbol: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_orders
            .insert(symbol.to_string());
    }

    pub fn fail_cancels_for(&self, symbol: &str) {
        self.inner
            .lock()
            .unwrap()
            .fail_cancels
            .insert(symbol.to_string());
    }

    pub fn orders(&self) -> Vec<RecordedOrder> {
        self.inner.lock().unwrap().orders.clone()
    }

    fn base_asset(symbol: &str) -> String {
        crate::models::base_asset(symbol, "USDT").to_string()
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn account(&self) -> Result<Vec<AccountBalance>> {
        let inner = self.inner.lock().unwrap();
        let mut balances: Vec<AccountBalance> = inner
            .balances
            .iter()
            .filter(|(_, (free, locked))| *free > 0.0 || *locked > 0.0)
            .map(|(asset, (free, locked))| AccountBalance {
                asset: asset.clone(),
                free: *free,
                locked: *locked,
            })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(balances)
    }

    async fn market_order(&self, symbol: &str, side: Side, qty: f64) -> Result<OrderFill> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_orders.contains(symbol) {
            return Err(BotError::ExchangeRejection {
                code: -2010,
                reason: "scripted rejection".to_string(),
            });
        }
        let price = *inner
            .prices
            .get(symbol)
            .ok_or_else(|| BotError::Transient(format!("no price seeded for {symbol}")))?;

        inner.orders.push(RecordedOrder {
            symbol: symbol.to_string(),
            side,
            qty,
        });

        let base = Self::base_asset(symbol);
        let entry = inner.balances.entry(base).or_insert((0.0, 0.0));
        match side {
            Side::Buy => entry.0 += qty,
            Side::Sell => entry.0 = (entry.0 - qty).max(0.0),
        }

        inner.next_order_id += 1;
        Ok(OrderFill {
            order_id: inner.next_order_id,
            executed_qty: qty,
            avg_price: price,
            fees: 0.0,
        })
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_cancels.contains(symbol) {
            return Err(BotError::Transient("scripted cancel failure".to_string()));
        }
        Ok(())
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.filters.get(symbol).copied().unwrap_or(SymbolFilters {
            step_size: 0.001,
            min_qty: 0.0,
            min_notional: None,
        }))
    }

    async fn ticker_prices(&self) -> Result<HashMap<String, f64>> {
        Ok(self.inner.lock().unwrap().prices.clone())
    }

    async fn price(&self, symbol: &str) -> Result<f64> {
        let inner = self.inner.lock().unwrap();
        inner
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| BotError::Transient(format!("no price seeded for {symbol}")))
    }

    async fn klines(&self, symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let inner = self.inner.lock().unwrap();
        let mut klines = inner.klines.get(symbol).cloned().unwrap_or_default();
        if klines.len() > limit as usize {
            klines = klines.split_off(klines.len() - limit as usize);
        }
        Ok(klines)
    }
}
