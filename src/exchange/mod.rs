//! Exchange access: the trait every venue client implements plus the
//! account/order types shared across the bot.

pub mod binance;
pub mod mock;

pub use binance::BinanceClient;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Kline, Side, SymbolFilters};

/// Free and locked amounts of one asset
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub asset: String,
    pub free: f64,
    pub locked: f64,
}

impl AccountBalance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

/// Confirmed execution of a market order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub order_id: i64,
    pub executed_qty: f64,
    pub avg_price: f64,
    pub fees: f64,
}

/// Venue client seam. The live implementation talks to Binance spot; tests
/// use the scripted mock.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// All non-zero asset balances on the account
    async fn account(&self) -> Result<Vec<AccountBalance>>;

    /// Submit a market order and wait for the fill confirmation
    async fn market_order(&self, symbol: &str, side: Side, qty: f64) -> Result<OrderFill>;

    /// Cancel every open order on the symbol. Succeeds when there is nothing
    /// to cancel.
    async fn cancel_open_orders(&self, symbol: &str) -> Result<()>;

    /// LOT_SIZE / NOTIONAL filters for the symbol
    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters>;

    /// Last traded price of every symbol
    async fn ticker_prices(&self) -> Result<HashMap<String, f64>>;

    /// Last traded price of one symbol
    async fn price(&self, symbol: &str) -> Result<f64>;

    /// Most recent candlesticks, oldest first
    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>>;
}
