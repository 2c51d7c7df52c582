//! Position lifecycle: opening, closing, and the close-everything sweep.
//!
//! Local state changes only after the exchange confirms a fill. A rejection
//! leaves no trace; a persistence failure after a confirmed fill is surfaced
//! as `InconsistentState` and repaired by the next reconciliation pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{BotError, Result};
use crate::exchange::{Exchange, OrderFill};
use crate::models::{base_asset, MethodTag, Position, Side, Trade};
use crate::normalize::{meets_min_notional, normalize};
use crate::store::Store;

/// Base-asset dust below this is considered fully settled
pub const RESIDUAL_EPSILON: f64 = 0.0001;

const MAX_ORDER_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_SETTLE_WAIT: Duration = Duration::from_millis(1500);

/// Outcome of a close-everything sweep. Per-position failures land in
/// `skipped`; the sweep itself never aborts.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CloseAllReport {
    pub closed: Vec<String>,
    pub count: usize,
    pub skipped: Vec<(String, String)>,
}

pub struct Lifecycle {
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    quote_asset: String,
    settle_wait: Duration,
}

impl Lifecycle {
    pub fn new(exchange: Arc<dyn Exchange>, store: Arc<dyn Store>, quote_asset: &str) -> Self {
        Self {
            exchange,
            store,
            quote_asset: quote_asset.to_string(),
            settle_wait: DEFAULT_SETTLE_WAIT,
        }
    }

    /// Shorten the post-order settlement wait (tests)
    pub fn with_settle_wait(mut self, wait: Duration) -> Self {
        self.settle_wait = wait;
        self
    }

    /// Submit a market order, retrying transient failures with a short
    /// backoff. Rejections propagate immediately.
    async fn submit_market(&self, symbol: &str, side: Side, qty: f64) -> Result<OrderFill> {
        let mut attempt = 1;
        loop {
            match self.exchange.market_order(symbol, side, qty).await {
                Ok(fill) => return Ok(fill),
                Err(e) if e.is_transient() && attempt < MAX_ORDER_ATTEMPTS => {
                    tracing::warn!(
                        symbol,
                        attempt,
                        "transient order failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open a long position by spending `quote_amount` of the quote asset.
    ///
    /// Nothing is persisted until the exchange confirms the fill, so a
    /// rejection leaves no local state behind.
    pub async fn open_market_quote(
        &self,
        symbol: &str,
        quote_amount: f64,
        tag: MethodTag,
    ) -> Result<Position> {
        let price = self.exchange.price(symbol).await?;
        if price <= 0.0 {
            return Err(BotError::InconsistentState(format!(
                "non-positive price {price} for {symbol}"
            )));
        }

        let filters = self.exchange.symbol_filters(symbol).await?;
        let qty = normalize(symbol, quote_amount / price, &filters)?;
        if !meets_min_notional(qty, price, &filters) {
            return Err(BotError::InvalidQuantity {
                symbol: symbol.to_string(),
                raw: quote_amount / price,
                normalized: qty,
            });
        }

        let fill = self.submit_market(symbol, Side::Buy, qty).await?;
        tracing::info!(
            symbol,
            qty = fill.executed_qty,
            price = fill.avg_price,
            "📈 opened position"
        );

        let position = Position::open(
            symbol.to_string(),
            Side::Buy,
            fill.executed_qty,
            fill.avg_price,
            tag,
        );
        if let Err(e) = self.store.insert_position(&position).await {
            tracing::error!(symbol, "filled on exchange but failed to persist: {}", e);
            return Err(BotError::InconsistentState(format!(
                "position for {symbol} filled but not recorded"
            )));
        }

        let entry = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            price: fill.avg_price,
            qty: fill.executed_qty,
            fees: fill.fees,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_trade(&entry).await {
            tracing::warn!(symbol, "entry trade not recorded: {}", e);
        }

        Ok(position)
    }

    /// Close one position with an opposite-side market order.
    pub async fn close_position(&self, position: &Position, tag: MethodTag) -> Result<Trade> {
        let filters = self.exchange.symbol_filters(&position.symbol).await?;
        let qty = normalize(&position.symbol, position.qty, &filters)?;

        let fill = self
            .submit_market(&position.symbol, position.side.opposite(), qty)
            .await?;
        let now = Utc::now();

        let closed = self
            .store
            .close_position_if_open(position.id, tag, None, now)
            .await?;
        if !closed {
            tracing::warn!(
                symbol = %position.symbol,
                id = %position.id,
                "position was closed concurrently; keeping first close"
            );
        } else {
            tracing::info!(
                symbol = %position.symbol,
                qty = fill.executed_qty,
                price = fill.avg_price,
                "📉 closed position"
            );
        }

        let exit = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            price: fill.avg_price,
            qty: fill.executed_qty,
            fees: fill.fees,
            created_at: now,
        };
        if let Err(e) = self.store.insert_trade(&exit).await {
            tracing::warn!(symbol = %position.symbol, "exit trade not recorded: {}", e);
        }

        Ok(exit)
    }

    /// Close every OPEN position for one symbol, most recently opened first.
    pub async fn close_symbol(&self, symbol: &str, tag: MethodTag) -> Result<Vec<Trade>> {
        let open = self.store.open_positions_for(symbol).await?;
        let mut exits = Vec::with_capacity(open.len());
        for position in &open {
            exits.push(self.close_position(position, tag).await?);
        }
        Ok(exits)
    }

    async fn close_one_settled(&self, position: &Position, tag: MethodTag) -> Result<()> {
        // Resting orders would hold balance hostage during the sweep
        if let Err(e) = self.exchange.cancel_open_orders(&position.symbol).await {
            tracing::warn!(symbol = %position.symbol, "order cancel failed, continuing: {}", e);
        }

        let filters = self.exchange.symbol_filters(&position.symbol).await?;
        let qty = normalize(&position.symbol, position.qty, &filters)?;
        let fill = self
            .submit_market(&position.symbol, position.side.opposite(), qty)
            .await?;

        tokio::time::sleep(self.settle_wait).await;

        let base = base_asset(&position.symbol, &self.quote_asset);
        let residual = self
            .exchange
            .account()
            .await?
            .iter()
            .find(|b| b.asset == base)
            .map(|b| b.total())
            .unwrap_or(0.0);
        if residual >= RESIDUAL_EPSILON {
            return Err(BotError::InconsistentState(format!(
                "residual {residual} {base} after close order"
            )));
        }

        let now = Utc::now();
        self.store
            .close_position_if_open(position.id, tag, None, now)
            .await?;

        let exit = Trade {
            id: Uuid::new_v4(),
            position_id: position.id,
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            price: fill.avg_price,
            qty: fill.executed_qty,
            fees: fill.fees,
            created_at: now,
        };
        if let Err(e) = self.store.insert_trade(&exit).await {
            tracing::warn!(symbol = %position.symbol, "exit trade not recorded: {}", e);
        }
        Ok(())
    }

    /// Close every OPEN position, accumulating per-position outcomes.
    ///
    /// A close is accepted only once the base-asset balance has settled below
    /// `RESIDUAL_EPSILON`; otherwise the position stays OPEN and lands in
    /// `skipped`. One failing symbol never stops the sweep.
    pub async fn close_all(&self, tag: MethodTag) -> Result<CloseAllReport> {
        let open = self.store.open_positions().await?;
        let mut report = CloseAllReport::default();

        for position in &open {
            match self.close_one_settled(position, tag).await {
                Ok(()) => {
                    report.closed.push(position.symbol.clone());
                    report.count += 1;
                }
                Err(e) => {
                    tracing::warn!(symbol = %position.symbol, "close skipped: {}", e);
                    report.skipped.push((position.symbol.clone(), e.safe_message()));
                }
            }
        }

        tracing::info!(
            closed = report.count,
            skipped = report.skipped.len(),
            "close-all sweep finished"
        );
        Ok(report)
    }
}
