use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side on the spot market
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<PositionStatus> {
        match s {
            "OPEN" => Some(PositionStatus::Open),
            "CLOSED" => Some(PositionStatus::Closed),
            _ => None,
        }
    }
}

/// How an open or close was initiated. `Sync` marks transitions forced by the
/// reconciliation engine rather than a real fill.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MethodTag {
    Auto,
    Manual,
    Sync,
}

impl MethodTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodTag::Auto => "AUTO",
            MethodTag::Manual => "MANUAL",
            MethodTag::Sync => "SYNC",
        }
    }

    pub fn parse(s: &str) -> Option<MethodTag> {
        match s {
            "AUTO" => Some(MethodTag::Auto),
            "MANUAL" => Some(MethodTag::Manual),
            "SYNC" => Some(MethodTag::Sync),
            _ => None,
        }
    }
}

/// Strategy selection for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Method {
    Rsi,
    Ema,
    Macd,
    Ai,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Rsi => "RSI",
            Method::Ema => "EMA",
            Method::Macd => "MACD",
            Method::Ai => "AI",
        }
    }

    pub fn parse(s: &str) -> Option<Method> {
        match s {
            "RSI" => Some(Method::Rsi),
            "EMA" => Some(Method::Ema),
            "MACD" => Some(Method::Macd),
            "AI" => Some(Method::Ai),
            _ => None,
        }
    }
}

/// Trading signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Buy => "BUY",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }
}

/// Local record of inventory believed to be held on the exchange.
///
/// Transitions are monotonic: OPEN -> CLOSED, never back. Rows are never
/// deleted. More than one OPEN position per symbol is tolerated; close paths
/// resolve the most recently opened one first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub open_method: MethodTag,
    pub close_method: Option<MethodTag>,
}

impl Position {
    /// New OPEN position from a confirmed fill
    pub fn open(
        symbol: String,
        side: Side,
        qty: f64,
        entry_price: f64,
        open_method: MethodTag,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            qty,
            entry_price,
            stop_loss: None,
            take_profit: None,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
            open_method,
            close_method: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// Immutable fill record. Append-only; the first and last trade of a position
/// give its realized entry and exit prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub position_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub fees: f64,
    pub created_at: DateTime<Utc>,
}

/// Strategy parameters, persisted as JSON alongside the method selection.
/// Missing fields fall back to the conventional defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyParams {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    #[serde(default = "default_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_ema_short")]
    pub ema_short_period: usize,
    #[serde(default = "default_ema_long")]
    pub ema_long_period: usize,
    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,
    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,
    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,
}

fn default_rsi_period() -> usize {
    14
}
fn default_rsi_overbought() -> f64 {
    70.0
}
fn default_rsi_oversold() -> f64 {
    30.0
}
fn default_ema_short() -> usize {
    12
}
fn default_ema_long() -> usize {
    26
}
fn default_macd_fast() -> usize {
    12
}
fn default_macd_slow() -> usize {
    26
}
fn default_macd_signal() -> usize {
    9
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            rsi_overbought: default_rsi_overbought(),
            rsi_oversold: default_rsi_oversold(),
            ema_short_period: default_ema_short(),
            ema_long_period: default_ema_long(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
        }
    }
}

/// Per-symbol strategy configuration, written by an external surface and read
/// by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbol: String,
    pub method: Method,
    #[serde(default)]
    pub params: StrategyParams,
}

/// Point-in-time account valuation, written only by the equity aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub ts: DateTime<Utc>,
    pub free_quote: f64,
    pub invested_quote: f64,
    pub equity: f64,
}

/// Audit record for every decision the engine evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLog {
    pub id: Uuid,
    pub symbol: String,
    pub method: Method,
    pub signal: Signal,
    pub price: f64,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Per-symbol order filters from exchangeInfo (LOT_SIZE / NOTIONAL).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SymbolFilters {
    pub step_size: f64,
    pub min_qty: f64,
    pub min_notional: Option<f64>,
}

/// One candlestick from the price feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Base asset of a quote-suffixed pair ("BTCUSDT" -> "BTC").
pub fn base_asset<'a>(symbol: &'a str, quote_asset: &str) -> &'a str {
    symbol.strip_suffix(quote_asset).unwrap_or(symbol)
}
