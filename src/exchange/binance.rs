//! Binance spot REST client.
//!
//! Signed endpoints get a `timestamp` plus an HMAC-SHA256 signature over the
//! query string. Venue error payloads (`{"code": ..., "msg": ...}`) are mapped
//! to `Transient` for retryable codes and `ExchangeRejection` otherwise; the
//! raw message is logged here and never travels in the error Display.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{BotError, Result};
use crate::models::{Kline, Side, SymbolFilters};

use super::{AccountBalance, Exchange, OrderFill};

type HmacSha256 = Hmac<Sha256>;

/// Venue-side codes worth retrying: internal error, timestamp drift
const TRANSIENT_CODES: [i64; 2] = [-1001, -1021];

/// "no such order" on cancel, treated as already-cancelled
pub const CODE_UNKNOWN_ORDER: i64 = -2011;

pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    executed_qty: String,
    cummulative_quote_qty: String,
    #[serde(default)]
    fills: Vec<RawFill>,
}

#[derive(Debug, Deserialize)]
struct RawFill {
    commission: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFilter {
    filter_type: String,
    step_size: Option<String>,
    min_qty: Option<String>,
    min_notional: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

// klines come back as positional arrays:
// [openTime, open, high, low, close, volume, closeTime, quoteVolume, ...]
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    i64,
    String,
    String,
    String,
);

fn parse_f64(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| BotError::Transient(format!("malformed {field} in exchange payload: {raw}")))
}

fn map_api_error(status: StatusCode, body: &str) -> BotError {
    if status.is_server_error() {
        return BotError::Transient(format!("exchange returned {status}"));
    }
    match serde_json::from_str::<ApiError>(body) {
        Ok(api) if TRANSIENT_CODES.contains(&api.code) => {
            BotError::Transient(format!("exchange code {}: {}", api.code, api.msg))
        }
        Ok(api) => {
            tracing::warn!(code = api.code, reason = %api.msg, "exchange rejected request");
            BotError::ExchangeRejection {
                code: api.code,
                reason: api.msg,
            }
        }
        Err(_) => BotError::Transient(format!("exchange returned {status}: {body}")),
    }
}

impl BinanceClient {
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());
        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| BotError::Configuration("BINANCE_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| BotError::Configuration("BINANCE_API_SECRET not set".to_string()))?;
        Ok(Self::new(&base_url, &api_key, &api_secret))
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|_| BotError::Configuration("invalid API secret".to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Utc::now().timestamp_millis()));
        let signature = self.sign(&query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(map_api_error(status, &body))
    }

    async fn signed_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let query = self.signed_query(params)?;
        let resp = self
            .http
            .get(format!("{}{}?{}", self.base_url, path, query))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    async fn account(&self) -> Result<Vec<AccountBalance>> {
        let resp: AccountResponse = self.signed_get("/api/v3/account", &[]).await?;
        let mut balances = Vec::new();
        for raw in resp.balances {
            let free = parse_f64("free", &raw.free)?;
            let locked = parse_f64("locked", &raw.locked)?;
            if free > 0.0 || locked > 0.0 {
                balances.push(AccountBalance {
                    asset: raw.asset,
                    free,
                    locked,
                });
            }
        }
        Ok(balances)
    }

    async fn market_order(&self, symbol: &str, side: Side, qty: f64) -> Result<OrderFill> {
        let params = [
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", qty.to_string()),
        ];
        let query = self.signed_query(&params)?;
        let resp = self
            .http
            .post(format!("{}/api/v3/order?{}", self.base_url, query))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let order: OrderResponse = Self::decode(resp).await?;

        let executed_qty = parse_f64("executedQty", &order.executed_qty)?;
        let quote_qty = parse_f64("cummulativeQuoteQty", &order.cummulative_quote_qty)?;
        if executed_qty <= 0.0 {
            return Err(BotError::InconsistentState(format!(
                "market order on {symbol} reported zero executed quantity"
            )));
        }
        let mut fees = 0.0;
        for fill in &order.fills {
            fees += parse_f64("commission", &fill.commission)?;
        }

        Ok(OrderFill {
            order_id: order.order_id,
            executed_qty,
            avg_price: quote_qty / executed_qty,
            fees,
        })
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<()> {
        let params = [("symbol", symbol.to_string())];
        let query = self.signed_query(&params)?;
        let resp = self
            .http
            .delete(format!("{}/api/v3/openOrders?{}", self.base_url, query))
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        match Self::decode::<serde_json::Value>(resp).await {
            Ok(_) => Ok(()),
            // Nothing open to cancel
            Err(BotError::ExchangeRejection { code, .. }) if code == CODE_UNKNOWN_ORDER => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let resp = self
            .http
            .get(format!(
                "{}/api/v3/exchangeInfo?symbol={}",
                self.base_url, symbol
            ))
            .send()
            .await?;
        let info: ExchangeInfo = Self::decode(resp).await?;
        let sym = info.symbols.into_iter().next().ok_or_else(|| {
            BotError::Configuration(format!("exchangeInfo returned no entry for {symbol}"))
        })?;

        let mut step_size = None;
        let mut min_qty = None;
        let mut min_notional = None;
        for filter in sym.filters {
            match filter.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(raw) = filter.step_size {
                        step_size = Some(parse_f64("stepSize", &raw)?);
                    }
                    if let Some(raw) = filter.min_qty {
                        min_qty = Some(parse_f64("minQty", &raw)?);
                    }
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    if let Some(raw) = filter.min_notional {
                        min_notional = Some(parse_f64("minNotional", &raw)?);
                    }
                }
                _ => {}
            }
        }

        let step_size = step_size.ok_or_else(|| {
            BotError::Configuration(format!("no LOT_SIZE filter for {symbol}"))
        })?;
        Ok(SymbolFilters {
            step_size,
            min_qty: min_qty.unwrap_or(0.0),
            min_notional,
        })
    }

    async fn ticker_prices(&self) -> Result<HashMap<String, f64>> {
        let resp = self
            .http
            .get(format!("{}/api/v3/ticker/price", self.base_url))
            .send()
            .await?;
        let tickers: Vec<TickerPrice> = Self::decode(resp).await?;
        let mut prices = HashMap::with_capacity(tickers.len());
        for t in tickers {
            prices.insert(t.symbol, parse_f64("price", &t.price)?);
        }
        Ok(prices)
    }

    async fn price(&self, symbol: &str) -> Result<f64> {
        let resp = self
            .http
            .get(format!(
                "{}/api/v3/ticker/price?symbol={}",
                self.base_url, symbol
            ))
            .send()
            .await?;
        let ticker: TickerPrice = Self::decode(resp).await?;
        parse_f64("price", &ticker.price)
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let resp = self
            .http
            .get(format!(
                "{}/api/v3/klines?symbol={}&interval={}&limit={}",
                self.base_url, symbol, interval, limit
            ))
            .send()
            .await?;
        let raw: Vec<RawKline> = Self::decode(resp).await?;
        let mut klines = Vec::with_capacity(raw.len());
        for k in raw {
            let open_time = chrono::DateTime::from_timestamp_millis(k.0).ok_or_else(|| {
                BotError::Transient(format!("malformed kline open time: {}", k.0))
            })?;
            klines.push(Kline {
                open_time,
                open: parse_f64("open", &k.1)?,
                high: parse_f64("high", &k.2)?,
                low: parse_f64("low", &k.3)?,
                close: parse_f64("close", &k.4)?,
                volume: parse_f64("volume", &k.5)?,
            });
        }
        Ok(klines)
    }
}
