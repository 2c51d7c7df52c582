use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use spotbot::config::BotConfig;
use spotbot::decision::{AiSignaler, DecisionEngine, NoAiSignaler};
use spotbot::equity::EquityEngine;
use spotbot::exchange::{BinanceClient, Exchange};
use spotbot::execution::Lifecycle;
use spotbot::indicators::IndicatorSet;
use spotbot::models::{MethodTag, Signal, TradingConfig};
use spotbot::reconcile::Reconciler;
use spotbot::store::{MemoryStore, PgStore, Store};
use spotbot::{BotError, Result};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    tracing::info!("🚀 SpotBot starting - Multi-Loop Architecture");

    let config = BotConfig::from_env()?;
    let exchange: Arc<dyn Exchange> = Arc::new(BinanceClient::from_env()?);
    let store = connect_store().await;

    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbols: {}", config.symbols.join(", "));
    tracing::info!("  Quote per order: {} {}", config.quote_per_order, config.quote_asset);
    tracing::info!("  Refresh: {}s, cooldown: {}s", config.refresh_secs, config.cooldown_secs);

    let ai = create_ai_signaler();
    let engine = Arc::new(DecisionEngine::new(ai, store.clone(), config.cooldown_secs));
    let lifecycle = Arc::new(Lifecycle::new(
        exchange.clone(),
        store.clone(),
        &config.quote_asset,
    ));
    let reconciler = Reconciler::new(exchange.clone(), store.clone(), &config.quote_asset);
    let equity = EquityEngine::new(exchange.clone(), store.clone(), &config.quote_asset);

    tracing::info!("🔄 Spawning independent loops...");

    let trading_task = {
        let config = config.clone();
        let exchange = exchange.clone();
        let store = store.clone();
        tokio::spawn(async move {
            trading_loop(config, exchange, store, engine, lifecycle).await;
        })
    };

    let reconcile_task = {
        let interval_secs = config.reconcile_secs;
        tokio::spawn(async move {
            reconcile_loop(reconciler, interval_secs).await;
        })
    };

    let equity_task = {
        let interval_secs = config.snapshot_secs;
        tokio::spawn(async move {
            equity_loop(equity, interval_secs).await;
        })
    };

    tracing::info!("✅ All loops spawned. Press Ctrl+C to stop...");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = trading_task => {
            tracing::error!("Trading loop exited: {:?}", result);
        }
        result = reconcile_task => {
            tracing::error!("Reconcile loop exited: {:?}", result);
        }
        result = equity_task => {
            tracing::error!("Equity loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 SpotBot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotbot=info".into()),
        )
        .init();
}

async fn connect_store() -> Arc<dyn Store> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        tracing::warn!("DATABASE_URL not set, state will not survive restarts");
        return Arc::new(MemoryStore::new());
    };
    match PgStore::new(&database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("Failed to connect to Postgres ({}), continuing in-memory", e);
            Arc::new(MemoryStore::new())
        }
    }
}

fn create_ai_signaler() -> Arc<dyn AiSignaler> {
    match std::env::var("AI_SIGNAL_URL") {
        Ok(url) => {
            tracing::info!("🤖 AI signaler enabled at {}", url);
            Arc::new(HttpAiSignaler::new(&url))
        }
        Err(_) => Arc::new(NoAiSignaler),
    }
}

/// Delegates the AI method to an external prediction service
struct HttpAiSignaler {
    http: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct AiResponse {
    signal: String,
}

impl HttpAiSignaler {
    fn new(url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl AiSignaler for HttpAiSignaler {
    async fn signal(&self, symbol: &str, indicators: &IndicatorSet) -> Result<Signal> {
        let body = serde_json::json!({
            "symbol": symbol,
            "ema_short": indicators.ema_short,
            "ema_long": indicators.ema_long,
            "rsi": indicators.rsi,
            "macd": indicators.macd,
            "macd_signal": indicators.macd_signal,
        });
        let resp = self.http.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(BotError::Transient(format!(
                "AI signaler returned {}",
                resp.status()
            )));
        }
        let parsed: AiResponse = resp.json().await?;
        match parsed.signal.as_str() {
            "BUY" => Ok(Signal::Buy),
            "SELL" => Ok(Signal::Sell),
            "HOLD" => Ok(Signal::Hold),
            other => Err(BotError::Transient(format!(
                "AI signaler sent unknown signal: {other}"
            ))),
        }
    }
}

async fn trading_loop(
    config: BotConfig,
    exchange: Arc<dyn Exchange>,
    store: Arc<dyn Store>,
    engine: Arc<DecisionEngine>,
    lifecycle: Arc<Lifecycle>,
) {
    tracing::info!("💹 Trading loop starting...");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(config.refresh_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let configs: HashMap<String, TradingConfig> = match store.trading_configs().await {
            Ok(list) => list.into_iter().map(|c| (c.symbol.clone(), c)).collect(),
            Err(e) => {
                tracing::error!("failed to load trading configs: {}", e);
                continue;
            }
        };

        for symbol in &config.symbols {
            let Some(symbol_cfg) = configs.get(symbol) else {
                tracing::debug!(symbol, "no trading config, skipping");
                continue;
            };
            if let Err(e) = evaluate_symbol(&config, symbol_cfg, &exchange, &engine, &lifecycle, &store).await {
                tracing::error!(symbol, "evaluation pass failed: {}", e);
            }
        }
    }
}

async fn evaluate_symbol(
    config: &BotConfig,
    symbol_cfg: &TradingConfig,
    exchange: &Arc<dyn Exchange>,
    engine: &Arc<DecisionEngine>,
    lifecycle: &Arc<Lifecycle>,
    store: &Arc<dyn Store>,
) -> Result<()> {
    let symbol = &symbol_cfg.symbol;
    let klines = exchange
        .klines(symbol, &config.kline_interval, config.kline_limit)
        .await?;
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let Some(price) = closes.last().copied() else {
        tracing::debug!(symbol, "no candle history yet");
        return Ok(());
    };

    let indicators = IndicatorSet::compute(&closes, &symbol_cfg.params);
    let Some(signal) = engine.evaluate(symbol_cfg, &indicators, price, Utc::now()).await? else {
        return Ok(());
    };

    match signal {
        Signal::Buy => {
            let position = lifecycle
                .open_market_quote(symbol, config.quote_per_order, MethodTag::Auto)
                .await?;
            tracing::info!(symbol, qty = position.qty, "BUY signal executed");
        }
        Signal::Sell => {
            // Most recently opened position goes first
            let open = store.open_positions_for(symbol).await?;
            match open.first() {
                Some(position) => {
                    lifecycle.close_position(position, MethodTag::Auto).await?;
                    tracing::info!(symbol, "SELL signal executed");
                }
                None => tracing::debug!(symbol, "SELL signal with nothing to close"),
            }
        }
        Signal::Hold => {}
    }
    Ok(())
}

async fn reconcile_loop(reconciler: Reconciler, interval_secs: u64) {
    tracing::info!("🔄 Reconcile loop starting...");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match reconciler.sync().await {
            Ok(corrected) => tracing::debug!(corrected, "sync pass complete"),
            Err(e) => tracing::error!("sync pass failed: {}", e),
        }
        match reconciler.clean().await {
            Ok(report) => tracing::debug!(dropped = report.count, "clean pass complete"),
            Err(e) => tracing::error!("clean pass failed: {}", e),
        }
    }
}

async fn equity_loop(equity: EquityEngine, interval_secs: u64) {
    tracing::info!("💰 Equity loop starting...");
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if let Err(e) = equity.snapshot().await {
            tracing::error!("equity snapshot failed: {}", e);
        }
    }
}
