//! Signal decisions: per-method strategy evaluation behind a cooldown gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::indicators::IndicatorSet;
use crate::models::{DecisionLog, Method, Signal, StrategyParams, TradingConfig};
use crate::store::Store;

/// Per-symbol cooldown gate.
///
/// Holds its own clock state instead of a shared global map; the decision
/// engine owns one instance. The window only advances when an evaluation is
/// let through (`record`), so suppressed evaluations never extend it.
#[derive(Debug)]
pub struct TimeGate {
    window: Duration,
    last_pass: HashMap<String, DateTime<Utc>>,
}

impl TimeGate {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            last_pass: HashMap::new(),
        }
    }

    /// Whether a trigger for `symbol` is currently allowed
    pub fn check(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        match self.last_pass.get(symbol) {
            Some(last) => now - *last >= self.window,
            None => true,
        }
    }

    /// Mark a successful evaluation at `now`
    pub fn record(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.last_pass.insert(symbol.to_string(), now);
    }
}

/// External predictive-model capability for the AI method
#[async_trait]
pub trait AiSignaler: Send + Sync {
    async fn signal(&self, symbol: &str, indicators: &IndicatorSet) -> Result<Signal>;
}

/// Fallback signaler used when no model endpoint is configured: AI-configured
/// symbols simply hold.
pub struct NoAiSignaler;

#[async_trait]
impl AiSignaler for NoAiSignaler {
    async fn signal(&self, symbol: &str, _indicators: &IndicatorSet) -> Result<Signal> {
        tracing::warn!("AI method configured for {} but no signaler is set up", symbol);
        Ok(Signal::Hold)
    }
}

fn rsi_signal(indicators: &IndicatorSet, params: &StrategyParams) -> Signal {
    let Some(rsi) = indicators.rsi else {
        return Signal::Hold;
    };
    if rsi > params.rsi_overbought {
        Signal::Sell
    } else if rsi < params.rsi_oversold {
        Signal::Buy
    } else {
        Signal::Hold
    }
}

fn ema_signal(indicators: &IndicatorSet) -> Signal {
    match (indicators.ema_short, indicators.ema_long) {
        (Some(short), Some(long)) if short > long => Signal::Buy,
        (Some(short), Some(long)) if short < long => Signal::Sell,
        _ => Signal::Hold,
    }
}

fn macd_signal(indicators: &IndicatorSet) -> Signal {
    match (indicators.macd, indicators.macd_signal) {
        (Some(macd), Some(sig)) if macd > sig => Signal::Buy,
        (Some(macd), Some(sig)) if macd < sig => Signal::Sell,
        _ => Signal::Hold,
    }
}

/// Map indicators to a signal for one of the technical methods.
///
/// Pure: no clock, no store, no exchange. `Method::Ai` is resolved by the
/// engine through its signaler capability and holds here.
pub fn decide(method: Method, indicators: &IndicatorSet, params: &StrategyParams) -> Signal {
    match method {
        Method::Rsi => rsi_signal(indicators, params),
        Method::Ema => ema_signal(indicators),
        Method::Macd => macd_signal(indicators),
        Method::Ai => Signal::Hold,
    }
}

/// Decision engine: method dispatch + cooldown gate + audit logging.
pub struct DecisionEngine {
    gate: Mutex<TimeGate>,
    ai: Arc<dyn AiSignaler>,
    store: Arc<dyn Store>,
}

impl DecisionEngine {
    pub fn new(ai: Arc<dyn AiSignaler>, store: Arc<dyn Store>, cooldown_secs: u64) -> Self {
        Self {
            gate: Mutex::new(TimeGate::new(cooldown_secs)),
            ai,
            store,
        }
    }

    /// Evaluate one symbol's configured strategy.
    ///
    /// Returns `None` when suppressed by the cooldown gate. The gate advances
    /// only when the evaluation actually ran, and every evaluated decision
    /// (including HOLD) is appended to the decision log.
    pub async fn evaluate(
        &self,
        cfg: &TradingConfig,
        indicators: &IndicatorSet,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>> {
        {
            let gate = self.gate.lock().unwrap();
            if !gate.check(&cfg.symbol, now) {
                tracing::debug!(symbol = %cfg.symbol, "cooldown active, skipping evaluation");
                return Ok(None);
            }
        }

        let signal = match cfg.method {
            Method::Ai => self.ai.signal(&cfg.symbol, indicators).await?,
            method => decide(method, indicators, &cfg.params),
        };

        self.gate.lock().unwrap().record(&cfg.symbol, now);

        let log = DecisionLog {
            id: Uuid::new_v4(),
            symbol: cfg.symbol.clone(),
            method: cfg.method,
            signal,
            price,
            params: serde_json::to_value(&cfg.params)?,
            created_at: now,
        };
        if let Err(e) = self.store.insert_decision(&log).await {
            // The audit trail must not block trading
            tracing::warn!(symbol = %cfg.symbol, "failed to record decision: {}", e);
        }

        Ok(Some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn set(rsi: Option<f64>) -> IndicatorSet {
        IndicatorSet {
            rsi,
            ..Default::default()
        }
    }

    #[test]
    fn test_rsi_overbought_sells() {
        let params = StrategyParams::default(); // overbought 70
        assert_eq!(decide(Method::Rsi, &set(Some(75.0)), &params), Signal::Sell);
    }

    #[test]
    fn test_rsi_custom_threshold_holds() {
        let params = StrategyParams {
            rsi_overbought: 80.0,
            ..Default::default()
        };
        assert_eq!(decide(Method::Rsi, &set(Some(75.0)), &params), Signal::Hold);
    }

    #[test]
    fn test_rsi_oversold_buys() {
        let params = StrategyParams::default();
        assert_eq!(decide(Method::Rsi, &set(Some(25.0)), &params), Signal::Buy);
    }

    #[test]
    fn test_missing_indicator_holds() {
        let params = StrategyParams::default();
        assert_eq!(decide(Method::Rsi, &set(None), &params), Signal::Hold);
        assert_eq!(decide(Method::Ema, &IndicatorSet::default(), &params), Signal::Hold);
        assert_eq!(decide(Method::Macd, &IndicatorSet::default(), &params), Signal::Hold);
    }

    #[test]
    fn test_ema_crossover() {
        let params = StrategyParams::default();
        let ind = IndicatorSet {
            ema_short: Some(101.0),
            ema_long: Some(100.0),
            ..Default::default()
        };
        assert_eq!(decide(Method::Ema, &ind, &params), Signal::Buy);

        let ind = IndicatorSet {
            ema_short: Some(99.0),
            ema_long: Some(100.0),
            ..Default::default()
        };
        assert_eq!(decide(Method::Ema, &ind, &params), Signal::Sell);
    }

    #[test]
    fn test_macd_crossover() {
        let params = StrategyParams::default();
        let ind = IndicatorSet {
            macd: Some(0.5),
            macd_signal: Some(0.2),
            ..Default::default()
        };
        assert_eq!(decide(Method::Macd, &ind, &params), Signal::Buy);

        let ind = IndicatorSet {
            macd: Some(-0.1),
            macd_signal: Some(0.2),
            ..Default::default()
        };
        assert_eq!(decide(Method::Macd, &ind, &params), Signal::Sell);
    }

    #[test]
    fn test_time_gate_window() {
        let mut gate = TimeGate::new(120);
        let t0 = Utc::now();

        assert!(gate.check("BTCUSDT", t0));
        gate.record("BTCUSDT", t0);

        // Inside the window: suppressed
        assert!(!gate.check("BTCUSDT", t0 + Duration::seconds(60)));
        // Other symbols unaffected
        assert!(gate.check("ETHUSDT", t0 + Duration::seconds(60)));
        // Window elapsed
        assert!(gate.check("BTCUSDT", t0 + Duration::seconds(120)));
    }

    #[test]
    fn test_time_gate_check_does_not_advance() {
        let gate = TimeGate::new(120);
        let t0 = Utc::now();
        assert!(gate.check("BTCUSDT", t0));
        // check() alone never records
        assert!(gate.check("BTCUSDT", t0 + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_engine_cooldown_suppresses_and_logs() {
        let store = Arc::new(MemoryStore::new());
        let engine = DecisionEngine::new(Arc::new(NoAiSignaler), store.clone(), 120);

        let cfg = TradingConfig {
            symbol: "BTCUSDT".to_string(),
            method: Method::Rsi,
            params: StrategyParams::default(),
        };
        let ind = set(Some(75.0));
        let t0 = Utc::now();

        let first = engine.evaluate(&cfg, &ind, 30000.0, t0).await.unwrap();
        assert_eq!(first, Some(Signal::Sell));

        // Second evaluation within the window is suppressed, not HOLD
        let second = engine
            .evaluate(&cfg, &ind, 30000.0, t0 + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(second, None);

        // Only the evaluated decision was logged
        let logs = store.recent_decisions(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].signal, Signal::Sell);
        assert_eq!(logs[0].method, Method::Rsi);
    }

    #[tokio::test]
    async fn test_engine_ai_method_uses_signaler() {
        struct AlwaysBuy;
        #[async_trait]
        impl AiSignaler for AlwaysBuy {
            async fn signal(&self, _: &str, _: &IndicatorSet) -> Result<Signal> {
                Ok(Signal::Buy)
            }
        }

        let store = Arc::new(MemoryStore::new());
        let engine = DecisionEngine::new(Arc::new(AlwaysBuy), store, 120);
        let cfg = TradingConfig {
            symbol: "ETHUSDT".to_string(),
            method: Method::Ai,
            params: StrategyParams::default(),
        };

        let signal = engine
            .evaluate(&cfg, &IndicatorSet::default(), 2000.0, Utc::now())
            .await
            .unwrap();
        assert_eq!(signal, Some(Signal::Buy));
    }
}
