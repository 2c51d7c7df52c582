//! Environment-driven configuration.

use std::str::FromStr;

use crate::error::{BotError, Result};

#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Symbols the trading loop evaluates
    pub symbols: Vec<String>,
    pub quote_asset: String,
    /// Quote-asset amount spent per automatic entry
    pub quote_per_order: f64,
    pub refresh_secs: u64,
    pub cooldown_secs: u64,
    pub reconcile_secs: u64,
    pub snapshot_secs: u64,
    pub kline_interval: String,
    pub kline_limit: u32,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| BotError::Configuration(format!("invalid {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_symbols(raw: &str) -> Result<Vec<String>> {
    let symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(BotError::Configuration(
            "SYMBOLS must name at least one trading pair".to_string(),
        ));
    }
    Ok(symbols)
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        let raw_symbols = std::env::var("SYMBOLS")
            .map_err(|_| BotError::Configuration("SYMBOLS not set".to_string()))?;

        Ok(Self {
            symbols: parse_symbols(&raw_symbols)?,
            quote_asset: std::env::var("QUOTE_ASSET").unwrap_or_else(|_| "USDT".to_string()),
            quote_per_order: env_parse("QUOTE_PER_ORDER", 50.0)?,
            refresh_secs: env_parse("REFRESH_INTERVAL_SECS", 15)?,
            cooldown_secs: env_parse("COOLDOWN_SECS", 120)?,
            reconcile_secs: env_parse("RECONCILE_INTERVAL_SECS", 3600)?,
            snapshot_secs: env_parse("SNAPSHOT_INTERVAL_SECS", 300)?,
            kline_interval: std::env::var("KLINE_INTERVAL").unwrap_or_else(|_| "1m".to_string()),
            kline_limit: env_parse("KLINE_LIMIT", 100)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols_splits_and_uppercases() {
        let symbols = parse_symbols("btcusdt, ethusdt ,SOLUSDT").unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_parse_symbols_rejects_empty() {
        assert!(matches!(
            parse_symbols(" , ").unwrap_err(),
            BotError::Configuration(_)
        ));
    }
}
