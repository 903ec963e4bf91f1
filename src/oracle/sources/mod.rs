//! Quote source implementations (Binance, Bybit, Coinbase, Huobi)

mod binance;
mod bybit;
mod coinbase;
mod huobi;

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use coinbase::CoinbaseClient;
pub use huobi::HuobiClient;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::types::{DataSourceConfig, RawQuote, SourceKind, TradingPair};

/// Trait for quote source clients
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Get the source name
    fn name(&self) -> &str;

    /// Fetch the latest price for a pair, authenticating with `credential` if given
    async fn fetch_quote(&self, pair: &TradingPair, credential: Option<&str>) -> Result<RawQuote>;
}

/// Build the client serving a configured source
pub fn build_source(config: &DataSourceConfig) -> Result<Arc<dyn QuoteSource>> {
    let timeout = config.timeout();
    let source: Arc<dyn QuoteSource> = match config.kind {
        SourceKind::Binance => Arc::new(BinanceClient::new(timeout)?),
        SourceKind::Coinbase => Arc::new(CoinbaseClient::new(timeout)?),
        SourceKind::Bybit => Arc::new(BybitClient::new(timeout)?),
        SourceKind::Huobi => Arc::new(HuobiClient::new(timeout)?),
    };
    Ok(source)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Exchanges quote prices as decimal strings
pub(crate) fn parse_price(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .with_context(|| format!("invalid price {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_source_by_kind() {
        let config = DataSourceConfig::new("primary", SourceKind::Huobi, 1.0);
        let source = build_source(&config).unwrap();
        assert_eq!(source.name(), "Huobi");

        let config = DataSourceConfig::new("backup", SourceKind::Coinbase, 1.0);
        assert_eq!(build_source(&config).unwrap().name(), "Coinbase");
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price(" 12.50 ").unwrap(), 12.5);
        assert!(parse_price("n/a").is_err());
    }
}
