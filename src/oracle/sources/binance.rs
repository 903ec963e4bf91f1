//! Binance REST client for spot quotes
//!
//! Uses the 24h rolling ticker, which carries both the last price and the
//! close time of the window.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::sources::{http_client, parse_price, QuoteSource};
use crate::types::{RawQuote, TradingPair};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3/ticker/24hr";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    symbol: String,
    last_price: String,
    close_time: i64,
}

#[derive(Debug, Clone)]
pub struct BinanceClient {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: BINANCE_REST_URL.to_string(),
        })
    }

    fn parse_ticker(body: &str) -> Result<RawQuote> {
        let ticker: BinanceTicker =
            serde_json::from_str(body).context("Failed to parse Binance ticker response")?;
        let price = parse_price(&ticker.last_price)?;
        tracing::trace!(symbol = %ticker.symbol, price, "Binance ticker");
        Ok(RawQuote {
            price,
            timestamp: ticker.close_time,
        })
    }
}

#[async_trait]
impl QuoteSource for BinanceClient {
    fn name(&self) -> &str {
        "Binance"
    }

    async fn fetch_quote(&self, pair: &TradingPair, credential: Option<&str>) -> Result<RawQuote> {
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[("symbol", pair.joined())]);
        if let Some(key) = credential {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request
            .send()
            .await
            .context("Failed to fetch ticker from Binance")?;
        if !response.status().is_success() {
            bail!("Binance API returned error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Binance response")?;
        Self::parse_ticker(&body)
    }
}
