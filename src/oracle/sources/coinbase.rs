//! Coinbase Exchange REST client
//!
//! Product ticker endpoint; the trade time is an RFC 3339 string.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::sources::{http_client, parse_price, QuoteSource};
use crate::types::{RawQuote, TradingPair};

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com/products";

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseTicker {
    price: String,
    time: String,
}

#[derive(Debug, Clone)]
pub struct CoinbaseClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: COINBASE_REST_URL.to_string(),
        })
    }

    /// Coinbase product id (e.g. "NEO-USDT")
    fn product_id(pair: &TradingPair) -> String {
        format!("{}-{}", pair.base, pair.quote)
    }

    fn parse_ticker(body: &str) -> Result<RawQuote> {
        let ticker: CoinbaseTicker =
            serde_json::from_str(body).context("Failed to parse Coinbase ticker response")?;
        let price = parse_price(&ticker.price)?;
        let timestamp = DateTime::parse_from_rfc3339(&ticker.time)
            .with_context(|| format!("invalid Coinbase time {:?}", ticker.time))?
            .timestamp_millis();
        Ok(RawQuote { price, timestamp })
    }
}

#[async_trait]
impl QuoteSource for CoinbaseClient {
    fn name(&self) -> &str {
        "Coinbase"
    }

    async fn fetch_quote(&self, pair: &TradingPair, _credential: Option<&str>) -> Result<RawQuote> {
        let url = format!("{}/{}/ticker", self.base_url, Self::product_id(pair));

        let response = self
            .http
            .get(&url)
            .header("User-Agent", "pricefeed")
            .send()
            .await
            .context("Failed to fetch ticker from Coinbase")?;
        if !response.status().is_success() {
            bail!("Coinbase API returned error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Coinbase response")?;
        Self::parse_ticker(&body)
    }
}
