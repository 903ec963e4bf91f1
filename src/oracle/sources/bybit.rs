//! Bybit REST client for spot quotes
//!
//! V5 market tickers endpoint. Errors are reported in-band through `retCode`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::sources::{http_client, parse_price, QuoteSource};
use crate::types::{RawQuote, TradingPair};

const BYBIT_REST_URL: &str = "https://api.bybit.com/v5/market/tickers";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitResponse {
    ret_code: i64,
    ret_msg: String,
    result: Option<BybitResult>,
    time: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct BybitResult {
    #[serde(default)]
    list: Vec<BybitTicker>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTicker {
    symbol: String,
    last_price: String,
}

#[derive(Debug, Clone)]
pub struct BybitClient {
    http: reqwest::Client,
    base_url: String,
}

impl BybitClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: BYBIT_REST_URL.to_string(),
        })
    }

    fn parse_tickers(body: &str, symbol: &str) -> Result<RawQuote> {
        let response: BybitResponse =
            serde_json::from_str(body).context("Failed to parse Bybit tickers response")?;
        if response.ret_code != 0 {
            bail!("Bybit error {}: {}", response.ret_code, response.ret_msg);
        }

        let ticker = response
            .result
            .and_then(|r| r.list.into_iter().find(|t| t.symbol == symbol))
            .with_context(|| format!("Bybit returned no ticker for {}", symbol))?;

        Ok(RawQuote {
            price: parse_price(&ticker.last_price)?,
            timestamp: response.time,
        })
    }
}

#[async_trait]
impl QuoteSource for BybitClient {
    fn name(&self) -> &str {
        "Bybit"
    }

    async fn fetch_quote(&self, pair: &TradingPair, credential: Option<&str>) -> Result<RawQuote> {
        let symbol = pair.joined();
        let mut request = self
            .http
            .get(&self.base_url)
            .query(&[("category", "spot"), ("symbol", symbol.as_str())]);
        if let Some(key) = credential {
            request = request.header("X-BAPI-API-KEY", key);
        }

        let response = request
            .send()
            .await
            .context("Failed to fetch tickers from Bybit")?;
        if !response.status().is_success() {
            bail!("Bybit API returned error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Bybit response")?;
        Self::parse_tickers(&body, &symbol)
    }
}
