//! Huobi (HTX) REST client for spot quotes

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::oracle::sources::{http_client, QuoteSource};
use crate::types::{RawQuote, TradingPair};

const HUOBI_REST_URL: &str = "https://api.huobi.pro/market/detail/merged";

#[derive(Debug, Clone, Deserialize)]
struct HuobiResponse {
    status: String,
    #[serde(rename = "err-msg")]
    err_msg: Option<String>,
    ts: Option<i64>,
    tick: Option<HuobiTick>,
}

#[derive(Debug, Clone, Deserialize)]
struct HuobiTick {
    close: f64,
}

#[derive(Debug, Clone)]
pub struct HuobiClient {
    http: reqwest::Client,
    base_url: String,
}

impl HuobiClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: HUOBI_REST_URL.to_string(),
        })
    }

    fn parse_merged(body: &str) -> Result<RawQuote> {
        let response: HuobiResponse =
            serde_json::from_str(body).context("Failed to parse Huobi response")?;
        if response.status != "ok" {
            bail!(
                "Huobi error: {}",
                response.err_msg.unwrap_or_else(|| response.status.clone())
            );
        }
        match (response.tick, response.ts) {
            (Some(tick), Some(ts)) => Ok(RawQuote {
                price: tick.close,
                timestamp: ts,
            }),
            _ => bail!("Huobi response missing tick data"),
        }
    }
}

#[async_trait]
impl QuoteSource for HuobiClient {
    fn name(&self) -> &str {
        "Huobi"
    }

    async fn fetch_quote(&self, pair: &TradingPair, _credential: Option<&str>) -> Result<RawQuote> {
        let symbol = pair.joined().to_lowercase();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .context("Failed to fetch merged detail from Huobi")?;
        if !response.status().is_success() {
            bail!("Huobi API returned error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("Failed to read Huobi response")?;
        Self::parse_merged(&body)
    }
}
