//! Fetch Coordinator - collects one quote per configured source
//!
//! The preferred source (if any) is fetched first on its own; the rest are
//! fetched concurrently. Each request is bounded by the source's timeout,
//! and late results are dropped without holding up the cycle.

use futures_util::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::error::{OracleError, OracleResult};
use crate::oracle::sources::QuoteSource;
use crate::secrets::CredentialStore;
use crate::types::{DataSourceConfig, SourceQuote, TradingPair};

const RATE_WINDOW_MS: i64 = 60_000;

/// Outcome of one source for one cycle
pub type FetchOutcome = (String, OracleResult<SourceQuote>);

/// Sliding one-minute request budget per source
#[derive(Debug, Default)]
pub struct RateLimiter {
    requests: Mutex<HashMap<String, VecDeque<i64>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one request slot; `limit == 0` means unlimited
    pub fn try_acquire(&self, source: &str, limit: u32, now: i64) -> bool {
        if limit == 0 {
            return true;
        }
        let Ok(mut requests) = self.requests.lock() else {
            return true;
        };
        let window = requests.entry(source.to_string()).or_default();
        while window.front().is_some_and(|t| now - *t >= RATE_WINDOW_MS) {
            window.pop_front();
        }
        if window.len() >= limit as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}

/// Reject quotes no aggregation step can use
pub fn validate_quote(price: f64, timestamp: i64, now: i64, future_tolerance_ms: i64) -> Result<(), String> {
    if !price.is_finite() {
        return Err(format!("non-finite price {}", price));
    }
    if price <= 0.0 {
        return Err(format!("non-positive price {}", price));
    }
    if timestamp - now > future_tolerance_ms {
        return Err(format!("timestamp {}ms in the future", timestamp - now));
    }
    Ok(())
}

pub struct FetchCoordinator {
    sources: Vec<(DataSourceConfig, Arc<dyn QuoteSource>)>,
    credentials: Arc<dyn CredentialStore>,
    limiter: RateLimiter,
    future_tolerance_ms: i64,
}

impl FetchCoordinator {
    pub fn new(
        sources: Vec<(DataSourceConfig, Arc<dyn QuoteSource>)>,
        credentials: Arc<dyn CredentialStore>,
        future_tolerance_ms: i64,
    ) -> Self {
        Self {
            sources,
            credentials,
            limiter: RateLimiter::new(),
            future_tolerance_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// One outcome per configured source, preferred source first
    pub async fn fetch_all(
        &self,
        pair: &TradingPair,
        preferred: Option<&str>,
        now: i64,
    ) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(self.sources.len());

        let preferred = preferred.and_then(|name| {
            let found = self.sources.iter().find(|(c, _)| c.name == name);
            if found.is_none() {
                warn!(source = name, "Preferred source is not configured, ignoring");
            }
            found
        });
        if let Some((config, client)) = preferred {
            outcomes.push(self.fetch_one(config, client.as_ref(), pair, now).await);
        }

        let preferred_name = preferred.map(|(c, _)| c.name.as_str());
        let rest = self
            .sources
            .iter()
            .filter(|(c, _)| Some(c.name.as_str()) != preferred_name)
            .map(|(config, client)| self.fetch_one(config, client.as_ref(), pair, now));
        outcomes.extend(join_all(rest).await);

        outcomes
    }

    async fn fetch_one(
        &self,
        config: &DataSourceConfig,
        client: &dyn QuoteSource,
        pair: &TradingPair,
        now: i64,
    ) -> FetchOutcome {
        let name = config.name.clone();
        let result = self.fetch_validated(config, client, pair, now).await;
        if let Err(e) = &result {
            debug!(source = %name, symbol = %pair, error = %e, "Source fetch failed");
        }
        (name, result)
    }

    async fn fetch_validated(
        &self,
        config: &DataSourceConfig,
        client: &dyn QuoteSource,
        pair: &TradingPair,
        now: i64,
    ) -> OracleResult<SourceQuote> {
        if !self.limiter.try_acquire(&config.name, config.rate_limit, now) {
            return Err(OracleError::fetch_failed(&config.name, "rate limited"));
        }

        let credential = match &config.credential_ref {
            Some(reference) => Some(
                self.credentials
                    .get_credential(reference)
                    .await
                    .map_err(|e| {
                        OracleError::fetch_failed(&config.name, format!("credential: {:#}", e))
                    })?,
            ),
            None => None,
        };

        let quote = tokio::time::timeout(
            config.timeout(),
            client.fetch_quote(pair, credential.as_deref()),
        )
        .await
        .map_err(|_| {
            OracleError::fetch_failed(&config.name, format!("timed out after {}ms", config.timeout_ms))
        })?
        .map_err(|e| OracleError::fetch_failed(&config.name, format!("{:#}", e)))?;

        validate_quote(quote.price, quote.timestamp, now, self.future_tolerance_ms)
            .map_err(|reason| OracleError::fetch_failed(&config.name, reason))?;

        Ok(SourceQuote {
            source: config.clone(),
            price: quote.price,
            timestamp: quote.timestamp,
        })
    }
}
