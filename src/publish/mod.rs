//! On-chain publication
//!
//! `PublishScheduler` decides whether a cycle's consensus is submitted:
//! at most once per update interval per symbol, and only at or above the
//! minimum confidence. The chain client itself sits behind `ChainPublisher`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::OracleError;
use crate::metrics::{names, MetricsSink};
use crate::types::AggregationResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PublishMetadata {
    pub confidence: f64,
    pub source_count: usize,
    pub timestamp: i64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainPublisher: Send + Sync {
    async fn publish_price(&self, symbol: &str, price: f64, metadata: PublishMetadata) -> Result<()>;
}

/// Logs the submission it would have made
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunPublisher;

#[async_trait]
impl ChainPublisher for DryRunPublisher {
    async fn publish_price(&self, symbol: &str, price: f64, metadata: PublishMetadata) -> Result<()> {
        info!(
            symbol,
            price,
            confidence = metadata.confidence,
            sources = metadata.source_count,
            timestamp = metadata.timestamp,
            "📝 [DRY RUN] Would publish price on-chain"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published,
    SkippedInterval { remaining_ms: i64 },
    SkippedConfidence { confidence: f64 },
    Failed(OracleError),
}

pub struct PublishScheduler {
    interval_ms: i64,
    min_confidence: f64,
    last_publish: Mutex<HashMap<String, i64>>,
    publisher: Arc<dyn ChainPublisher>,
}

impl PublishScheduler {
    pub fn new(interval: Duration, min_confidence: f64, publisher: Arc<dyn ChainPublisher>) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            min_confidence,
            last_publish: Mutex::new(HashMap::new()),
            publisher,
        }
    }

    pub fn last_publish(&self, symbol: &str) -> Option<i64> {
        self.last_publish.lock().ok()?.get(symbol).copied()
    }

    fn due_in(&self, symbol: &str, now: i64) -> i64 {
        match self.last_publish(symbol) {
            Some(last) => (last + self.interval_ms - now).max(0),
            None => 0,
        }
    }

    /// Submit `result` if the interval has elapsed and confidence suffices.
    ///
    /// A failed submission leaves the last-publish time untouched so the
    /// next cycle retries.
    pub async fn maybe_publish(
        &self,
        result: &AggregationResult,
        now: i64,
        metrics: &dyn MetricsSink,
    ) -> PublishOutcome {
        let symbol = result.symbol.as_str();

        let remaining_ms = self.due_in(symbol, now);
        if remaining_ms > 0 {
            debug!(symbol, remaining_ms, "Publish interval not elapsed");
            metrics.counter(names::PUBLISH_SKIPPED, symbol, None);
            return PublishOutcome::SkippedInterval { remaining_ms };
        }
        if result.confidence < self.min_confidence {
            debug!(
                symbol,
                confidence = result.confidence,
                required = self.min_confidence,
                "Confidence below publish threshold"
            );
            metrics.counter(names::PUBLISH_SKIPPED, symbol, None);
            return PublishOutcome::SkippedConfidence {
                confidence: result.confidence,
            };
        }

        let metadata = PublishMetadata {
            confidence: result.confidence,
            source_count: result.source_count(),
            timestamp: result.details.last_update,
        };
        match self
            .publisher
            .publish_price(symbol, result.price, metadata)
            .await
        {
            Ok(()) => {
                if let Ok(mut last) = self.last_publish.lock() {
                    last.insert(symbol.to_string(), now);
                }
                metrics.counter(names::PUBLISH_SUCCESS, symbol, None);
                info!(symbol, price = result.price, confidence = result.confidence, "📤 Published price");
                PublishOutcome::Published
            }
            Err(e) => {
                metrics.counter(names::PUBLISH_FAILURE, symbol, None);
                warn!(symbol, error = %e, "⚠️ Publish failed, will retry next cycle");
                PublishOutcome::Failed(OracleError::PublishFailed {
                    symbol: symbol.to_string(),
                    reason: format!("{:#}", e),
                })
            }
        }
    }
}
