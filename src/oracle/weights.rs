//! Weight Adjuster - dynamic per-source weights and the weighted consensus
//!
//! final weight = configured × outlier penalty × historical accuracy
//!              × freshness × (1 + filter confidence)

use crate::error::{OracleError, OracleResult};
use crate::oracle::accuracy::AccuracyTracker;
use crate::oracle::kalman::FilterBank;
use crate::oracle::stats::FilteredQuote;
use crate::types::{PriceStats, SourcePrice};

const OUTLIER_PENALTY: f64 = 0.5;

/// Linear decay from 1 (fresh) to 0 at `max_age_ms`
pub fn freshness_factor(timestamp: i64, now: i64, max_age_ms: i64) -> f64 {
    if max_age_ms <= 0 {
        return 0.0;
    }
    let age = (now - timestamp).max(0) as f64;
    (1.0 - age / max_age_ms as f64).max(0.0)
}

pub fn outlier_penalty(is_outlier: bool) -> f64 {
    if is_outlier {
        OUTLIER_PENALTY
    } else {
        1.0
    }
}

/// Result of weighting one cycle's quotes
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedConsensus {
    pub price: f64,
    /// Sources that contributed a positive weight
    pub sources: Vec<SourcePrice>,
}

pub struct WeightAdjuster<'a> {
    pub accuracy: &'a AccuracyTracker,
    pub filters: &'a FilterBank,
    pub max_age_ms: i64,
}

impl<'a> WeightAdjuster<'a> {
    pub fn source_weight(&self, quote: &FilteredQuote, is_outlier: bool, now: i64) -> f64 {
        let kalman_confidence = self.filters.kalman_confidence(&quote.source);
        quote.weight
            * outlier_penalty(is_outlier)
            * self.accuracy.historical_accuracy_factor(&quote.source)
            * freshness_factor(quote.timestamp, now, self.max_age_ms)
            * (1.0 + kalman_confidence)
    }

    /// Weighted average over non-outlier quotes
    pub fn consensus(
        &self,
        symbol: &str,
        quotes: &[FilteredQuote],
        stats: &PriceStats,
        now: i64,
    ) -> OracleResult<WeightedConsensus> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut sources = Vec::new();

        for quote in quotes {
            if !(quote.price.is_finite() && quote.price > 0.0) || stats.is_outlier(&quote.source) {
                continue;
            }
            let weight = self.source_weight(quote, false, now);
            if weight <= 0.0 {
                continue;
            }
            weighted_sum += quote.price * weight;
            total_weight += weight;
            sources.push(SourcePrice {
                name: quote.source.clone(),
                price: quote.price,
                weight,
                timestamp: quote.timestamp,
            });
        }

        if total_weight <= 0.0 {
            return Err(OracleError::NoValidPricesAfterAdjustment {
                symbol: symbol.to_string(),
            });
        }

        Ok(WeightedConsensus {
            price: weighted_sum / total_weight,
            sources,
        })
    }
}
