//! Statistical Aggregator - per-cycle mean/median/stddev and outliers

use crate::error::{OracleError, OracleResult};
use crate::types::{Outlier, PriceStats};

/// Consistency constant turning a MAD into a normal-equivalent stddev
const MAD_SCALE: f64 = 1.4826;

/// How far from the centre a quote may sit before it is an outlier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierRule {
    /// Allowed distance in standard deviations
    pub threshold: f64,
    /// Lower bound of the median-based scale, relative to the median
    pub scale_floor: f64,
}

impl OutlierRule {
    /// The z-score of one point among `n` is at most `sqrt(n - 1)`, so below
    /// `threshold^2 + 1` quotes the z-test alone can never fire.
    pub fn z_test_can_fire(&self, n: usize) -> bool {
        (n.saturating_sub(1) as f64) > self.threshold * self.threshold
    }
}

/// A quote after it went through the source's filter
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredQuote {
    pub source: String,
    /// Configured (normalised) weight of the source
    pub weight: f64,
    pub raw_price: f64,
    /// Filter estimate used downstream
    pub price: f64,
    pub timestamp: i64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Average of the two middle values for even counts
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Compute the cycle statistics, failing when too few valid quotes arrived.
///
/// A quote is an outlier when `|p - mean| > threshold * stdDev`. With too
/// few quotes for that test to ever fire, a median/MAD score with the same
/// threshold is used as well.
pub fn compute_stats(
    symbol: &str,
    quotes: &[FilteredQuote],
    min_sources: usize,
    rule: OutlierRule,
    volatility: f64,
) -> OracleResult<PriceStats> {
    let valid: Vec<&FilteredQuote> = quotes
        .iter()
        .filter(|q| q.price.is_finite() && q.price > 0.0)
        .collect();

    if valid.len() < min_sources || valid.is_empty() {
        return Err(OracleError::InsufficientSources {
            symbol: symbol.to_string(),
            available: valid.len(),
            required: min_sources,
        });
    }

    let prices: Vec<f64> = valid.iter().map(|q| q.price).collect();
    let mean = mean(&prices);
    let median = median(&prices);
    let std_dev = std_dev(&prices, mean);

    let robust_scale = if rule.z_test_can_fire(prices.len()) {
        None
    } else {
        let abs_devs: Vec<f64> = prices.iter().map(|p| (p - median).abs()).collect();
        Some((MAD_SCALE * self::median(&abs_devs)).max(median.abs() * rule.scale_floor))
    };

    let outliers = valid
        .iter()
        .filter(|q| {
            let z_outlier = std_dev > 0.0 && (q.price - mean).abs() > rule.threshold * std_dev;
            let robust_outlier = robust_scale.is_some_and(|scale| {
                scale > 0.0 && (q.price - median).abs() > rule.threshold * scale
            });
            z_outlier || robust_outlier
        })
        .map(|q| Outlier {
            source: q.source.clone(),
            price: q.price,
            deviation: (q.price - mean).abs(),
        })
        .collect();

    Ok(PriceStats {
        mean,
        median,
        std_dev,
        volatility,
        outliers,
    })
}
