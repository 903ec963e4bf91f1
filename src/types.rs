//! Core types used throughout the price feed
//!
//! Defines source configuration, quotes, per-cycle statistics and the
//! aggregation result handed to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Supported quote providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Binance,
    Coinbase,
    Bybit,
    #[serde(alias = "htx")]
    Huobi,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Binance => write!(f, "Binance"),
            SourceKind::Coinbase => write!(f, "Coinbase"),
            SourceKind::Bybit => write!(f, "Bybit"),
            SourceKind::Huobi => write!(f, "Huobi"),
        }
    }
}

/// Configuration of one external quote source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Unique source name, used as the key for filters and accuracy data
    pub name: String,
    /// Which client serves this source
    pub kind: SourceKind,
    /// Relative weight in (0, 1]; normalised across sources at load time
    pub weight: f64,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum requests per rolling minute (0 = unlimited)
    #[serde(default)]
    pub rate_limit: u32,
    /// Key into the credential store, if the source needs authentication
    #[serde(default)]
    pub credential_ref: Option<String>,
}

impl DataSourceConfig {
    pub fn new(name: &str, kind: SourceKind, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            weight,
            timeout_ms: 5_000,
            rate_limit: 0,
            credential_ref: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A trading pair written as `BASE/QUOTE`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    /// Parse `NEO/USDT`, `NEO-USDT` or `NEO_USDT`
    pub fn parse(symbol: &str) -> Option<Self> {
        let mut parts = symbol.split(|c| c == '/' || c == '-' || c == '_');
        let base = parts.next()?.trim();
        let quote = parts.next()?.trim();
        if base.is_empty() || quote.is_empty() || parts.next().is_some() {
            return None;
        }
        Some(Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        })
    }

    /// Concatenated form used by most CEX APIs (e.g. "NEOUSDT")
    pub fn joined(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Raw quote returned by a source client
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuote {
    pub price: f64,
    /// Quote time in milliseconds
    pub timestamp: i64,
}

/// A quote tied to the source that produced it, valid for one cycle
#[derive(Debug, Clone)]
pub struct SourceQuote {
    pub source: DataSourceConfig,
    pub price: f64,
    pub timestamp: i64,
}

/// Outlier detected in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub source: String,
    pub price: f64,
    /// Absolute distance from the cycle mean
    pub deviation: f64,
}

/// Per-cycle statistics over filtered prices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub volatility: f64,
    pub outliers: Vec<Outlier>,
}

impl PriceStats {
    pub fn is_outlier(&self, source: &str) -> bool {
        self.outliers.iter().any(|o| o.source == source)
    }
}

/// One source's contribution to a consensus price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePrice {
    pub name: String,
    pub price: f64,
    pub weight: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationDetails {
    pub last_update: i64,
    pub sources: Vec<SourcePrice>,
}

/// Output of one aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub symbol: String,
    pub price: f64,
    /// Aggregate confidence in [0, 1]
    pub confidence: f64,
    pub details: AggregationDetails,
    pub stats: PriceStats,
}

impl AggregationResult {
    pub fn source_count(&self) -> usize {
        self.details.sources.len()
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        now - self.details.last_update
    }
}

/// Consensus price recorded in the rolling history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    pub price: f64,
    pub timestamp: i64,
}
