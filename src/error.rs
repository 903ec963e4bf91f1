//! Error taxonomy of the aggregation engine
//!
//! Only `InsufficientSources` and `NoValidPricesAfterAdjustment` ever reach
//! callers of `PriceEngine::get_aggregated_price`. Fetch and publish
//! failures are recorded, logged and absorbed inside the cycle.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OracleError {
    #[error("insufficient sources for {symbol}: {available} valid quotes, {required} required")]
    InsufficientSources {
        symbol: String,
        available: usize,
        required: usize,
    },

    #[error("no valid prices after adjustment for {symbol}")]
    NoValidPricesAfterAdjustment { symbol: String },

    #[error("source {source_name} failed: {reason}")]
    SourceFetchFailed { source_name: String, reason: String },

    #[error("publish failed for {symbol}: {reason}")]
    PublishFailed { symbol: String, reason: String },
}

impl OracleError {
    pub fn fetch_failed(source_name: &str, reason: impl ToString) -> Self {
        OracleError::SourceFetchFailed {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::InsufficientSources { .. } => "insufficient_sources",
            OracleError::NoValidPricesAfterAdjustment { .. } => "no_valid_prices",
            OracleError::SourceFetchFailed { .. } => "source_fetch_failed",
            OracleError::PublishFailed { .. } => "publish_failed",
        }
    }
}

pub type OracleResult<T> = std::result::Result<T, OracleError>;
