//! Oracle module - Multi-source price aggregation
//!
//! Fetches quotes from the configured exchanges, smooths each source through
//! an adaptive Kalman filter and produces a confidence-scored consensus
//! price per symbol.

pub mod accuracy;
mod aggregator;
pub mod confidence;
pub mod fetch;
pub mod history;
pub mod kalman;
pub mod sources;
pub mod stats;
pub mod weights;

pub use aggregator::PriceEngine;
pub use fetch::FetchCoordinator;
pub use sources::{build_source, QuoteSource};
