//! PriceFeed Library
//!
//! Multi-source price oracle: adaptive per-source filtering, outlier-aware
//! weighted consensus and confidence-gated on-chain publication.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod oracle;
pub mod persistence;
pub mod publish;
pub mod secrets;
pub mod service;
pub mod types;

pub use error::{OracleError, OracleResult};
pub use oracle::PriceEngine;
