//! Accuracy Tracker - historical error, success and volatility per source
//!
//! Every fetch attempt, successful or not, feeds one observation. The
//! resulting factor scales a source's weight once enough history exists.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// EMA decay applied to mean error and volatility
const ERROR_DECAY: f64 = 0.95;

/// Observations required before history influences weighting
const MIN_UPDATES: u64 = 10;

const FACTOR_FLOOR: f64 = 0.1;
const FACTOR_CEIL: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceAccuracyData {
    pub mean_error: f64,
    pub last_update: i64,
    pub update_count: u64,
    pub success_rate: f64,
    pub volatility_score: f64,
}

impl Default for SourceAccuracyData {
    fn default() -> Self {
        Self {
            mean_error: 0.0,
            last_update: 0,
            update_count: 0,
            success_rate: 1.0,
            volatility_score: 0.0,
        }
    }
}

impl SourceAccuracyData {
    fn record(&mut self, error: f64, success: bool, timestamp: i64) {
        self.update_count += 1;

        let deviation = error - self.mean_error;
        self.mean_error = self.mean_error * ERROR_DECAY + error * (1.0 - ERROR_DECAY);
        self.volatility_score =
            self.volatility_score * ERROR_DECAY + deviation * deviation * (1.0 - ERROR_DECAY);

        let w = 1.0 / (self.update_count.max(1) as f64);
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = self.success_rate * (1.0 - w) + outcome * w;

        self.last_update = timestamp;
    }

    /// Weight multiplier in [0.1, 1.0]; neutral until enough history exists
    pub fn accuracy_factor(&self) -> f64 {
        if self.update_count < MIN_UPDATES {
            return 1.0;
        }
        let score = 0.4 * (1.0 - self.mean_error)
            + 0.4 * self.success_rate
            + 0.2 * (1.0 - self.volatility_score);
        score.clamp(FACTOR_FLOOR, FACTOR_CEIL)
    }
}

/// Source-keyed accuracy statistics for one symbol
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    sources: HashMap<String, SourceAccuracyData>,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted snapshot
    pub fn from_snapshot(snapshot: HashMap<String, SourceAccuracyData>) -> Self {
        Self { sources: snapshot }
    }

    /// Record a successful quote against the cycle's consensus
    pub fn record_success(&mut self, source: &str, price: f64, consensus: f64, timestamp: i64) {
        let error = if consensus > 0.0 {
            (price - consensus).abs() / consensus
        } else {
            0.0
        };
        self.entry(source).record(error, true, timestamp);
    }

    /// Record a failed fetch attempt
    pub fn record_failure(&mut self, source: &str, timestamp: i64) {
        self.entry(source).record(0.0, false, timestamp);
    }

    pub fn historical_accuracy_factor(&self, source: &str) -> f64 {
        self.sources
            .get(source)
            .map(SourceAccuracyData::accuracy_factor)
            .unwrap_or(1.0)
    }

    pub fn get(&self, source: &str) -> Option<&SourceAccuracyData> {
        self.sources.get(source)
    }

    pub fn snapshot(&self) -> HashMap<String, SourceAccuracyData> {
        self.sources.clone()
    }

    fn entry(&mut self, source: &str) -> &mut SourceAccuracyData {
        self.sources.entry(source.to_string()).or_default()
    }
}
