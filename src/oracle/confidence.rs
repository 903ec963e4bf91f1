//! Confidence Scorer - six normalised signals averaged into one score

use serde::{Deserialize, Serialize};

/// Return volatility at which the volatility factor reaches zero
const VOLATILITY_CEILING: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct ConfidenceInputs {
    pub mean: f64,
    pub std_dev: f64,
    pub volatility: f64,
    pub valid_source_count: usize,
    pub min_sources: usize,
    pub outlier_count: usize,
    pub total_sources: usize,
    /// Per-source `max(0, 1 - errorCovariance)`
    pub kalman_confidences: Vec<f64>,
    /// Per-source innovation confidence
    pub innovation_confidences: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub source_agreement: f64,
    pub volatility_factor: f64,
    pub source_count_factor: f64,
    pub outlier_impact: f64,
    pub kalman_confidence: f64,
    pub innovation_confidence: f64,
    pub total: f64,
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn score(inputs: &ConfidenceInputs) -> ConfidenceBreakdown {
    let source_agreement = if inputs.mean > 0.0 {
        unit(1.0 - inputs.std_dev / inputs.mean)
    } else {
        0.0
    };
    let volatility_factor = unit(1.0 - inputs.volatility / VOLATILITY_CEILING);
    let source_count_factor = if inputs.min_sources > 0 {
        unit(inputs.valid_source_count as f64 / inputs.min_sources as f64)
    } else {
        1.0
    };
    let outlier_impact = if inputs.total_sources > 0 {
        unit(1.0 - inputs.outlier_count as f64 / inputs.total_sources as f64)
    } else {
        0.0
    };
    let kalman_confidence = unit(average(&inputs.kalman_confidences));
    let innovation_confidence = unit(average(&inputs.innovation_confidences));

    let total = unit(
        (source_agreement
            + volatility_factor
            + source_count_factor
            + outlier_impact
            + kalman_confidence
            + innovation_confidence)
            / 6.0,
    );

    ConfidenceBreakdown {
        source_agreement,
        volatility_factor,
        source_count_factor,
        outlier_impact,
        kalman_confidence,
        innovation_confidence,
        total,
    }
}
