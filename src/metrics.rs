//! Metrics emission
//!
//! The engine reports through `MetricsSink` so that embedding code and tests
//! can swap the recorder. `MetricsFacade` forwards to the `metrics` crate,
//! which is a no-op until the host installs a recorder.

use ::metrics::Label;

pub trait MetricsSink: Send + Sync {
    fn gauge(&self, name: &'static str, value: f64, symbol: &str, source: Option<&str>);

    fn counter(&self, name: &'static str, symbol: &str, source: Option<&str>);
}

fn labels(symbol: &str, source: Option<&str>) -> Vec<Label> {
    let mut labels = vec![Label::new("symbol", symbol.to_string())];
    if let Some(source) = source {
        labels.push(Label::new("source", source.to_string()));
    }
    labels
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacade;

impl MetricsSink for MetricsFacade {
    fn gauge(&self, name: &'static str, value: f64, symbol: &str, source: Option<&str>) {
        ::metrics::gauge!(name, value, labels(symbol, source));
    }

    fn counter(&self, name: &'static str, symbol: &str, source: Option<&str>) {
        ::metrics::counter!(name, 1, labels(symbol, source));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn gauge(&self, _name: &'static str, _value: f64, _symbol: &str, _source: Option<&str>) {}

    fn counter(&self, _name: &'static str, _symbol: &str, _source: Option<&str>) {}
}

pub mod names {
    pub const CONSENSUS_PRICE: &str = "pricefeed_consensus_price";
    pub const CONFIDENCE: &str = "pricefeed_confidence";
    pub const MEAN: &str = "pricefeed_mean";
    pub const MEDIAN: &str = "pricefeed_median";
    pub const STD_DEV: &str = "pricefeed_std_dev";
    pub const VOLATILITY: &str = "pricefeed_volatility";
    pub const OUTLIERS: &str = "pricefeed_outliers";
    pub const SOURCE_WEIGHT: &str = "pricefeed_source_weight";
    pub const FILTER_COVARIANCE: &str = "pricefeed_filter_covariance";
    pub const INNOVATION_VARIANCE: &str = "pricefeed_innovation_variance";
    pub const ACCURACY_FACTOR: &str = "pricefeed_accuracy_factor";
    pub const FETCH_FAILURES: &str = "pricefeed_fetch_failures_total";
    pub const PUBLISH_SUCCESS: &str = "pricefeed_publish_success_total";
    pub const PUBLISH_FAILURE: &str = "pricefeed_publish_failure_total";
    pub const PUBLISH_SKIPPED: &str = "pricefeed_publish_skipped_total";
    pub const CYCLE_INSUFFICIENT_SOURCES: &str = "pricefeed_cycle_insufficient_sources_total";
    pub const CYCLE_NO_VALID_PRICES: &str = "pricefeed_cycle_no_valid_prices_total";
    pub const ALERT_DEVIATION: &str = "pricefeed_alert_deviation_total";
    pub const ALERT_STALE: &str = "pricefeed_alert_stale_total";
    pub const ALERT_SOURCE_FAILURE: &str = "pricefeed_alert_source_failure_total";
}

/// Records every emission, for assertions in tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    pub gauges: std::sync::Mutex<Vec<(String, f64, String, Option<String>)>>,
    pub counters: std::sync::Mutex<Vec<(String, String, Option<String>)>>,
}

#[cfg(test)]
impl RecordingMetrics {
    pub fn counter_total(&self, name: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _, _)| n == name)
            .count()
    }

    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _, _, _)| n == name)
            .map(|(_, v, _, _)| *v)
    }
}

#[cfg(test)]
impl MetricsSink for RecordingMetrics {
    fn gauge(&self, name: &'static str, value: f64, symbol: &str, source: Option<&str>) {
        self.gauges.lock().unwrap().push((
            name.to_string(),
            value,
            symbol.to_string(),
            source.map(str::to_string),
        ));
    }

    fn counter(&self, name: &'static str, symbol: &str, source: Option<&str>) {
        self.counters.lock().unwrap().push((
            name.to_string(),
            symbol.to_string(),
            source.map(str::to_string),
        ));
    }
}
