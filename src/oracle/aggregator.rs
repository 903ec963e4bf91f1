//! Price Engine - runs aggregation cycles per symbol
//!
//! One cycle: fetch quotes, filter each through its source's Kalman filter,
//! compute statistics and outliers, weight the survivors into a consensus,
//! score confidence, then update history and accuracy and hand the result
//! to the publish scheduler.
//!
//! Every symbol owns its state behind one async lock that is held for the
//! whole cycle, so a scheduled cycle and an on-demand query never interleave
//! for the same symbol while different symbols run in parallel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::{FilterConfig, OracleConfig};
use crate::error::{OracleError, OracleResult};
use crate::metrics::{names, MetricsSink};
use crate::oracle::accuracy::{AccuracyTracker, SourceAccuracyData};
use crate::oracle::confidence::{self, ConfidenceInputs};
use crate::oracle::fetch::FetchCoordinator;
use crate::oracle::history::PriceHistory;
use crate::oracle::kalman::FilterBank;
use crate::oracle::stats::{compute_stats, FilteredQuote, OutlierRule};
use crate::oracle::weights::WeightAdjuster;
use crate::persistence::AccuracyStore;
use crate::publish::{ChainPublisher, PublishScheduler};
use crate::types::{now_ms, AggregationDetails, AggregationResult, PriceHistoryEntry, TradingPair};

/// Everything the engine learns about one symbol
struct SymbolState {
    pair: Option<TradingPair>,
    filters: FilterBank,
    accuracy: AccuracyTracker,
    history: PriceHistory,
    last_result: Option<AggregationResult>,
    last_accuracy_save: i64,
}

impl SymbolState {
    fn new(symbol: &str, oracle: &OracleConfig, filter: FilterConfig) -> Self {
        Self {
            pair: TradingPair::parse(symbol),
            filters: FilterBank::new(filter, oracle.multi_state),
            accuracy: AccuracyTracker::new(),
            history: PriceHistory::new(oracle.history_window_ms()),
            last_result: None,
            last_accuracy_save: 0,
        }
    }
}

type SharedState = Arc<AsyncMutex<SymbolState>>;

pub struct PriceEngine {
    config: OracleConfig,
    filter_config: FilterConfig,
    fetcher: FetchCoordinator,
    store: Arc<dyn AccuracyStore>,
    scheduler: PublishScheduler,
    metrics: Arc<dyn MetricsSink>,
    symbols: RwLock<HashMap<String, SharedState>>,
}

impl PriceEngine {
    pub fn new(
        config: OracleConfig,
        filter_config: FilterConfig,
        fetcher: FetchCoordinator,
        store: Arc<dyn AccuracyStore>,
        publisher: Arc<dyn ChainPublisher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let scheduler = PublishScheduler::new(
            config.update_interval(),
            config.min_publish_confidence,
            publisher,
        );
        Self {
            config,
            filter_config,
            fetcher,
            store,
            scheduler,
            metrics,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn state_for(&self, symbol: &str) -> SharedState {
        {
            let symbols = self.symbols.read().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = symbols.get(symbol) {
                return state.clone();
            }
        }
        let mut symbols = self.symbols.write().unwrap_or_else(|e| e.into_inner());
        symbols
            .entry(symbol.to_string())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(SymbolState::new(
                    symbol,
                    &self.config,
                    self.filter_config,
                )))
            })
            .clone()
    }

    fn existing_state(&self, symbol: &str) -> Option<SharedState> {
        let symbols = self.symbols.read().unwrap_or_else(|e| e.into_inner());
        symbols.get(symbol).cloned()
    }

    /// Restore saved accuracy snapshots; returns how many symbols had one
    pub async fn load_accuracy(&self, symbols: &[String]) -> usize {
        let mut loaded = 0;
        for symbol in symbols {
            match self.store.load(symbol).await {
                Ok(snapshot) if snapshot.is_empty() => {}
                Ok(snapshot) => {
                    let sources = snapshot.len();
                    let state = self.state_for(symbol);
                    state.lock().await.accuracy = AccuracyTracker::from_snapshot(snapshot);
                    info!(symbol = %symbol, sources, "📂 Restored source accuracy");
                    loaded += 1;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Failed to load accuracy snapshot, starting fresh");
                }
            }
        }
        loaded
    }

    /// Run a full cycle for `symbol` and return its consensus.
    ///
    /// Only `InsufficientSources` and `NoValidPricesAfterAdjustment` are
    /// returned; every other failure is logged and counted.
    pub async fn get_aggregated_price(
        &self,
        symbol: &str,
        preferred_source: Option<&str>,
    ) -> OracleResult<AggregationResult> {
        let state = self.state_for(symbol);
        let mut state = state.lock().await;
        self.run_cycle(&mut state, symbol, preferred_source).await
    }

    /// Last result if younger than `max_age`, otherwise a fresh cycle.
    ///
    /// When the refresh fails and an older result exists, that result is
    /// served and a stale-data alert is raised.
    pub async fn latest(&self, symbol: &str, max_age: Duration) -> OracleResult<AggregationResult> {
        let state = self.state_for(symbol);
        let mut state = state.lock().await;

        let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        if let Some(cached) = &state.last_result {
            if cached.age_ms(now_ms()) <= max_age_ms {
                return Ok(cached.clone());
            }
        }

        match self.run_cycle(&mut state, symbol, None).await {
            Ok(result) => Ok(result),
            Err(e) => match &state.last_result {
                Some(stale) => {
                    let age_ms = stale.age_ms(now_ms());
                    warn!(symbol, age_ms, error = %e, "🚨 ALERT: serving stale price");
                    self.metrics.counter(names::ALERT_STALE, symbol, None);
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }

    /// Recorded consensus prices with `start <= timestamp <= end`
    pub async fn price_history(&self, symbol: &str, start: i64, end: i64) -> Vec<PriceHistoryEntry> {
        match self.existing_state(symbol) {
            Some(state) => {
                let state = state.lock().await;
                state.history.range(start, end)
            }
            None => Vec::new(),
        }
    }

    pub async fn accuracy_snapshot(&self, symbol: &str) -> HashMap<String, SourceAccuracyData> {
        match self.existing_state(symbol) {
            Some(state) => {
                let state = state.lock().await;
                state.accuracy.snapshot()
            }
            None => HashMap::new(),
        }
    }

    async fn run_cycle(
        &self,
        state: &mut SymbolState,
        symbol: &str,
        preferred_source: Option<&str>,
    ) -> OracleResult<AggregationResult> {
        let Some(pair) = state.pair.clone() else {
            warn!(symbol, "Symbol is not a BASE/QUOTE pair, nothing to fetch");
            return Err(self.cycle_failed(
                symbol,
                OracleError::InsufficientSources {
                    symbol: symbol.to_string(),
                    available: 0,
                    required: self.config.min_sources,
                },
            ));
        };

        let outcomes = self
            .fetcher
            .fetch_all(&pair, preferred_source, now_ms())
            .await;
        let now = now_ms();

        let mut quotes = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(quote) => {
                    let filtered = state.filters.update(&name, quote.price, quote.timestamp);
                    quotes.push(FilteredQuote {
                        source: name,
                        weight: quote.source.weight,
                        raw_price: quote.price,
                        price: filtered,
                        timestamp: quote.timestamp,
                    });
                }
                Err(e) => {
                    warn!(symbol, source = %name, error = %e, "🚨 ALERT: source failure");
                    self.metrics.counter(names::FETCH_FAILURES, symbol, Some(name.as_str()));
                    self.metrics.counter(names::ALERT_SOURCE_FAILURE, symbol, Some(name.as_str()));
                    failed.push(name);
                }
            }
        }

        let stats = match compute_stats(
            symbol,
            &quotes,
            self.config.min_sources,
            OutlierRule {
                threshold: self.config.outlier_threshold,
                scale_floor: self.config.outlier_scale_floor,
            },
            state.history.volatility(),
        ) {
            Ok(stats) => stats,
            Err(e) => {
                record_failures(&mut state.accuracy, &failed, now);
                return Err(self.cycle_failed(symbol, e));
            }
        };

        let adjuster = WeightAdjuster {
            accuracy: &state.accuracy,
            filters: &state.filters,
            max_age_ms: self.config.max_quote_age_ms(),
        };
        let consensus = match adjuster.consensus(symbol, &quotes, &stats, now) {
            Ok(consensus) => consensus,
            Err(e) => {
                record_failures(&mut state.accuracy, &failed, now);
                return Err(self.cycle_failed(symbol, e));
            }
        };

        let valid: Vec<&FilteredQuote> = quotes
            .iter()
            .filter(|q| q.price.is_finite() && q.price > 0.0)
            .collect();
        let breakdown = confidence::score(&ConfidenceInputs {
            mean: stats.mean,
            std_dev: stats.std_dev,
            volatility: stats.volatility,
            valid_source_count: consensus.sources.len(),
            min_sources: self.config.min_sources,
            outlier_count: stats.outliers.len(),
            total_sources: valid.len(),
            kalman_confidences: valid
                .iter()
                .map(|q| state.filters.kalman_confidence(&q.source))
                .collect(),
            innovation_confidences: valid
                .iter()
                .map(|q| state.filters.innovation_confidence(&q.source))
                .collect(),
        });
        debug!(symbol, ?breakdown, "Confidence breakdown");

        let previous = state.history.latest().map(|e| e.price);
        state.history.record(consensus.price, now);
        if let Some(previous) = previous.filter(|p| *p > 0.0) {
            let deviation = (consensus.price - previous).abs() / previous;
            if deviation > self.config.deviation_alert_threshold {
                warn!(
                    symbol,
                    previous,
                    price = consensus.price,
                    deviation_pct = deviation * 100.0,
                    "🚨 ALERT: consensus moved beyond threshold"
                );
                self.metrics.counter(names::ALERT_DEVIATION, symbol, None);
            }
        }

        for quote in &valid {
            state
                .accuracy
                .record_success(&quote.source, quote.raw_price, consensus.price, now);
        }
        record_failures(&mut state.accuracy, &failed, now);
        self.maybe_save_accuracy(state, symbol, now);

        let result = AggregationResult {
            symbol: symbol.to_string(),
            price: consensus.price,
            confidence: breakdown.total,
            details: AggregationDetails {
                last_update: now,
                sources: consensus.sources,
            },
            stats,
        };

        self.emit_metrics(state, &result, &valid);
        info!(
            symbol,
            price = result.price,
            confidence = result.confidence,
            sources = result.source_count(),
            outliers = result.stats.outliers.len(),
            "📊 Aggregated price"
        );

        state.last_result = Some(result.clone());
        self.scheduler
            .maybe_publish(&result, now, self.metrics.as_ref())
            .await;

        Ok(result)
    }

    fn cycle_failed(&self, symbol: &str, error: OracleError) -> OracleError {
        warn!(symbol, kind = error.kind(), error = %error, "❌ Aggregation cycle failed");
        let counter = match error {
            OracleError::InsufficientSources { .. } => names::CYCLE_INSUFFICIENT_SOURCES,
            _ => names::CYCLE_NO_VALID_PRICES,
        };
        self.metrics.counter(counter, symbol, None);
        error
    }

    /// Snapshot at most once per save interval; the write runs detached
    fn maybe_save_accuracy(&self, state: &mut SymbolState, symbol: &str, now: i64) {
        if now - state.last_accuracy_save < self.config.accuracy_save_interval_ms() {
            return;
        }
        state.last_accuracy_save = now;

        let snapshot = state.accuracy.snapshot();
        let store = self.store.clone();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            match store.save(&symbol, &snapshot).await {
                Ok(()) => debug!(symbol = %symbol, sources = snapshot.len(), "💾 Saved accuracy snapshot"),
                Err(e) => warn!(symbol = %symbol, error = %e, "Failed to save accuracy snapshot"),
            }
        });
    }

    fn emit_metrics(&self, state: &SymbolState, result: &AggregationResult, valid: &[&FilteredQuote]) {
        let m = self.metrics.as_ref();
        let symbol = result.symbol.as_str();

        m.gauge(names::CONSENSUS_PRICE, result.price, symbol, None);
        m.gauge(names::CONFIDENCE, result.confidence, symbol, None);
        m.gauge(names::MEAN, result.stats.mean, symbol, None);
        m.gauge(names::MEDIAN, result.stats.median, symbol, None);
        m.gauge(names::STD_DEV, result.stats.std_dev, symbol, None);
        m.gauge(names::VOLATILITY, result.stats.volatility, symbol, None);
        m.gauge(names::OUTLIERS, result.stats.outliers.len() as f64, symbol, None);

        for source in &result.details.sources {
            m.gauge(names::SOURCE_WEIGHT, source.weight, symbol, Some(source.name.as_str()));
        }
        for quote in valid {
            let source = quote.source.as_str();
            if let Some(filter) = state.filters.get(source) {
                m.gauge(names::FILTER_COVARIANCE, filter.error_covariance, symbol, Some(source));
                m.gauge(
                    names::INNOVATION_VARIANCE,
                    filter.noise_params.innovation_variance,
                    symbol,
                    Some(source),
                );
            }
            m.gauge(
                names::ACCURACY_FACTOR,
                state.accuracy.historical_accuracy_factor(source),
                symbol,
                Some(source),
            );
        }
    }
}

fn record_failures(accuracy: &mut AccuracyTracker, failed: &[String], now: i64) {
    for source in failed {
        accuracy.record_failure(source, now);
    }
}
