//! End-to-end aggregation cycles against scripted sources

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pricefeed::config::{normalize_weights, FilterConfig, OracleConfig};
use pricefeed::metrics::NoopMetrics;
use pricefeed::oracle::{FetchCoordinator, PriceEngine, QuoteSource};
use pricefeed::persistence::MemoryAccuracyStore;
use pricefeed::publish::{ChainPublisher, PublishMetadata};
use pricefeed::secrets::MemoryCredentialStore;
use pricefeed::types::{now_ms, DataSourceConfig, RawQuote, SourceKind, TradingPair};
use pricefeed::OracleError;

struct ScriptedSource {
    name: String,
    price: Mutex<Option<f64>>,
    delay: Duration,
}

#[async_trait]
impl QuoteSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_quote(&self, _pair: &TradingPair, _credential: Option<&str>) -> Result<RawQuote> {
        tokio::time::sleep(self.delay).await;
        let price = *self.price.lock().unwrap();
        match price {
            Some(price) => Ok(RawQuote {
                price,
                timestamp: now_ms(),
            }),
            None => bail!("503 Service Unavailable"),
        }
    }
}

#[derive(Default)]
struct RecordingPublisher {
    calls: Mutex<Vec<(String, f64, PublishMetadata)>>,
}

#[async_trait]
impl ChainPublisher for RecordingPublisher {
    async fn publish_price(&self, symbol: &str, price: f64, metadata: PublishMetadata) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((symbol.to_string(), price, metadata));
        Ok(())
    }
}

struct Feed {
    engine: PriceEngine,
    sources: Vec<Arc<ScriptedSource>>,
    publisher: Arc<RecordingPublisher>,
}

impl Feed {
    fn set(&self, index: usize, price: Option<f64>) {
        *self.sources[index].price.lock().unwrap() = price;
    }
}

fn feed(prices: &[(f64, u64)], config: OracleConfig) -> Feed {
    let sources: Vec<Arc<ScriptedSource>> = prices
        .iter()
        .enumerate()
        .map(|(i, (price, delay_ms))| {
            Arc::new(ScriptedSource {
                name: format!("exchange{}", i),
                price: Mutex::new(Some(*price)),
                delay: Duration::from_millis(*delay_ms),
            })
        })
        .collect();

    let mut configs: Vec<DataSourceConfig> = sources
        .iter()
        .map(|s| {
            let mut c = DataSourceConfig::new(&s.name, SourceKind::Binance, 1.0);
            c.timeout_ms = 250;
            c
        })
        .collect();
    normalize_weights(&mut configs).unwrap();

    let wired: Vec<(DataSourceConfig, Arc<dyn QuoteSource>)> = configs
        .into_iter()
        .zip(sources.iter())
        .map(|(c, s)| (c, s.clone() as Arc<dyn QuoteSource>))
        .collect();

    let publisher = Arc::new(RecordingPublisher::default());
    let engine = PriceEngine::new(
        config,
        FilterConfig::default(),
        FetchCoordinator::new(wired, Arc::new(MemoryCredentialStore::new()), 5_000),
        Arc::new(MemoryAccuracyStore::new()),
        publisher.clone(),
        Arc::new(NoopMetrics),
    );
    Feed {
        engine,
        sources,
        publisher,
    }
}

fn instant(prices: &[f64]) -> Vec<(f64, u64)> {
    prices.iter().map(|p| (*p, 0)).collect()
}

#[tokio::test]
async fn test_consensus_of_agreeing_sources() {
    let f = feed(&instant(&[100.0, 101.0, 99.0, 102.0]), OracleConfig::default());
    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();

    assert!((result.price - 100.5).abs() <= 1.0, "price {}", result.price);
    assert!(result.confidence > 0.5);
    assert!(result.stats.outliers.is_empty());
    assert_eq!(result.symbol, "NEO/USDT");
    assert_eq!(result.details.sources.len(), 4);
}

#[tokio::test]
async fn test_outlier_flagged_and_excluded() {
    let f = feed(&instant(&[100.0, 101.0, 99.0, 1000.0]), OracleConfig::default());
    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();

    let flagged: Vec<&str> = result.stats.outliers.iter().map(|o| o.source.as_str()).collect();
    assert_eq!(flagged, vec!["exchange3"]);
    assert!((result.price - 100.0).abs() <= 1.0, "price {}", result.price);
}

#[tokio::test]
async fn test_too_few_sources() {
    let f = feed(&instant(&[100.0, 101.0]), OracleConfig::default());
    let err = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap_err();
    assert!(matches!(
        err,
        OracleError::InsufficientSources {
            available: 2,
            required: 3,
            ..
        }
    ));
    assert!(f.publisher.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_sources_tolerated_above_minimum() {
    let f = feed(&instant(&[100.0, 101.0, 99.0, 100.5]), OracleConfig::default());
    f.set(1, None);

    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();
    assert_eq!(result.details.sources.len(), 3);
    assert!(result.details.sources.iter().all(|s| s.name != "exchange1"));

    let accuracy = f.engine.accuracy_snapshot("NEO/USDT").await;
    assert_eq!(accuracy["exchange1"].success_rate, 0.0);
    assert_eq!(accuracy["exchange0"].success_rate, 1.0);
}

#[tokio::test]
async fn test_slow_source_discarded() {
    let prices = [(100.0, 0), (101.0, 0), (99.0, 0), (500.0, 2_000)];
    let f = feed(&prices, OracleConfig::default());

    let started = std::time::Instant::now();
    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
    assert_eq!(result.details.sources.len(), 3);
    assert!((result.price - 100.0).abs() <= 1.0);
}

#[tokio::test]
async fn test_preferred_source_still_aggregated() {
    let f = feed(&instant(&[100.0, 101.0, 99.0]), OracleConfig::default());
    let result = f
        .engine
        .get_aggregated_price("NEO/USDT", Some("exchange2"))
        .await
        .unwrap();
    assert_eq!(result.details.sources[0].name, "exchange2");
    assert_eq!(result.details.sources.len(), 3);
}

#[tokio::test]
async fn test_publish_gated_by_confidence() {
    let mut config = OracleConfig::default();
    config.min_publish_confidence = 0.99;
    let f = feed(&instant(&[100.0, 101.0, 99.0, 102.0]), config);
    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();
    assert!(result.confidence < 0.99);
    assert!(f.publisher.calls.lock().unwrap().is_empty());

    let mut config = OracleConfig::default();
    config.min_publish_confidence = 0.5;
    let f = feed(&instant(&[100.0, 101.0, 99.0, 102.0]), config);
    let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();
    f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();

    let calls = f.publisher.calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "second cycle falls inside the update interval");
    assert_eq!(calls[0].0, "NEO/USDT");
    assert_eq!(calls[0].1, result.price);
    assert_eq!(calls[0].2.source_count, 4);
    assert_eq!(calls[0].2.confidence, result.confidence);
}

#[tokio::test]
async fn test_history_accumulates_and_queries_by_range() {
    let f = feed(&instant(&[100.0, 101.0, 99.0]), OracleConfig::default());
    let start = now_ms();
    for _ in 0..3 {
        f.engine.get_aggregated_price("GAS/USDT", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let all = f.engine.price_history("GAS/USDT", start, now_ms()).await;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let none = f.engine.price_history("GAS/USDT", 0, start - 1).await;
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_latest_refreshes_stale_result() {
    let f = feed(&instant(&[100.0, 101.0, 99.0]), OracleConfig::default());
    let first = f.engine.latest("NEO/USDT", Duration::from_secs(60)).await.unwrap();

    for i in 0..3 {
        f.set(i, Some(200.0));
    }
    let cached = f.engine.latest("NEO/USDT", Duration::from_secs(60)).await.unwrap();
    assert_eq!(cached.price, first.price);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let fresh = f.engine.latest("NEO/USDT", Duration::from_millis(1)).await.unwrap();
    assert!(fresh.price > first.price);
}

#[tokio::test]
async fn test_random_quotes_stay_in_range() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let base: f64 = rng.gen_range(1.0..10_000.0);
        let prices: Vec<f64> = (0..5).map(|_| base * rng.gen_range(0.98..1.02)).collect();
        let lo = prices.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let f = feed(&instant(&prices), OracleConfig::default());
        let result = f.engine.get_aggregated_price("NEO/USDT", None).await.unwrap();
        assert!((0.0..=1.0).contains(&result.confidence));
        assert!(result.price >= lo - 1e-9 && result.price <= hi + 1e-9);
    }
}
