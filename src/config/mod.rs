//! Configuration management for the price feed
//!
//! Loads from YAML/TOML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::types::DataSourceConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub filter: FilterConfig,
    #[serde(default)]
    pub sources: Vec<DataSourceConfig>,
    pub persistence: PersistenceConfig,
    pub publisher: PublisherConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Symbols to aggregate, written BASE/QUOTE
    pub symbols: Vec<String>,
    /// Minimum valid quotes per cycle
    pub min_sources: usize,
    /// Outlier threshold in standard deviations
    pub outlier_threshold: f64,
    /// Lower bound of the median-based outlier scale, relative to the median
    pub outlier_scale_floor: f64,
    /// Quotes older than this contribute zero weight
    pub max_quote_age_secs: u64,
    /// Rolling window of consensus history
    pub history_window_secs: u64,
    /// Minimum spacing between on-chain publications per symbol
    pub update_interval_secs: u64,
    /// Minimum confidence required to publish
    pub min_publish_confidence: f64,
    /// Minimum spacing between accuracy snapshots per symbol
    pub accuracy_save_interval_secs: u64,
    /// Relative move between consecutive consensus prices that raises an alert
    pub deviation_alert_threshold: f64,
    /// How far in the future a quote timestamp may lie before rejection
    pub future_tolerance_ms: i64,
    /// Track price, velocity and acceleration jointly
    pub multi_state: bool,
}

impl OracleConfig {
    pub fn max_quote_age_ms(&self) -> i64 {
        (self.max_quote_age_secs * 1000) as i64
    }

    pub fn history_window_ms(&self) -> i64 {
        (self.history_window_secs * 1000) as i64
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn accuracy_save_interval_ms(&self) -> i64 {
        (self.accuracy_save_interval_secs * 1000) as i64
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["NEO/USDT".to_string(), "GAS/USDT".to_string()],
            min_sources: 3,
            outlier_threshold: 2.0,
            outlier_scale_floor: 0.005,
            max_quote_age_secs: 300,
            history_window_secs: 86_400,
            update_interval_secs: 60,
            min_publish_confidence: 0.8,
            accuracy_save_interval_secs: 300,
            deviation_alert_threshold: 0.05,
            future_tolerance_ms: 5_000,
            multi_state: false,
        }
    }
}

/// Base noise values and adaptation bounds for the filter bank
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FilterConfig {
    /// Base measurement noise (R)
    pub measurement_noise: f64,
    /// Base process noise (Q)
    pub process_noise: f64,
    /// EMA rate for innovation statistics and noise blending
    pub adaptation_rate: f64,
    /// Lower clamp for adapted noise, as a multiple of the base value
    pub min_noise_factor: f64,
    /// Upper clamp for adapted noise, as a multiple of the base value
    pub max_noise_factor: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            measurement_noise: 0.1,
            process_noise: 0.001,
            adaptation_rate: 0.1,
            min_noise_factor: 0.01,
            max_noise_factor: 100.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Log would-be submissions instead of sending them
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Oracle defaults
            .set_default("oracle.symbols", vec!["NEO/USDT", "GAS/USDT"])?
            .set_default("oracle.min_sources", 3)?
            .set_default("oracle.outlier_threshold", 2.0)?
            .set_default("oracle.outlier_scale_floor", 0.005)?
            .set_default("oracle.max_quote_age_secs", 300)?
            .set_default("oracle.history_window_secs", 86_400)?
            .set_default("oracle.update_interval_secs", 60)?
            .set_default("oracle.min_publish_confidence", 0.8)?
            .set_default("oracle.accuracy_save_interval_secs", 300)?
            .set_default("oracle.deviation_alert_threshold", 0.05)?
            .set_default("oracle.future_tolerance_ms", 5_000)?
            .set_default("oracle.multi_state", false)?
            // Filter defaults
            .set_default("filter.measurement_noise", 0.1)?
            .set_default("filter.process_noise", 0.001)?
            .set_default("filter.adaptation_rate", 0.1)?
            .set_default("filter.min_noise_factor", 0.01)?
            .set_default("filter.max_noise_factor", 100.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            // Publisher defaults
            .set_default("publisher.dry_run", true)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEFEED_*)
            .add_source(Environment::with_prefix("PRICEFEED").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        normalize_weights(&mut app_config.sources)?;

        Ok(app_config)
    }

    /// Check invariants that deserialization cannot express
    pub fn validate(&self) -> Result<()> {
        if self.oracle.symbols.is_empty() {
            bail!("oracle.symbols must list at least one symbol");
        }
        if self.oracle.min_sources == 0 {
            bail!("oracle.min_sources must be at least 1");
        }
        if self.oracle.outlier_scale_floor.is_nan() || self.oracle.outlier_scale_floor < 0.0 {
            bail!("oracle.outlier_scale_floor must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.oracle.min_publish_confidence) {
            bail!("oracle.min_publish_confidence must be within [0, 1]");
        }
        if self.sources.is_empty() {
            bail!("at least one entry in `sources` is required");
        }
        if !(0.0..=1.0).contains(&self.filter.adaptation_rate) {
            bail!("filter.adaptation_rate must be within [0, 1]");
        }
        if self.filter.measurement_noise <= 0.0 || self.filter.process_noise <= 0.0 {
            bail!("filter noise values must be positive");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                bail!("duplicate source name {}", source.name);
            }
        }
        Ok(())
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name.as_str()).collect();
        format!(
            "symbols={:?} sources={:?} min_sources={} interval={}s min_conf={:.2} multi_state={} dry_run={}",
            self.oracle.symbols,
            names,
            self.oracle.min_sources,
            self.oracle.update_interval_secs,
            self.oracle.min_publish_confidence,
            self.oracle.multi_state,
            self.publisher.dry_run
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

/// Validate weights in (0, 1] and rescale them to sum to 1.0
pub fn normalize_weights(sources: &mut [DataSourceConfig]) -> Result<()> {
    for source in sources.iter() {
        if !(source.weight > 0.0 && source.weight <= 1.0) {
            bail!(
                "source {} has weight {} outside (0, 1]",
                source.name,
                source.weight
            );
        }
    }

    let total: f64 = sources.iter().map(|s| s.weight).sum();
    if total <= 0.0 {
        bail!("source weights sum to zero");
    }
    for source in sources.iter_mut() {
        source.weight /= total;
    }
    Ok(())
}
