//! Accuracy Persistence Module
//!
//! Stores per-symbol source accuracy snapshots so that learned source
//! reliability survives restarts. One JSON document per symbol under
//! `<data_dir>/accuracy/`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::oracle::accuracy::SourceAccuracyData;

pub type AccuracySnapshot = HashMap<String, SourceAccuracyData>;

#[async_trait]
pub trait AccuracyStore: Send + Sync {
    /// Load the saved snapshot; an unknown symbol yields an empty map
    async fn load(&self, symbol: &str) -> Result<AccuracySnapshot>;

    async fn save(&self, symbol: &str, snapshot: &AccuracySnapshot) -> Result<()>;
}

/// JSON file store
pub struct JsonFileAccuracyStore {
    dir: PathBuf,
}

impl JsonFileAccuracyStore {
    pub fn new(data_dir: &str) -> Result<Self> {
        let dir = Path::new(data_dir).join("accuracy");
        std::fs::create_dir_all(&dir).context("Failed to create accuracy directory")?;
        info!(dir = %dir.display(), "📁 Accuracy store ready");
        Ok(Self { dir })
    }

    /// `NEO/USDT` is stored as `NEO_USDT.json`.
    ///
    /// ASCII letters and digits are kept, `/` becomes `_` and every other
    /// byte is written as `-xx` hex, so distinct symbols never share a file.
    pub fn path_for(&self, symbol: &str) -> PathBuf {
        let mut file = String::with_capacity(symbol.len());
        for byte in symbol.bytes() {
            match byte {
                b'/' => file.push('_'),
                b if b.is_ascii_alphanumeric() => file.push(b as char),
                b => file.push_str(&format!("-{:02x}", b)),
            }
        }
        self.dir.join(format!("{}.json", file))
    }
}

#[async_trait]
impl AccuracyStore for JsonFileAccuracyStore {
    async fn load(&self, symbol: &str) -> Result<AccuracySnapshot> {
        let path = self.path_for(symbol);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(symbol, "No saved accuracy snapshot");
                return Ok(AccuracySnapshot::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse accuracy snapshot {}", path.display()))
    }

    async fn save(&self, symbol: &str, snapshot: &AccuracySnapshot) -> Result<()> {
        let path = self.path_for(symbol);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot).context("Failed to encode snapshot")?;

        // Write-then-rename so a crash never leaves a truncated snapshot
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
        Ok(())
    }
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryAccuracyStore {
    snapshots: RwLock<HashMap<String, AccuracySnapshot>>,
}

impl MemoryAccuracyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self, symbol: &str) -> Option<AccuracySnapshot> {
        self.snapshots.read().ok()?.get(symbol).cloned()
    }
}

#[async_trait]
impl AccuracyStore for MemoryAccuracyStore {
    async fn load(&self, symbol: &str) -> Result<AccuracySnapshot> {
        Ok(self.saved(symbol).unwrap_or_default())
    }

    async fn save(&self, symbol: &str, snapshot: &AccuracySnapshot) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .write()
            .map_err(|_| anyhow::anyhow!("accuracy store poisoned"))?;
        snapshots.insert(symbol.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::accuracy::AccuracyTracker;

    fn sample_snapshot() -> AccuracySnapshot {
        let mut tracker = AccuracyTracker::new();
        for i in 0..12 {
            tracker.record_success("binance", 100.5, 100.0, i);
        }
        tracker.record_failure("huobi", 12);
        tracker.snapshot()
    }

    #[tokio::test]
    async fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccuracyStore::new(dir.path().to_str().unwrap()).unwrap();

        let snapshot = sample_snapshot();
        store.save("NEO/USDT", &snapshot).await.unwrap();
        assert!(dir.path().join("accuracy").join("NEO_USDT.json").exists());

        let loaded = store.load("NEO/USDT").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["binance"].update_count, 12);
        assert!((loaded["binance"].mean_error - snapshot["binance"].mean_error).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_json_store_missing_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccuracyStore::new(dir.path().to_str().unwrap()).unwrap();
        assert!(store.load("GAS/USDT").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccuracyStore::new(dir.path().to_str().unwrap()).unwrap();
        std::fs::write(store.path_for("NEO/USDT"), b"{not json").unwrap();
        assert!(store.load("NEO/USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_similar_symbols_use_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileAccuracyStore::new(dir.path().to_str().unwrap()).unwrap();

        let symbols = ["NEO/USDT", "NEO-USDT", "NEO_USDT", "neo/usdt"];
        let paths: std::collections::HashSet<PathBuf> =
            symbols.iter().map(|s| store.path_for(s)).collect();
        assert_eq!(paths.len(), symbols.len());

        store.save("NEO/USDT", &sample_snapshot()).await.unwrap();
        assert!(store.load("NEO-USDT").await.unwrap().is_empty());
        assert_eq!(store.load("NEO/USDT").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryAccuracyStore::new();
        assert!(store.load("NEO/USDT").await.unwrap().is_empty());

        store.save("NEO/USDT", &sample_snapshot()).await.unwrap();
        assert_eq!(store.saved("NEO/USDT").unwrap().len(), 2);
    }
}
