//! Rolling consensus price history and return volatility

use std::collections::VecDeque;

use crate::types::PriceHistoryEntry;

#[derive(Debug, Clone)]
pub struct PriceHistory {
    entries: VecDeque<PriceHistoryEntry>,
    window_ms: i64,
}

impl PriceHistory {
    pub fn new(window_ms: i64) -> Self {
        Self {
            entries: VecDeque::new(),
            window_ms,
        }
    }

    /// Append a consensus price and drop entries that fell out of the window
    pub fn record(&mut self, price: f64, timestamp: i64) {
        self.entries.push_back(PriceHistoryEntry { price, timestamp });
        self.prune(timestamp);
    }

    pub fn prune(&mut self, now: i64) {
        let cutoff = now - self.window_ms;
        while self
            .entries
            .front()
            .map(|e| e.timestamp < cutoff)
            .unwrap_or(false)
        {
            self.entries.pop_front();
        }
    }

    /// Standard deviation of period-over-period returns; 0 with fewer than 2 points
    pub fn volatility(&self) -> f64 {
        if self.entries.len() < 2 {
            return 0.0;
        }
        let returns: Vec<f64> = self
            .entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .filter(|(prev, _)| prev.price > 0.0)
            .map(|(prev, next)| next.price / prev.price - 1.0)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        variance.sqrt()
    }

    pub fn latest(&self) -> Option<&PriceHistoryEntry> {
        self.entries.back()
    }

    /// Entries with `start <= timestamp <= end`
    pub fn range(&self, start: i64, end: i64) -> Vec<PriceHistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volatility_needs_two_points() {
        let mut history = PriceHistory::new(60_000);
        assert_eq!(history.volatility(), 0.0);
        history.record(100.0, 0);
        assert_eq!(history.volatility(), 0.0);
    }

    #[test]
    fn test_volatility_of_returns() {
        let mut history = PriceHistory::new(i64::MAX / 2);
        history.record(100.0, 0);
        history.record(110.0, 1);
        history.record(99.0, 2);
        // returns +10% and -10%
        assert!((history.volatility() - 0.1).abs() < 1e-12);

        let mut flat = PriceHistory::new(i64::MAX / 2);
        for i in 0..5 {
            flat.record(50.0, i);
        }
        assert_eq!(flat.volatility(), 0.0);
    }

    #[test]
    fn test_window_pruning() {
        let mut history = PriceHistory::new(1_000);
        history.record(1.0, 0);
        history.record(2.0, 500);
        history.record(3.0, 1_200);
        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().price, 3.0);

        history.prune(5_000);
        assert!(history.is_empty());
    }

    #[test]
    fn test_range_query() {
        let mut history = PriceHistory::new(10_000);
        for i in 0..5 {
            history.record(i as f64, i * 1_000);
        }
        let slice = history.range(1_000, 3_000);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].price, 1.0);
        assert_eq!(slice[2].timestamp, 3_000);
    }
}
