//! Scheduler service - one periodic aggregation task per symbol

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::oracle::PriceEngine;

pub struct ServiceHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServiceHandle {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait for in-flight cycles to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Symbol task ended abnormally");
            }
        }
        info!("🛑 Price feed service stopped");
    }
}

/// Start one task per symbol, each ticking every `interval`
pub fn start(engine: Arc<PriceEngine>, symbols: &[String], interval: Duration) -> ServiceHandle {
    let (shutdown, rx) = watch::channel(false);
    let tasks = symbols
        .iter()
        .map(|symbol| tokio::spawn(run_symbol(engine.clone(), symbol.clone(), interval, rx.clone())))
        .collect();

    info!(symbols = ?symbols, interval_secs = interval.as_secs_f64(), "🚀 Price feed service started");
    ServiceHandle { shutdown, tasks }
}

async fn run_symbol(
    engine: Arc<PriceEngine>,
    symbol: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Errors are already logged and counted inside the cycle
                if let Err(e) = engine.get_aggregated_price(&symbol, None).await {
                    debug!(symbol = %symbol, error = %e, "Cycle produced no price");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(symbol = %symbol, "Symbol task stopping");
                    break;
                }
            }
        }
    }
}
