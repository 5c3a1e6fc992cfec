use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, error};

use super::exec::run_metrics_command;
use super::{MetricProxy, ScrapeParams};
use crate::error::ScrapeError;
use crate::exposition::MetricFamily;

/// Runs a subprocess on a fixed interval and serves the last successful
/// result. Scrapes before the first successful execution block on a
/// readiness signal; afterwards they return whichever snapshot is current,
/// accepting staleness up to the interval.
pub struct ExecCachedProxy {
    cache: Arc<RwLock<Vec<MetricFamily>>>,
    ready: watch::Receiver<bool>,
}

impl ExecCachedProxy {
    /// Starts the worker task; it runs until process exit.
    pub fn new(command: impl Into<String>, args: Vec<String>, interval: Duration) -> Self {
        let cache: Arc<RwLock<Vec<MetricFamily>>> = Arc::default();
        let (ready_tx, ready) = watch::channel(false);
        tokio::spawn(run_worker(
            command.into(),
            args,
            interval,
            Arc::clone(&cache),
            ready_tx,
        ));
        Self { cache, ready }
    }
}

#[async_trait]
impl MetricProxy for ExecCachedProxy {
    async fn scrape(&self, _params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        let mut ready = self.ready.clone();
        if ready.wait_for(|ready| *ready).await.is_err() {
            return Err(ScrapeError::Backend {
                message: "cached exec worker is gone".to_string(),
            });
        }
        Ok(self.cache.read().await.clone())
    }
}

async fn run_worker(
    command: String,
    args: Vec<String>,
    interval: Duration,
    cache: Arc<RwLock<Vec<MetricFamily>>>,
    ready: watch::Sender<bool>,
) {
    debug!(command = %command, "cached exec proxy worker started");
    let mut next_exec = Instant::now();
    loop {
        tokio::time::sleep_until(next_exec).await;
        next_exec = Instant::now() + interval;

        match run_metrics_command(&command, &args).await {
            Ok(families) => {
                *cache.write().await = families;
                // The first successful execution unblocks waiting scrapes.
                if !*ready.borrow() {
                    let _ = ready.send(true);
                }
            }
            Err(err) => {
                // The previous snapshot keeps being served.
                error!(command = %command, error = %err, "periodic metrics command failed");
            }
        }
    }
}
