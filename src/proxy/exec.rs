use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::io::AsyncReadExt as _;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::{MetricProxy, ScrapeParams};
use crate::error::ScrapeError;
use crate::exposition::{self, MetricFamily};

type ScrapeOutcome = Result<Vec<MetricFamily>, ScrapeError>;
type WaiterSet = HashMap<u64, oneshot::Sender<ScrapeOutcome>>;

/// Runs a subprocess on demand and coalesces concurrent scrapes: any number
/// of callers whose registrations precede one worker wake share a single
/// invocation and receive the same decoded result.
pub struct ExecProxy {
    waiters: Arc<Mutex<WaiterSet>>,
    request_tx: mpsc::Sender<()>,
    next_waiter: AtomicU64,
}

impl ExecProxy {
    /// Starts the worker task; it runs until process exit.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        let waiters: Arc<Mutex<WaiterSet>> = Arc::default();
        let (request_tx, request_rx) = mpsc::channel(1);
        tokio::spawn(run_worker(command, args, Arc::clone(&waiters), request_rx));
        Self {
            waiters,
            request_tx,
            next_waiter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MetricProxy for ExecProxy {
    async fn scrape(&self, _params: &ScrapeParams) -> Result<Vec<MetricFamily>, ScrapeError> {
        let (result_tx, result_rx) = oneshot::channel();
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        lock_waiters(&self.waiters).insert(id, result_tx);
        let _guard = WaiterGuard {
            id,
            waiters: Arc::clone(&self.waiters),
        };

        // Registration must precede the nudge: were the signal sent first,
        // the worker could run and clear the waiter set before this scrape
        // joins it, and the result would never be delivered.
        match self.request_tx.try_send(()) {
            Ok(()) => debug!("metrics command execution requested"),
            Err(TrySendError::Full(())) => debug!("metrics command execution already pending"),
            Err(TrySendError::Closed(())) => {
                return Err(ScrapeError::Backend {
                    message: "exec worker is gone".to_string(),
                });
            }
        }

        match result_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ScrapeError::Backend {
                message: "exec worker dropped the scrape".to_string(),
            }),
        }
    }
}

/// Removes an abandoned waiter. A waiter that got its result was already
/// taken out of the set by the worker, making this a no-op.
struct WaiterGuard {
    id: u64,
    waiters: Arc<Mutex<WaiterSet>>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        lock_waiters(&self.waiters).remove(&self.id);
    }
}

fn lock_waiters(waiters: &Mutex<WaiterSet>) -> MutexGuard<'_, WaiterSet> {
    waiters.lock().expect("waiter set lock poisoned")
}

async fn run_worker(
    command: String,
    args: Vec<String>,
    waiters: Arc<Mutex<WaiterSet>>,
    mut requests: mpsc::Receiver<()>,
) {
    debug!(command = %command, "exec proxy worker started");
    while requests.recv().await.is_some() {
        if lock_waiters(&waiters).is_empty() {
            // A run triggered by an earlier signal already satisfied this
            // request.
            continue;
        }

        let outcome = run_metrics_command(&command, &args).await;
        if let Err(err) = &outcome {
            error!(command = %command, error = %err, "metrics command execution failed");
        }

        let mut waiters = lock_waiters(&waiters);
        debug!(command = %command, waiters = waiters.len(), "dispatching metrics to waiters");
        for (_, result_tx) in waiters.drain() {
            let _ = result_tx.send(outcome.clone());
        }
    }
}

/// Run the configured command once and decode its stdout. The command is a
/// one-shot metrics emitter, not a daemon: it is killed as soon as its output
/// has been consumed, successful or not, and the child is always reaped.
pub(super) async fn run_metrics_command(
    command: &str,
    args: &[String],
) -> Result<Vec<MetricFamily>, ScrapeError> {
    let mut child = tokio::process::Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| ScrapeError::Backend {
            message: format!("failed to start {command}: {err}"),
        })?;

    let mut stdout = child.stdout.take().ok_or_else(|| ScrapeError::Backend {
        message: format!("{command}: missing stdout pipe"),
    })?;

    let mut output = Vec::new();
    let read = stdout.read_to_end(&mut output).await;

    let killed = child.kill().await;
    let _ = child.wait().await;

    if let Err(err) = killed {
        return Err(ScrapeError::Backend {
            message: format!("failed to kill {command}: {err}"),
        });
    }
    if let Err(err) = read {
        return Err(ScrapeError::Backend {
            message: format!("failed to read {command} output: {err}"),
        });
    }
    exposition::decode(&output)
}
