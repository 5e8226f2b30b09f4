use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::manager::ReservationManager;
use crate::store::StockStore;

/// Config for the background expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirySweeper {
    pub interval: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for ExpirySweeper {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

/// Handle for the running sweeper (shutdown + trigger hook).
///
/// Dropping the handle without calling [`ExpirySweeperHandle::shutdown`] also
/// stops the task, without waiting for it.
#[derive(Debug)]
pub struct ExpirySweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl ExpirySweeperHandle {
    /// Request an immediate sweep.
    ///
    /// Triggers are coalesced (bounded queue). If a sweep is already pending,
    /// this becomes a no-op.
    pub fn trigger(&self) {
        // Coalesce: channel capacity=1; ignore if already full.
        let _ = self.trigger.try_send(());
    }

    /// Stop the sweeper and wait for the in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if e.is_panic() {
                    error!(error = %e, "expiry sweeper panicked");
                }
            }
        }
    }
}

impl ExpirySweeper {
    /// Spawn the sweeper on the current tokio runtime.
    ///
    /// - Schedule: runs once on startup, then every `interval`
    /// - Event-trigger: `handle.trigger()`
    /// - Failures: logged + retried with bounded exponential backoff; never propagate
    pub fn spawn<S, C>(&self, manager: Arc<ReservationManager<S, C>>) -> ExpirySweeperHandle
    where
        S: StockStore + 'static,
        C: Clock + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);

        let join = tokio::spawn(sweeper_loop(
            self.clone(),
            manager,
            shutdown_rx,
            trigger_rx,
        ));

        ExpirySweeperHandle {
            shutdown: Some(shutdown_tx),
            trigger: trigger_tx,
            join: Some(join),
        }
    }
}

async fn sweeper_loop<S, C>(
    cfg: ExpirySweeper,
    manager: Arc<ReservationManager<S, C>>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut trigger_rx: mpsc::Receiver<()>,
) where
    S: StockStore + 'static,
    C: Clock + 'static,
{
    info!(interval_ms = cfg.interval.as_millis() as u64, "expiry sweeper started");

    // First tick completes immediately: run once on startup.
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'outer: loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => {}
            Some(()) = trigger_rx.recv() => {}
        }

        let mut failures: u32 = 0;
        loop {
            match manager.sweep_expired().await {
                Ok(report) if report.expired > 0 || report.purged > 0 || report.failed > 0 => {
                    info!(
                        products_scanned = report.products_scanned,
                        expired = report.expired,
                        purged = report.purged,
                        failed = report.failed,
                        "expiry sweep completed"
                    );
                    break;
                }
                Ok(report) => {
                    debug!(products_scanned = report.products_scanned, "expiry sweep found nothing");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "expiry sweep failed");
                    if failures > cfg.max_retries {
                        break;
                    }
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => break 'outer,
                        _ = tokio::time::sleep(backoff(cfg.base_backoff, failures)) => {}
                    }
                }
            }
        }
    }

    info!("expiry sweeper stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // Exponential backoff: base * 2^(attempt-1), capped.
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
