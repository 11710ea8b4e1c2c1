//! Scheduler driving the sync worker
//!
//! Two modes:
//! - **One-shot**: one run, then a short grace period so log and event
//!   consumers can drain before the process exits.
//! - **Continuous**: one run immediately, then one per interval until
//!   shutdown. Ticks are fire-and-forget: each spawns its own task and never
//!   waits for the previous run. Overlap is handled by the worker's
//!   single-flight guard, which rejects the late tick with a warning.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::model::Priority;
use crate::worker::{SyncWorker, WorkOutcome};

pub struct Scheduler {
    worker: Arc<SyncWorker>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(worker: Arc<SyncWorker>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { worker, config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the worker once and wait for it
    ///
    /// The grace period is observed whatever the outcome.
    pub async fn run_once(&self) -> Result<WorkOutcome> {
        let result = self.worker.work(self.config.priority).await;

        match &result {
            Ok(WorkOutcome::Completed(summary)) => {
                info!(run = summary.run, mutations = summary.mutations(), "One-shot run completed");
            }
            Ok(WorkOutcome::AlreadyRunning) => {
                warn!("One-shot run rejected, another run is in progress");
            }
            Err(e) => {
                error!("One-shot run failed: {}", e);
            }
        }

        let grace = self.config.flush_grace();
        if !grace.is_zero() {
            debug!(grace_secs = grace.as_secs(), "Waiting for telemetry to flush");
            tokio::time::sleep(grace).await;
        }

        result
    }

    /// Run on the configured interval until Ctrl-C
    pub async fn run_continuous(&self) -> Result<()> {
        self.run_continuous_internal(None).await
    }

    /// Run on the configured interval until `shutdown_rx` fires
    ///
    /// Runs already in flight are awaited before returning.
    pub async fn run_continuous_with_shutdown(&self, shutdown_rx: oneshot::Receiver<()>) -> Result<()> {
        self.run_continuous_internal(Some(shutdown_rx)).await
    }

    async fn run_continuous_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let period = self.config.interval();
        info!(interval_secs = period.as_secs(), priority = %self.config.priority, "Continuous scheduling started");

        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = IntervalStream::new(timer);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    let worker = Arc::clone(&self.worker);
                    let priority = self.config.priority;
                    in_flight.spawn(run_tick(worker, priority));
                }

                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}

                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        if !in_flight.is_empty() {
            info!(runs = in_flight.len(), "Waiting for in-flight runs to finish");
        }
        while in_flight.join_next().await.is_some() {}

        info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_tick(worker: Arc<SyncWorker>, priority: Priority) {
    match worker.work(priority).await {
        Ok(WorkOutcome::Completed(summary)) => {
            debug!(run = summary.run, "Scheduled run completed");
        }
        Ok(WorkOutcome::AlreadyRunning) => {
            warn!("Previous run still in progress, tick rejected");
        }
        Err(e) => {
            error!("Scheduled run failed: {}", e);
        }
    }
}
