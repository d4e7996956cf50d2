//! Background sweeps driven by tokio timers.

use crate::application::service::LoanService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A job run on a fixed period until stopped.
///
/// Ticks missed while a run is still in progress are skipped rather than
/// queued, so runs of the same task never overlap.
pub struct PeriodicTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(
        name: &'static str,
        initial_delay: Duration,
        period: Duration,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!(task = name, "periodic task tick");
                        job().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "periodic task exited");
        });
        info!(task = name, ?initial_delay, ?period, "periodic task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals the task and waits for the current run, if any, to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "periodic task ended abnormally");
        }
        info!(task = self.name, "periodic task stopped");
    }
}

/// The overdue sweep and the scheduled-payment sweep.
pub struct BackgroundSweeps {
    overdue: PeriodicTask,
    payments: PeriodicTask,
}

impl BackgroundSweeps {
    pub fn start(service: Arc<LoanService>) -> Self {
        let config = service.config().clone();

        let overdue_service = Arc::clone(&service);
        let overdue = PeriodicTask::spawn(
            "overdue-sweep",
            to_std(config.overdue.initial_delay()),
            to_std(config.overdue.sweep_interval()),
            move || {
                let service = Arc::clone(&overdue_service);
                async move {
                    if let Err(e) = service.run_overdue_sweep().await {
                        warn!(error = %e, "overdue sweep failed");
                    }
                }
            },
        );

        let payments = PeriodicTask::spawn(
            "payment-sweep",
            Duration::ZERO,
            to_std(config.payments.sweep_interval()),
            move || {
                let service = Arc::clone(&service);
                async move {
                    if let Err(e) = service.run_payment_sweep().await {
                        warn!(error = %e, "payment sweep failed");
                    }
                }
            },
        );

        Self { overdue, payments }
    }

    pub fn is_running(&self) -> bool {
        self.overdue.is_running() && self.payments.is_running()
    }

    pub async fn stop(self) {
        self.overdue.stop().await;
        self.payments.stop().await;
    }
}

fn to_std(duration: chrono::Duration) -> Duration {
    duration.to_std().unwrap_or(Duration::ZERO)
}
