//! One scheduler for every periodic job of the pipeline.
//!
//! Jobs run on tokio intervals and stop together when [`Scheduler::stop`]
//! cancels the shared token. A tick that overruns its period delays the next
//! tick rather than bursting to catch up.

use std::future::Future;

use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Named periodic jobs sharing one lifecycle.
#[derive(Debug, Default)]
pub struct Scheduler {
    shutdown: CancellationToken,
    tasks: TaskTracker,
    jobs: Vec<&'static str>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `job` every `period`, first after `initial_delay`.
    ///
    /// A zero `period` is raised to one millisecond. Must be called from
    /// within a tokio runtime.
    pub fn every<F, Fut>(&mut self, name: &'static str, initial_delay: Duration, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let shutdown = self.shutdown.clone();
        self.jobs.push(name);
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(job = name, period_ms = period.as_millis() as u64, "scheduled job started");
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => job().await,
                }
            }
            tracing::debug!(job = name, "scheduled job stopped");
        });
    }

    /// Names of the registered jobs, in registration order.
    pub fn job_names(&self) -> &[&'static str] {
        &self.jobs
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancels every job and waits for running ticks to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::debug!(jobs = self.jobs.len(), "scheduler stopped");
    }
}
