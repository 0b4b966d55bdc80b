//! Background sampling task
//!
//! Each monitor owns one [`Sampler`]. The task ticks on a fixed interval and
//! exits when told to stop; `stop()` waits for it with a bounded timeout.

use crate::error::{GovernorError, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct RunningTask {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// Owner of one periodic sampling task
pub(crate) struct Sampler {
    name: &'static str,
    interval: Duration,
    stop_timeout: Duration,
    running: Mutex<Option<RunningTask>>,
}

impl Sampler {
    pub(crate) fn new(name: &'static str, interval: Duration, stop_timeout: Duration) -> Self {
        Self {
            name,
            // tokio rejects a zero period
            interval: interval.max(MIN_INTERVAL),
            stop_timeout,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningTask>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the loop on the current tokio runtime
    ///
    /// Returns `Ok(false)` when a loop is already running.
    pub(crate) fn start<F>(&self, mut tick: F) -> Result<bool>
    where
        F: FnMut() + Send + 'static,
    {
        let mut running = self.running();
        if let Some(existing) = running.as_ref() {
            if !existing.task.is_finished() {
                return Ok(false);
            }
        }

        let handle = Handle::try_current().map_err(|_| GovernorError::NoRuntime)?;
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let name = self.name;
        let period = self.interval;

        let task = handle.spawn(async move {
            info!(
                monitor = name,
                interval_ms = period.as_millis() as u64,
                "Starting sampling loop"
            );

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick();
                    }
                    _ = shutdown_rx.recv() => {
                        info!(monitor = name, "Shutting down sampling loop");
                        break;
                    }
                }
            }
        });

        *running = Some(RunningTask { shutdown, task });
        Ok(true)
    }

    /// Signal the loop and wait up to the stop timeout for it to exit
    ///
    /// Returns `false` when nothing was running.
    pub(crate) async fn stop(&self) -> bool {
        let running = self.running().take();
        let Some(RunningTask { shutdown, task }) = running else {
            return false;
        };

        let _ = shutdown.send(());

        match tokio::time::timeout(self.stop_timeout, task).await {
            Ok(Ok(())) => debug!(monitor = self.name, "Sampling loop stopped"),
            Ok(Err(e)) => warn!(monitor = self.name, error = %e, "Sampling loop ended abnormally"),
            Err(_) => warn!(
                monitor = self.name,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "Sampling loop did not stop within timeout"
            ),
        }

        true
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .map(|running| !running.task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(RunningTask { shutdown, task }) = running {
            let _ = shutdown.send(());
            task.abort();
        }
    }
}
