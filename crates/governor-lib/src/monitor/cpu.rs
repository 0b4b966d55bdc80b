//! CPU monitoring
//!
//! Samples host CPU utilization and load average on a background loop,
//! classifies pressure, and offers a cheap load-only thread-count estimate.

use super::sampler::Sampler;
use super::trend::{summarize, Trend};
use crate::config::{CpuThresholds, GovernorConfig};
use crate::error::Result;
use crate::history::BoundedHistory;
use crate::models::{CpuSnapshot, PressureLevel};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::probe::SystemProbe;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Rates below this (percent/minute) are reported as a stable trend
const STABLE_BAND_PERCENT_PER_MIN: f64 = 1.0;

/// Ceiling of the estimate on an idle host
const IDLE_THREAD_CEILING: usize = 8;

/// Ceiling of the estimate on a moderately loaded host
const BUSY_THREAD_CEILING: usize = 4;

/// Load-only thread estimate for a given host CPU percentage
///
/// - below 30%: up to 8 threads
/// - below 60%: up to the physical core count, at most 4
/// - below 80%: half the physical cores, between 1 and 2
/// - otherwise: 1
///
/// The result is always within `1..=logical_cores`.
pub fn estimate_thread_count(cpu_percent: f64, logical_cores: usize, physical_cores: usize) -> usize {
    let logical = logical_cores.max(1);
    let physical = physical_cores.clamp(1, logical);

    let estimate = if cpu_percent < 30.0 {
        IDLE_THREAD_CEILING
    } else if cpu_percent < 60.0 {
        physical.min(BUSY_THREAD_CEILING)
    } else if cpu_percent < 80.0 {
        (physical / 2).clamp(1, 2)
    } else {
        1
    };

    estimate.clamp(1, logical)
}

struct CpuState {
    probe: Arc<dyn SystemProbe>,
    thresholds: CpuThresholds,
    history: Mutex<BoundedHistory<CpuSnapshot>>,
    last_level: Mutex<PressureLevel>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
}

impl CpuState {
    fn history(&self) -> MutexGuard<'_, BoundedHistory<CpuSnapshot>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_snapshot(&self, context: Option<String>) -> CpuSnapshot {
        let timestamp = Utc::now();
        let logical_cores = self.probe.logical_cores();
        match self.probe.cpu() {
            Ok(reading) => CpuSnapshot {
                timestamp,
                percent: reading.host_percent,
                process_percent: reading.process_percent,
                load_average: reading.load_average,
                logical_cores,
                context,
            },
            Err(e) => {
                debug!(error = %e, "CPU read failed, using zeroed snapshot");
                self.metrics.inc_sampling_errors("cpu");
                CpuSnapshot {
                    context,
                    ..CpuSnapshot::zeroed(timestamp, logical_cores)
                }
            }
        }
    }

    fn sample(&self) -> CpuSnapshot {
        let snapshot = self.take_snapshot(None);
        self.history().push(snapshot.clone());

        let level = self.thresholds.classify(snapshot.percent);
        self.metrics.set_cpu(snapshot.percent);
        self.metrics.set_pressure("cpu", level);

        let mut last = self.last_level.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != level {
            self.logger
                .log_pressure_change("cpu", *last, level, snapshot.percent);
            *last = level;
        }

        snapshot
    }
}

/// Periodic CPU sampler
pub struct CpuMonitor {
    state: Arc<CpuState>,
    sampler: Sampler,
}

impl CpuMonitor {
    pub fn new(probe: Arc<dyn SystemProbe>, config: &GovernorConfig) -> Self {
        Self {
            state: Arc::new(CpuState {
                probe,
                thresholds: config.cpu_thresholds.clone(),
                history: Mutex::new(BoundedHistory::new(config.history_size)),
                last_level: Mutex::new(PressureLevel::None),
                metrics: GovernorMetrics::new(),
                logger: StructuredLogger::new("cpu_monitor"),
            }),
            sampler: Sampler::new("cpu", config.sampling_interval(), config.stop_timeout()),
        }
    }

    pub fn start(&self) -> Result<bool> {
        let state = self.state.clone();
        self.sampler.start(move || {
            state.sample();
        })
    }

    pub async fn stop(&self) -> bool {
        self.sampler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_running()
    }

    pub fn snapshot(&self) -> CpuSnapshot {
        self.state.take_snapshot(None)
    }

    pub fn snapshot_with_context(&self, context: impl Into<String>) -> CpuSnapshot {
        self.state.take_snapshot(Some(context.into()))
    }

    pub fn sample(&self) -> CpuSnapshot {
        self.state.sample()
    }

    pub fn record(&self, snapshot: CpuSnapshot) {
        self.state.history().push(snapshot);
    }

    pub fn latest(&self) -> Option<CpuSnapshot> {
        self.state.history().latest().cloned()
    }

    pub fn history(&self) -> Vec<CpuSnapshot> {
        self.state.history().to_vec()
    }

    pub fn thresholds(&self) -> &CpuThresholds {
        &self.state.thresholds
    }

    pub fn logical_cores(&self) -> usize {
        self.state.probe.logical_cores()
    }

    pub fn physical_cores(&self) -> usize {
        self.state.probe.physical_cores()
    }

    pub fn classify(&self, snapshot: &CpuSnapshot) -> PressureLevel {
        self.state.thresholds.classify(snapshot.percent)
    }

    /// Pressure level for a fresh on-demand snapshot
    pub fn current_pressure(&self) -> PressureLevel {
        self.classify(&self.snapshot())
    }

    /// Host CPU growth rate, peak and average over the trailing window
    pub fn trend(&self, window: Duration) -> Trend {
        let points: Vec<_> = self
            .state
            .history()
            .iter()
            .map(|s| (s.timestamp, s.percent))
            .collect();
        summarize(&points, window, STABLE_BAND_PERCENT_PER_MIN)
    }

    /// Thread count suggested by current CPU load alone
    pub fn estimate_optimal_thread_count(&self) -> usize {
        let snapshot = self.snapshot();
        estimate_thread_count(
            snapshot.percent,
            self.logical_cores(),
            self.physical_cores(),
        )
    }
}
