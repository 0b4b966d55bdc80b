//! Memory monitoring
//!
//! Samples process and host memory on a background loop, classifies pressure
//! against the configured thresholds, reports growth trends, flags suspected
//! leaks, and requests a reclamation pass whenever a sample crosses the GC
//! trigger threshold.

use super::sampler::Sampler;
use super::trend::{summarize, Trend, TrendDirection};
use crate::config::{GovernorConfig, MemoryThresholds};
use crate::error::Result;
use crate::history::BoundedHistory;
use crate::models::{bytes_to_mb, MemorySnapshot, PressureLevel, ResourcePressure};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::probe::{Reclaimer, SystemProbe};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Growth below this rate (MB/minute) is reported as a stable trend
const STABLE_BAND_MB_PER_MIN: f64 = 1.0;

/// Fraction of non-decreasing sample pairs that counts as sustained growth
const SUSTAINED_GROWTH_FRACTION: f64 = 0.8;

/// Suspected memory leak details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLeak {
    pub growth_rate_mb_per_min: f64,
    /// Rate that had to be exceeded (threshold / window)
    pub threshold_rate_mb_per_min: f64,
    pub peak_mb: f64,
    pub current_mb: f64,
    pub samples: usize,
}

struct MemoryState {
    probe: Arc<dyn SystemProbe>,
    reclaimer: Arc<dyn Reclaimer>,
    thresholds: MemoryThresholds,
    history: Mutex<BoundedHistory<MemorySnapshot>>,
    last_level: Mutex<PressureLevel>,
    reclaim_in_flight: Arc<AtomicBool>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
}

impl MemoryState {
    fn history(&self) -> MutexGuard<'_, BoundedHistory<MemorySnapshot>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_snapshot(&self, context: Option<String>) -> MemorySnapshot {
        let timestamp = Utc::now();
        match self.probe.memory() {
            Ok(reading) => MemorySnapshot {
                timestamp,
                rss_mb: bytes_to_mb(reading.rss_bytes),
                vms_mb: bytes_to_mb(reading.virtual_bytes),
                percent: reading.host_used_percent,
                available_mb: bytes_to_mb(reading.host_available_bytes),
                thread_id: Some(format!("{:?}", std::thread::current().id())),
                context,
            },
            Err(e) => {
                debug!(error = %e, "Memory read failed, using zeroed snapshot");
                self.metrics.inc_sampling_errors("memory");
                MemorySnapshot {
                    context,
                    ..MemorySnapshot::zeroed(timestamp)
                }
            }
        }
    }

    /// One background tick: sample, record, publish, reclaim if needed
    fn sample(&self) -> MemorySnapshot {
        let snapshot = self.take_snapshot(None);
        self.history().push(snapshot.clone());

        let level = self.thresholds.classify(snapshot.rss_mb);
        self.metrics.set_memory(snapshot.rss_mb, snapshot.percent);
        self.metrics.set_pressure("memory", level);

        {
            let mut last = self.last_level.lock().unwrap_or_else(PoisonError::into_inner);
            if *last != level {
                self.logger
                    .log_pressure_change("memory", *last, level, snapshot.rss_mb);
                *last = level;
            }
        }

        if snapshot.rss_mb >= self.thresholds.gc_trigger_mb {
            self.request_reclaim();
        }

        snapshot
    }

    /// Run a reclamation pass off the sampling task; failures are swallowed
    fn request_reclaim(&self) -> bool {
        if self.reclaim_in_flight.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.metrics.inc_memory_reclaims();
        let reclaimer = self.reclaimer.clone();
        let in_flight = self.reclaim_in_flight.clone();
        let job = move || {
            if let Err(e) = reclaimer.reclaim() {
                debug!(error = %e, "Memory reclamation failed");
            }
            in_flight.store(false, Ordering::SeqCst);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }
        true
    }
}

/// Periodic memory sampler with pressure, trend and leak analysis
pub struct MemoryMonitor {
    state: Arc<MemoryState>,
    sampler: Sampler,
}

impl MemoryMonitor {
    pub fn new(
        probe: Arc<dyn SystemProbe>,
        reclaimer: Arc<dyn Reclaimer>,
        config: &GovernorConfig,
    ) -> Self {
        Self {
            state: Arc::new(MemoryState {
                probe,
                reclaimer,
                thresholds: config.memory_thresholds.clone(),
                history: Mutex::new(BoundedHistory::new(config.history_size)),
                last_level: Mutex::new(PressureLevel::None),
                reclaim_in_flight: Arc::new(AtomicBool::new(false)),
                metrics: GovernorMetrics::new(),
                logger: StructuredLogger::new("memory_monitor"),
            }),
            sampler: Sampler::new("memory", config.sampling_interval(), config.stop_timeout()),
        }
    }

    /// Start background sampling; a no-op returning `Ok(false)` if already running
    pub fn start(&self) -> Result<bool> {
        let state = self.state.clone();
        self.sampler.start(move || {
            state.sample();
        })
    }

    /// Stop background sampling; a no-op returning `false` if not running
    pub async fn stop(&self) -> bool {
        self.sampler.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.sampler.is_running()
    }

    /// Fresh on-demand reading; zeroed if the probe fails
    pub fn snapshot(&self) -> MemorySnapshot {
        self.state.take_snapshot(None)
    }

    pub fn snapshot_with_context(&self, context: impl Into<String>) -> MemorySnapshot {
        self.state.take_snapshot(Some(context.into()))
    }

    /// Take a sample exactly as the background loop does
    pub fn sample(&self) -> MemorySnapshot {
        self.state.sample()
    }

    /// Append an externally produced snapshot to the history
    pub fn record(&self, snapshot: MemorySnapshot) {
        self.state.history().push(snapshot);
    }

    pub fn latest(&self) -> Option<MemorySnapshot> {
        self.state.history().latest().cloned()
    }

    /// Copy of the history, oldest first
    pub fn history(&self) -> Vec<MemorySnapshot> {
        self.state.history().to_vec()
    }

    pub fn thresholds(&self) -> &MemoryThresholds {
        &self.state.thresholds
    }

    /// Classify a snapshot against the configured thresholds
    pub fn classify(&self, snapshot: &MemorySnapshot) -> ResourcePressure {
        let level = self.state.thresholds.classify(snapshot.rss_mb);
        ResourcePressure::from_memory(snapshot, level)
    }

    /// Pressure verdict for a fresh on-demand snapshot
    pub fn current_pressure(&self) -> ResourcePressure {
        self.classify(&self.snapshot())
    }

    /// RSS growth rate, peak and average over the trailing window
    pub fn trend(&self, window: Duration) -> Trend {
        let points: Vec<_> = self
            .state
            .history()
            .iter()
            .map(|s| (s.timestamp, s.rss_mb))
            .collect();
        summarize(&points, window, STABLE_BAND_MB_PER_MIN)
    }

    /// Heuristic leak check
    ///
    /// Flags a leak when growth over the window is sustained, faster than
    /// `threshold_mb / window`, and the peak exceeds the "high" threshold.
    pub fn detect_leak(&self, threshold_mb: f64, window: Duration) -> Option<MemoryLeak> {
        let window_minutes = window.as_secs_f64() / 60.0;
        if window_minutes <= 0.0 {
            return None;
        }

        let trend = self.trend(window);
        let summary = trend.summary()?;

        let sustained = summary.direction == TrendDirection::Increasing
            && summary.monotonicity >= SUSTAINED_GROWTH_FRACTION;
        if !sustained {
            return None;
        }

        let threshold_rate = threshold_mb / window_minutes;
        if summary.growth_rate_per_minute <= threshold_rate {
            return None;
        }

        if summary.peak <= self.state.thresholds.high_mb {
            return None;
        }

        let leak = MemoryLeak {
            growth_rate_mb_per_min: summary.growth_rate_per_minute,
            threshold_rate_mb_per_min: threshold_rate,
            peak_mb: summary.peak,
            current_mb: summary.current,
            samples: summary.samples,
        };
        self.state
            .logger
            .log_leak_suspected(leak.growth_rate_mb_per_min, leak.peak_mb, leak.samples);
        Some(leak)
    }

    /// Request a reclamation pass without waiting for it
    ///
    /// Returns `false` if one is already in flight.
    pub fn request_reclaim(&self) -> bool {
        self.state.request_reclaim()
    }

    /// Run a reclamation pass on the calling thread
    pub fn reclaim_now(&self) -> anyhow::Result<()> {
        self.state.metrics.inc_memory_reclaims();
        self.state.reclaimer.reclaim()
    }
}
