//! Resource manager facade
//!
//! Owns both monitors, the thread adjuster and the benchmarker, and exposes
//! the handful of calls a pipeline driver needs between and around stages.

use crate::adjuster::{AdaptiveThreadAdjuster, AdjustmentReason};
use crate::benchmark::{BenchmarkAnalysis, PerformanceBenchmarker};
use crate::config::GovernorConfig;
use crate::error::Result;
use crate::health::{components, ComponentHealth, ComponentStatus, HealthResponse, ReadinessResponse};
use crate::models::{
    AdjustmentContext, AdjustmentRecord, BenchmarkResult, CpuSnapshot, MemorySnapshot,
    ResourcePressure,
};
use crate::monitor::{estimate_thread_count, CpuMonitor, MemoryLeak, MemoryMonitor, Trend};
use crate::observability::{GovernorMetrics, StructuredLogger};
use crate::probe::{default_probe, HeapTrimReclaimer, Reclaimer, SystemProbe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Window used for the trend summaries in [`StatusSnapshot`]
const STATUS_TREND_WINDOW: Duration = Duration::from_secs(300);

/// Minimum reclaimed memory for a cleanup to count as effective
const EFFECTIVE_CLEANUP_MB: f64 = 10.0;

/// Aggregated, read-only view of the governor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub running: bool,
    pub pressure: ResourcePressure,
    pub memory: MemorySnapshot,
    pub cpu: CpuSnapshot,
    pub memory_trend: Trend,
    pub cpu_trend: Trend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_leak: Option<MemoryLeak>,
    /// Thread count suggested by CPU load alone
    pub estimated_threads: usize,
    /// Fastest thread count measured so far, once enough samples exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_measured_threads: Option<usize>,
    pub min_threads: usize,
    pub max_threads: usize,
    pub adjustments: usize,
}

/// Outcome of an explicit cleanup request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub before_mb: f64,
    pub after_mb: f64,
    pub freed_mb: f64,
    pub effective: bool,
}

/// Results of a benchmark sweep together with their analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub results: Vec<BenchmarkResult>,
    pub analysis: BenchmarkAnalysis,
}

/// Builder for [`ResourceManager`]
#[derive(Default)]
pub struct ResourceManagerBuilder {
    config: Option<GovernorConfig>,
    probe: Option<Arc<dyn SystemProbe>>,
    reclaimer: Option<Arc<dyn Reclaimer>>,
}

impl ResourceManagerBuilder {
    pub fn config(mut self, config: GovernorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn reclaimer(mut self, reclaimer: Arc<dyn Reclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Validate the configuration and wire the components together
    pub fn build(self) -> Result<ResourceManager> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let probe = self.probe.unwrap_or_else(default_probe);
        let reclaimer: Arc<dyn Reclaimer> = match self.reclaimer {
            Some(reclaimer) => reclaimer,
            None => Arc::new(HeapTrimReclaimer),
        };

        let memory = Arc::new(MemoryMonitor::new(probe.clone(), reclaimer, &config));
        let cpu = Arc::new(CpuMonitor::new(probe, &config));
        let adjuster = AdaptiveThreadAdjuster::new(memory.clone(), cpu.clone(), &config);
        let benchmarker = PerformanceBenchmarker::new(memory.clone(), cpu.clone(), &config);

        Ok(ResourceManager {
            config,
            memory,
            cpu,
            adjuster,
            benchmarker,
            metrics: GovernorMetrics::new(),
            logger: StructuredLogger::new("resource_manager"),
        })
    }
}

/// Entry point for pipeline drivers
pub struct ResourceManager {
    config: GovernorConfig,
    memory: Arc<MemoryMonitor>,
    cpu: Arc<CpuMonitor>,
    adjuster: AdaptiveThreadAdjuster,
    benchmarker: PerformanceBenchmarker,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("running", &self.is_running())
            .field("min_threads", &self.adjuster.min_threads())
            .field("max_threads", &self.adjuster.max_threads())
            .finish()
    }
}

impl ResourceManager {
    pub fn builder() -> ResourceManagerBuilder {
        ResourceManagerBuilder::default()
    }

    /// Manager over the host's real telemetry
    pub fn new(config: GovernorConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Start both sampling loops; `Ok(false)` if they were already running
    pub fn start(&self) -> Result<bool> {
        let memory_started = self.memory.start()?;
        let cpu_started = self.cpu.start()?;
        let started = memory_started || cpu_started;
        if started {
            self.logger
                .log_startup(env!("CARGO_PKG_VERSION"), self.adjuster.max_threads());
        }
        Ok(started)
    }

    /// Stop both sampling loops; `false` if neither was running
    pub async fn stop(&self) -> bool {
        let memory_stopped = self.memory.stop().await;
        let cpu_stopped = self.cpu.stop().await;
        let stopped = memory_stopped || cpu_stopped;
        if stopped {
            self.logger.log_shutdown("stop_requested");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.memory.is_running() && self.cpu.is_running()
    }

    /// Thread count for the next parallel stage
    pub fn optimize_thread_count(
        &self,
        current_threads: usize,
        context: &AdjustmentContext,
    ) -> (usize, AdjustmentReason) {
        self.adjuster.recommend(current_threads, context)
    }

    /// Combined verdict; the worse of the two levels drives the action
    pub fn current_pressure(&self) -> ResourcePressure {
        let cpu = self.cpu.snapshot();
        let cpu_level = self.cpu.classify(&cpu);
        self.memory.current_pressure().with_cpu(cpu_level, cpu.percent)
    }

    /// Leak check with the configured threshold and window
    pub fn detect_leak(&self) -> Option<MemoryLeak> {
        self.memory
            .detect_leak(self.config.leak_threshold_mb, self.config.leak_window())
    }

    pub fn status(&self) -> StatusSnapshot {
        let memory = self.memory.snapshot();
        let cpu = self.cpu.snapshot();
        let memory_pressure = self.memory.classify(&memory);
        let cpu_level = self.cpu.classify(&cpu);

        StatusSnapshot {
            timestamp: Utc::now(),
            running: self.is_running(),
            pressure: memory_pressure.with_cpu(cpu_level, cpu.percent),
            estimated_threads: estimate_thread_count(
                cpu.percent,
                self.cpu.logical_cores(),
                self.cpu.physical_cores(),
            ),
            memory,
            cpu,
            memory_trend: self.memory.trend(STATUS_TREND_WINDOW),
            cpu_trend: self.cpu.trend(STATUS_TREND_WINDOW),
            memory_leak: self.detect_leak(),
            best_measured_threads: self.adjuster.best_thread_count(),
            min_threads: self.adjuster.min_threads(),
            max_threads: self.adjuster.max_threads(),
            adjustments: self.adjuster.adjustment_count(),
        }
    }

    /// Per-monitor health derived from current pressure
    pub fn health(&self) -> HealthResponse {
        let memory = self.memory.current_pressure();
        let cpu = self.cpu.snapshot();
        let cpu_level = self.cpu.classify(&cpu);

        let mut health = HashMap::new();
        health.insert(
            components::MEMORY_MONITOR.to_string(),
            ComponentHealth::from_pressure(
                memory.memory_pressure,
                format!("rss {:.0} MB", memory.memory_usage_mb),
            ),
        );
        health.insert(
            components::CPU_MONITOR.to_string(),
            ComponentHealth::from_pressure(cpu_level, format!("cpu {:.1}%", cpu.percent)),
        );
        HealthResponse::new(health)
    }

    /// False only when a monitor reports critical pressure
    pub fn is_healthy(&self) -> bool {
        self.health().status != ComponentStatus::Unhealthy
    }

    pub fn readiness(&self) -> ReadinessResponse {
        if !self.is_running() {
            ReadinessResponse::not_ready("Background sampling not running")
        } else if !self.is_healthy() {
            ReadinessResponse::not_ready("Critical resource pressure")
        } else {
            ReadinessResponse::ready()
        }
    }

    /// Run a reclamation pass now and report what it freed
    pub fn trigger_cleanup(&self) -> CleanupResult {
        let before_mb = self.memory.snapshot_with_context("cleanup").rss_mb;
        if let Err(e) = self.memory.reclaim_now() {
            debug!(error = %e, "Explicit memory reclamation failed");
        }
        let after_mb = self.memory.snapshot_with_context("cleanup").rss_mb;

        let freed_mb = before_mb - after_mb;
        let effective = freed_mb > EFFECTIVE_CLEANUP_MB;
        self.logger.log_cleanup(before_mb, after_mb, effective);

        CleanupResult {
            before_mb,
            after_mb,
            freed_mb,
            effective,
        }
    }

    /// Report how long a stage took at a given thread count
    pub fn record_performance(&self, thread_count: usize, execution_time: Duration) {
        self.adjuster.record_performance(thread_count, execution_time);
    }

    /// Combined pressure for an already captured memory reading
    fn pressure_with(&self, memory: &MemorySnapshot) -> ResourcePressure {
        let cpu = self.cpu.snapshot();
        let cpu_level = self.cpu.classify(&cpu);
        self.memory.classify(memory).with_cpu(cpu_level, cpu.percent)
    }

    /// Start timing a stage; the returned guard records when dropped
    pub fn begin_execution(&self, name: impl Into<String>, threads: usize) -> ExecutionGuard<'_> {
        let name = name.into();
        let memory_before = self.memory.snapshot_with_context(name.clone());
        let pressure_before = self.pressure_with(&memory_before);
        debug!(
            stage = %name,
            threads,
            rss_mb = pressure_before.memory_usage_mb,
            cpu_percent = pressure_before.cpu_percent,
            pressure = %pressure_before.worst_level(),
            "Monitored stage starting"
        );

        ExecutionGuard {
            manager: self,
            name,
            threads,
            started: Instant::now(),
            pressure_before,
            outcome: ExecutionOutcome::Completed,
        }
    }

    /// Time `body` and feed the result back into the adjuster
    ///
    /// The outcome of `body` is returned unchanged. Timing is recorded on
    /// every exit path, including cancellation of the returned future.
    pub async fn monitor_execution<F, T, E>(
        &self,
        name: impl Into<String>,
        threads: usize,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        let mut guard = self.begin_execution(name, threads);
        guard.outcome = ExecutionOutcome::Cancelled;
        let result = body.await;
        guard.outcome = if result.is_ok() {
            ExecutionOutcome::Completed
        } else {
            ExecutionOutcome::Failed
        };
        drop(guard);
        result
    }

    /// Blocking counterpart of [`monitor_execution`](Self::monitor_execution)
    ///
    /// Panics in `body` propagate after timing is recorded.
    pub fn monitor_execution_blocking<F, T, E>(
        &self,
        name: impl Into<String>,
        threads: usize,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let mut guard = self.begin_execution(name, threads);
        let result = body();
        if result.is_err() {
            guard.mark_failed();
        }
        drop(guard);
        result
    }

    /// Benchmark a workload and teach the adjuster from the successful runs
    ///
    /// Without `max_threads` the sweep stops at the adjuster's upper bound.
    pub fn run_benchmark<F, E>(
        &self,
        benchmark: F,
        baseline_threads: usize,
        max_threads: Option<usize>,
    ) -> BenchmarkReport
    where
        F: FnMut(usize) -> std::result::Result<Duration, E>,
        E: fmt::Display,
    {
        let max_threads = max_threads.unwrap_or_else(|| self.adjuster.max_threads());
        let results = self
            .benchmarker
            .run_suite(benchmark, baseline_threads, Some(max_threads));

        for result in results.iter().filter(|r| r.success) {
            self.adjuster.record_performance(
                result.thread_count,
                Duration::from_secs_f64(result.execution_time_secs.max(0.0)),
            );
        }

        let analysis = self.benchmarker.analyze(&results);
        BenchmarkReport { results, analysis }
    }

    pub fn adjustment_history(&self) -> Vec<AdjustmentRecord> {
        self.adjuster.adjustment_history()
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn memory_monitor(&self) -> &MemoryMonitor {
        &self.memory
    }

    pub fn cpu_monitor(&self) -> &CpuMonitor {
        &self.cpu
    }

    pub fn adjuster(&self) -> &AdaptiveThreadAdjuster {
        &self.adjuster
    }

    pub fn benchmarker(&self) -> &PerformanceBenchmarker {
        &self.benchmarker
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed => "completed",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Times one stage; records elapsed time against its thread count on drop
pub struct ExecutionGuard<'a> {
    manager: &'a ResourceManager,
    name: String,
    threads: usize,
    started: Instant,
    pressure_before: ResourcePressure,
    outcome: ExecutionOutcome,
}

impl ExecutionGuard<'_> {
    /// Record this execution as failed
    pub fn mark_failed(&mut self) {
        self.outcome = ExecutionOutcome::Failed;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Pressure captured when the stage started
    pub fn pressure_before(&self) -> &ResourcePressure {
        &self.pressure_before
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let manager = self.manager;

        manager.adjuster.record_performance(self.threads, elapsed);
        manager
            .metrics
            .observe_stage_duration(&self.name, elapsed.as_secs_f64());

        let memory_after = manager.memory.snapshot_with_context(self.name.clone());
        let pressure_after = manager.pressure_with(&memory_after);
        let outcome = if std::thread::panicking() {
            "panicked"
        } else {
            self.outcome.as_str()
        };
        manager.logger.log_execution(
            &self.name,
            self.threads,
            elapsed.as_secs_f64(),
            &self.pressure_before,
            &pressure_after,
            outcome,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernorError;
    use crate::models::PressureLevel;
    use crate::probe::{CallbackReclaimer, FixedProbe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager_with(probe: Arc<FixedProbe>) -> ResourceManager {
        ResourceManager::builder()
            .probe(probe)
            .reclaimer(Arc::new(HeapTrimReclaimer))
            .build()
            .unwrap()
    }

    fn neutral_probe() -> Arc<FixedProbe> {
        let probe = Arc::new(FixedProbe::new(16, 8));
        probe.set_rss_mb(500.0);
        probe.set_cpu_percent(20.0);
        probe
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GovernorConfig {
            min_threads: 4,
            max_threads: 2,
            ..Default::default()
        };
        let err = ResourceManager::builder()
            .config(config)
            .probe(neutral_probe())
            .build()
            .unwrap_err();
        assert!(matches!(err, GovernorError::InvalidConfig(_)));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let manager = manager_with(neutral_probe());
        assert!(matches!(manager.start(), Err(GovernorError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let config = GovernorConfig {
            sampling_interval_secs: 0.01,
            ..Default::default()
        };
        let manager = ResourceManager::builder()
            .config(config)
            .probe(neutral_probe())
            .build()
            .unwrap();

        assert!(manager.start().unwrap());
        assert!(!manager.start().unwrap());
        assert!(manager.is_running());
        assert!(manager.readiness().ready);

        assert!(manager.stop().await);
        assert!(!manager.stop().await);
        assert!(!manager.is_running());
        assert!(!manager.readiness().ready);
    }

    #[test]
    fn test_combined_pressure_and_health() {
        let probe = neutral_probe();
        let manager = manager_with(probe.clone());

        assert!(manager.is_healthy());
        assert_eq!(manager.health().status, ComponentStatus::Healthy);

        probe.set_cpu_percent(88.0);
        let pressure = manager.current_pressure();
        assert_eq!(pressure.cpu_pressure, PressureLevel::High);
        assert_eq!(pressure.thread_delta, -2);
        assert_eq!(manager.health().status, ComponentStatus::Degraded);
        assert!(manager.is_healthy());

        probe.set_rss_mb(3700.0);
        assert_eq!(manager.health().status, ComponentStatus::Unhealthy);
        assert!(!manager.is_healthy());
    }

    #[test]
    fn test_status_aggregates_monitors() {
        let probe = neutral_probe();
        let manager = manager_with(probe.clone());
        manager.memory_monitor().sample();
        manager.cpu_monitor().sample();

        let status = manager.status();
        assert!(!status.running);
        assert_eq!(status.pressure.memory_pressure, PressureLevel::None);
        assert_eq!(status.estimated_threads, 8);
        assert_eq!((status.min_threads, status.max_threads), (1, 8));
        assert!(status.memory_leak.is_none());
        assert_eq!(status.memory_trend, Trend::InsufficientData { samples: 1 });

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pressure"]["recommended_action"], "continue");
        assert_eq!(json["memory_trend"]["status"], "insufficient_data");
    }

    #[test]
    fn test_monitor_execution_blocking_records_and_passes_error_through() {
        let manager = manager_with(neutral_probe());

        let ok: std::result::Result<u32, String> =
            manager.monitor_execution_blocking("load", 4, || Ok(7));
        assert_eq!(ok, Ok(7));

        let err: std::result::Result<u32, String> =
            manager.monitor_execution_blocking("load", 4, || Err("disk full".to_string()));
        assert_eq!(err, Err("disk full".to_string()));

        assert_eq!(manager.adjuster().performance_history()[&4].len(), 2);
    }

    #[test]
    fn test_guard_captures_pressure_at_start() {
        let probe = neutral_probe();
        probe.set_rss_mb(2100.0);
        probe.set_cpu_percent(88.0);
        let manager = manager_with(probe.clone());

        let guard = manager.begin_execution("join", 2);
        probe.set_cpu_percent(10.0);

        let before = guard.pressure_before();
        assert_eq!(before.memory_pressure, PressureLevel::Moderate);
        assert_eq!(before.cpu_pressure, PressureLevel::High);
        assert_eq!(before.memory_usage_mb, 2100.0);
        assert_eq!(before.cpu_percent, 88.0);
        drop(guard);

        assert_eq!(manager.adjuster().performance_history()[&2].len(), 1);
    }

    #[test]
    fn test_guard_records_on_panic() {
        let manager = manager_with(neutral_probe());

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = manager.begin_execution("transform", 3);
            panic!("stage crashed");
        }));

        assert!(outcome.is_err());
        assert_eq!(manager.adjuster().performance_history()[&3].len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_execution_async() {
        let manager = manager_with(neutral_probe());

        let result: std::result::Result<&str, std::io::Error> = manager
            .monitor_execution("aggregate", 2, async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok("done")
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        let history = manager.adjuster().performance_history();
        assert_eq!(history[&2].len(), 1);
        assert!(history[&2][0] >= 0.005);
    }

    #[tokio::test]
    async fn test_cancelled_execution_still_records() {
        let manager = manager_with(neutral_probe());

        let slow = manager.monitor_execution("slow", 5, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, std::io::Error>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;

        assert!(timed_out.is_err());
        assert_eq!(manager.adjuster().performance_history()[&5].len(), 1);
    }

    #[test]
    fn test_trigger_cleanup_reports_freed_memory() {
        let probe = neutral_probe();
        probe.set_rss_mb(1200.0);

        let calls = Arc::new(AtomicUsize::new(0));
        let reclaim_probe = probe.clone();
        let counter = calls.clone();
        let manager = ResourceManager::builder()
            .probe(probe)
            .reclaimer(Arc::new(CallbackReclaimer::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                reclaim_probe.set_rss_mb(1150.0);
                Ok(())
            })))
            .build()
            .unwrap();

        let result = manager.trigger_cleanup();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!((result.freed_mb - 50.0).abs() < 0.01);
        assert!(result.effective);

        let result = manager.trigger_cleanup();
        assert!(result.freed_mb.abs() < 0.01);
        assert!(!result.effective);
    }

    #[test]
    fn test_run_benchmark_feeds_adjuster() {
        let manager = manager_with(neutral_probe());
        let report = manager.run_benchmark(
            |threads| Ok::<_, String>(Duration::from_secs_f64(8.0 / threads as f64)),
            1,
            Some(4),
        );

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.analysis.recommended_threads, 1);

        let history = manager.adjuster().performance_history();
        assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4]);
    }

    #[test]
    fn test_optimize_records_history() {
        let probe = neutral_probe();
        probe.set_rss_mb(3600.0);
        let manager = manager_with(probe);

        let (threads, reason) = manager.optimize_thread_count(8, &AdjustmentContext::new());
        assert_eq!(threads, 5);
        assert_eq!(reason.to_string(), "critical_memory_pressure_3600mb");

        let history = manager.adjustment_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, "critical_memory_pressure_3600mb");
    }
}
