//! Observability infrastructure for the governor
//!
//! Provides:
//! - Prometheus metrics (memory/CPU gauges, pressure levels, thread adjustments,
//!   stage durations, reclamation and benchmark counters)
//! - Structured logging with tracing

use crate::models::{PressureLevel, ResourcePressure};
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

/// Histogram buckets for stage execution time (in seconds)
const STAGE_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

/// Distinct `stage` label values kept before new names fold into "other"
const MAX_STAGE_LABELS: usize = 64;

/// Longest `stage` label value; longer names are truncated
const MAX_STAGE_LABEL_LEN: usize = 48;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GovernorMetricsInner> = OnceLock::new();

struct GovernorMetricsInner {
    memory_rss_megabytes: Gauge,
    memory_used_percent: Gauge,
    cpu_percent: Gauge,
    pressure_level: IntGaugeVec,
    recommended_threads: IntGauge,
    thread_adjustments: IntCounterVec,
    stage_duration_seconds: HistogramVec,
    memory_reclaims: IntCounter,
    sampling_errors: IntCounterVec,
    benchmark_runs: IntCounterVec,
    stage_labels: Mutex<HashSet<String>>,
}

impl GovernorMetricsInner {
    fn new() -> Self {
        Self {
            memory_rss_megabytes: register_gauge!(
                "governor_memory_rss_megabytes",
                "Resident set size of this process in MB"
            )
            .expect("Failed to register memory_rss_megabytes"),

            memory_used_percent: register_gauge!(
                "governor_host_memory_used_percent",
                "Host memory in use, percent of total"
            )
            .expect("Failed to register host_memory_used_percent"),

            cpu_percent: register_gauge!(
                "governor_host_cpu_percent",
                "Host CPU utilization percent"
            )
            .expect("Failed to register host_cpu_percent"),

            pressure_level: register_int_gauge_vec!(
                "governor_pressure_level",
                "Current pressure level (0=none, 1=moderate, 2=high, 3=critical)",
                &["resource"]
            )
            .expect("Failed to register pressure_level"),

            recommended_threads: register_int_gauge!(
                "governor_recommended_threads",
                "Most recent thread-count recommendation"
            )
            .expect("Failed to register recommended_threads"),

            thread_adjustments: register_int_counter_vec!(
                "governor_thread_adjustments_total",
                "Applied thread-count adjustments",
                &["direction"]
            )
            .expect("Failed to register thread_adjustments"),

            stage_duration_seconds: register_histogram_vec!(
                "governor_stage_duration_seconds",
                "Execution time of monitored pipeline stages",
                &["stage"],
                STAGE_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            memory_reclaims: register_int_counter!(
                "governor_memory_reclaims_total",
                "Memory reclamation passes requested"
            )
            .expect("Failed to register memory_reclaims"),

            sampling_errors: register_int_counter_vec!(
                "governor_sampling_errors_total",
                "Telemetry reads that failed and produced a zeroed snapshot",
                &["monitor"]
            )
            .expect("Failed to register sampling_errors"),

            benchmark_runs: register_int_counter_vec!(
                "governor_benchmark_runs_total",
                "Benchmark configurations executed",
                &["outcome"]
            )
            .expect("Failed to register benchmark_runs"),

            stage_labels: Mutex::new(HashSet::new()),
        }
    }
}

/// Governor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct GovernorMetrics {
    _private: (),
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GovernorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GovernorMetricsInner {
        GLOBAL_METRICS.get_or_init(GovernorMetricsInner::new)
    }

    pub fn set_memory(&self, rss_mb: f64, used_percent: f64) {
        self.inner().memory_rss_megabytes.set(rss_mb);
        self.inner().memory_used_percent.set(used_percent);
    }

    pub fn set_cpu(&self, percent: f64) {
        self.inner().cpu_percent.set(percent);
    }

    pub fn set_pressure(&self, resource: &str, level: PressureLevel) {
        self.inner()
            .pressure_level
            .with_label_values(&[resource])
            .set(level.as_i64());
    }

    pub fn set_recommended_threads(&self, threads: usize) {
        self.inner().recommended_threads.set(threads as i64);
    }

    pub fn inc_adjustment(&self, direction: &str) {
        self.inner()
            .thread_adjustments
            .with_label_values(&[direction])
            .inc();
    }

    /// Record a stage duration
    ///
    /// Stage names are normalised and only the first few distinct names get
    /// their own series, so callers should name stages from a small fixed set.
    pub fn observe_stage_duration(&self, stage: &str, duration_secs: f64) {
        let inner = self.inner();
        let label = {
            let mut seen = inner
                .stage_labels
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            stage_label(stage, &mut seen)
        };
        inner
            .stage_duration_seconds
            .with_label_values(&[&label])
            .observe(duration_secs);
    }

    pub fn inc_memory_reclaims(&self) {
        self.inner().memory_reclaims.inc();
    }

    pub fn inc_sampling_errors(&self, monitor: &str) {
        self.inner()
            .sampling_errors
            .with_label_values(&[monitor])
            .inc();
    }

    pub fn inc_benchmark_runs(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .benchmark_runs
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Structured logger for governor events
///
/// Provides consistent logging for adjustments, pressure changes and
/// other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log a change of pressure level on one resource
    pub fn log_pressure_change(
        &self,
        resource: &str,
        previous: PressureLevel,
        current: PressureLevel,
        value: f64,
    ) {
        if current > previous && current >= PressureLevel::High {
            warn!(
                event = "pressure_changed",
                component = %self.component,
                resource = %resource,
                previous = %previous,
                current = %current,
                value = value,
                "Resource pressure rising"
            );
        } else {
            info!(
                event = "pressure_changed",
                component = %self.component,
                resource = %resource,
                previous = %previous,
                current = %current,
                value = value,
                "Resource pressure changed"
            );
        }
    }

    /// Log an applied thread-count adjustment
    pub fn log_adjustment(&self, previous: usize, new: usize, reason: &str) {
        info!(
            event = "thread_adjustment",
            component = %self.component,
            previous_threads = previous,
            new_threads = new,
            reason = %reason,
            "Adjusted thread count"
        );
    }

    pub fn log_leak_suspected(&self, growth_rate_mb_per_min: f64, peak_mb: f64, samples: usize) {
        warn!(
            event = "memory_leak_suspected",
            component = %self.component,
            growth_rate_mb_per_min = growth_rate_mb_per_min,
            peak_mb = peak_mb,
            samples = samples,
            "Sustained memory growth detected"
        );
    }

    /// Log the end of a monitored stage with the pressure seen on each side
    pub fn log_execution(
        &self,
        stage: &str,
        threads: usize,
        elapsed_secs: f64,
        before: &ResourcePressure,
        after: &ResourcePressure,
        outcome: &str,
    ) {
        let memory_delta_mb = after.memory_usage_mb - before.memory_usage_mb;
        if outcome == "completed" && after.worst_level() < PressureLevel::High {
            info!(
                event = "stage_finished",
                component = %self.component,
                stage = %stage,
                threads = threads,
                elapsed_secs = elapsed_secs,
                memory_delta_mb = memory_delta_mb,
                cpu_percent_before = before.cpu_percent,
                cpu_percent_after = after.cpu_percent,
                pressure_before = %before.worst_level(),
                pressure_after = %after.worst_level(),
                outcome = %outcome,
                "Monitored stage finished"
            );
        } else {
            warn!(
                event = "stage_finished",
                component = %self.component,
                stage = %stage,
                threads = threads,
                elapsed_secs = elapsed_secs,
                memory_delta_mb = memory_delta_mb,
                cpu_percent_before = before.cpu_percent,
                cpu_percent_after = after.cpu_percent,
                pressure_before = %before.worst_level(),
                pressure_after = %after.worst_level(),
                recommended_action = %after.recommended_action,
                outcome = %outcome,
                "Monitored stage finished under pressure or did not complete"
            );
        }
    }

    pub fn log_benchmark(
        &self,
        configurations: usize,
        failures: usize,
        recommended_threads: usize,
        advice: &str,
    ) {
        info!(
            event = "benchmark_finished",
            component = %self.component,
            configurations = configurations,
            failures = failures,
            recommended_threads = recommended_threads,
            advice = %advice,
            "Benchmark suite finished"
        );
    }

    pub fn log_cleanup(&self, before_mb: f64, after_mb: f64, effective: bool) {
        debug!(
            event = "cleanup_finished",
            component = %self.component,
            before_mb = before_mb,
            after_mb = after_mb,
            freed_mb = before_mb - after_mb,
            effective = effective,
            "Memory cleanup finished"
        );
    }

    pub fn log_startup(&self, version: &str, max_threads: usize) {
        info!(
            event = "governor_started",
            component = %self.component,
            version = %version,
            max_threads = max_threads,
            "Resource governor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "governor_stopped",
            component = %self.component,
            reason = %reason,
            "Resource governor stopped"
        );
    }
}

/// Bounded `stage` label for a caller-supplied name
fn stage_label(name: &str, seen: &mut HashSet<String>) -> String {
    let mut label: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(MAX_STAGE_LABEL_LEN)
        .collect();
    if label.is_empty() {
        label.push_str("unnamed");
    }

    if seen.contains(&label) {
        return label;
    }
    if seen.len() >= MAX_STAGE_LABELS {
        return "other".to_string();
    }
    seen.insert(label.clone());
    label
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_metrics_creation() {
        // Metrics live in the process-wide registry; repeated handles share them
        let metrics = GovernorMetrics::new();
        let again = GovernorMetrics::new();

        metrics.set_memory(512.0, 40.0);
        metrics.set_cpu(12.5);
        metrics.set_pressure("memory", PressureLevel::High);
        again.set_recommended_threads(4);
        again.inc_adjustment("decrease");
        again.observe_stage_duration("load", 1.5);
        again.inc_memory_reclaims();
        again.inc_sampling_errors("cpu");
        again.inc_benchmark_runs(true);
    }

    #[test]
    fn test_stage_labels_are_normalised() {
        let mut seen = HashSet::new();
        assert_eq!(stage_label("Load Orders", &mut seen), "load_orders");
        assert_eq!(stage_label("  ", &mut seen), "unnamed");

        let long = "x".repeat(200);
        assert_eq!(stage_label(&long, &mut seen).len(), MAX_STAGE_LABEL_LEN);
    }

    #[test]
    fn test_stage_labels_are_capped() {
        let mut seen = HashSet::new();
        for i in 0..MAX_STAGE_LABELS {
            let label = stage_label(&format!("stage-{}", i), &mut seen);
            assert_eq!(label, format!("stage_{}", i));
        }

        assert_eq!(stage_label("one-more", &mut seen), "other");
        // Known names keep their own series
        assert_eq!(stage_label("stage-3", &mut seen), "stage_3");
        assert_eq!(seen.len(), MAX_STAGE_LABELS);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("governor");
        assert_eq!(logger.component, "governor");
        logger.log_adjustment(8, 5, "critical_memory_pressure_3600mb");
    }

    #[test]
    fn test_log_execution_with_pressure_on_both_sides() {
        let logger = StructuredLogger::new("resource_manager");
        let memory = crate::models::MemorySnapshot::zeroed(chrono::Utc::now());
        let before = ResourcePressure::from_memory(&memory, PressureLevel::None)
            .with_cpu(PressureLevel::None, 20.0);
        let after = ResourcePressure::from_memory(&memory, PressureLevel::Moderate)
            .with_cpu(PressureLevel::High, 90.0);

        logger.log_execution("load", 4, 1.25, &before, &after, "completed");
        logger.log_execution("load", 4, 1.25, &before, &before, "failed");
    }
}
