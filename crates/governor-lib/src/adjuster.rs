//! Adaptive thread-count adjustment
//!
//! Blends two signals into one recommendation:
//! - a performance estimate learned from execution times reported per thread count
//! - a resource estimate derived from current CPU load and memory/CPU pressure
//!
//! The two are combined conservatively (the smaller wins), critical pressure
//! overrides everything, and applied changes are rate-limited by a cooldown.

use crate::config::GovernorConfig;
use crate::models::{AdjustmentContext, AdjustmentRecord, PressureLevel};
use crate::monitor::{estimate_thread_count, CpuMonitor, MemoryMonitor};
use crate::observability::{GovernorMetrics, StructuredLogger};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Execution times kept per thread count before trimming
const PERFORMANCE_HISTORY_CAP: usize = 20;
const PERFORMANCE_HISTORY_KEEP: usize = 10;

/// Adjustment records kept before trimming
const ADJUSTMENT_HISTORY_CAP: usize = 100;
const ADJUSTMENT_HISTORY_KEEP: usize = 50;

/// Samples a thread count needs before it is trusted
const MIN_SAMPLES_PER_THREAD_COUNT: usize = 3;

/// Samples averaged when ranking thread counts
const RECENT_SAMPLES: usize = 5;

const CRITICAL_MEMORY_STEP: usize = 3;
const CRITICAL_CPU_STEP: usize = 2;

/// Why a recommendation came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentReason {
    /// Last applied adjustment is too recent
    Cooldown,
    CriticalMemoryPressure { usage_mb: u64 },
    CriticalCpuPressure,
    ResourcePressureReduction,
    PerformanceOptimizationIncrease,
    NoAdjustmentNeeded,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustmentReason::Cooldown => f.write_str("adjustment_cooldown"),
            AdjustmentReason::CriticalMemoryPressure { usage_mb } => {
                write!(f, "critical_memory_pressure_{}mb", usage_mb)
            }
            AdjustmentReason::CriticalCpuPressure => f.write_str("critical_cpu_pressure"),
            AdjustmentReason::ResourcePressureReduction => {
                f.write_str("resource_pressure_reduction")
            }
            AdjustmentReason::PerformanceOptimizationIncrease => {
                f.write_str("performance_optimization_increase")
            }
            AdjustmentReason::NoAdjustmentNeeded => f.write_str("no_adjustment_needed"),
        }
    }
}

#[derive(Debug, Default)]
struct AdjusterState {
    /// Thread count -> recent execution times in seconds, oldest first
    performance: BTreeMap<usize, Vec<f64>>,
    adjustments: Vec<AdjustmentRecord>,
    last_adjustment: Option<Instant>,
}

/// Produces thread-count recommendations from pressure and measured performance
pub struct AdaptiveThreadAdjuster {
    memory: Arc<MemoryMonitor>,
    cpu: Arc<CpuMonitor>,
    config: GovernorConfig,
    cooldown: Duration,
    state: Mutex<AdjusterState>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
}

impl AdaptiveThreadAdjuster {
    pub fn new(memory: Arc<MemoryMonitor>, cpu: Arc<CpuMonitor>, config: &GovernorConfig) -> Self {
        Self {
            memory,
            cpu,
            config: config.clone(),
            cooldown: config.cooldown(),
            state: Mutex::new(AdjusterState::default()),
            metrics: GovernorMetrics::new(),
            logger: StructuredLogger::new("thread_adjuster"),
        }
    }

    fn state(&self) -> MutexGuard<'_, AdjusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    /// Configured cap limited by the logical core count
    pub fn max_threads(&self) -> usize {
        self.config.effective_max_threads(self.cpu.logical_cores())
    }

    fn clamp(&self, threads: usize) -> usize {
        threads.clamp(self.min_threads(), self.max_threads())
    }

    /// Recommend a thread count for the next stage
    pub fn recommend(
        &self,
        current_threads: usize,
        context: &AdjustmentContext,
    ) -> (usize, AdjustmentReason) {
        let memory = self.memory.current_pressure();
        let cpu_snapshot = self.cpu.snapshot();
        let cpu_level = self.cpu.classify(&cpu_snapshot);

        let mut state = self.state();

        if memory.memory_pressure == PressureLevel::Critical {
            let target = self.clamp(current_threads.saturating_sub(CRITICAL_MEMORY_STEP).max(1));
            let reason = AdjustmentReason::CriticalMemoryPressure {
                usage_mb: memory.memory_usage_mb.round().max(0.0) as u64,
            };
            return self.apply(&mut state, current_threads, target, reason, context);
        }

        if cpu_level == PressureLevel::Critical {
            let target = self.clamp(current_threads.saturating_sub(CRITICAL_CPU_STEP).max(1));
            return self.apply(
                &mut state,
                current_threads,
                target,
                AdjustmentReason::CriticalCpuPressure,
                context,
            );
        }

        if let Some(last) = state.last_adjustment {
            if last.elapsed() < self.cooldown {
                let threads = self.clamp(current_threads);
                self.metrics.set_recommended_threads(threads);
                return (threads, AdjustmentReason::Cooldown);
            }
        }

        let performance_based = performance_estimate(&state.performance, current_threads);
        let load_estimate = estimate_thread_count(
            cpu_snapshot.percent,
            self.cpu.logical_cores(),
            self.cpu.physical_cores(),
        );
        let resource_based = resource_estimate(load_estimate, memory.memory_pressure, cpu_level);

        let target = self.clamp(performance_based.min(resource_based));
        debug!(
            current_threads,
            performance_based,
            resource_based,
            target,
            memory_pressure = %memory.memory_pressure,
            cpu_pressure = %cpu_level,
            "Computed thread recommendation"
        );

        if target == current_threads {
            self.metrics.set_recommended_threads(target);
            return (target, AdjustmentReason::NoAdjustmentNeeded);
        }

        let reason = if target < current_threads {
            AdjustmentReason::ResourcePressureReduction
        } else {
            AdjustmentReason::PerformanceOptimizationIncrease
        };
        self.apply(&mut state, current_threads, target, reason, context)
    }

    fn apply(
        &self,
        state: &mut AdjusterState,
        previous: usize,
        target: usize,
        reason: AdjustmentReason,
        context: &AdjustmentContext,
    ) -> (usize, AdjustmentReason) {
        self.metrics.set_recommended_threads(target);
        if target == previous {
            return (target, reason);
        }

        let reason_tag = reason.to_string();
        state.adjustments.push(AdjustmentRecord {
            timestamp: Utc::now(),
            previous_threads: previous,
            new_threads: target,
            reason: reason_tag.clone(),
            context: (!context.is_empty()).then(|| context.clone()),
        });
        if state.adjustments.len() > ADJUSTMENT_HISTORY_CAP {
            let excess = state.adjustments.len() - ADJUSTMENT_HISTORY_KEEP;
            state.adjustments.drain(0..excess);
        }
        state.last_adjustment = Some(Instant::now());

        let direction = if target < previous { "decrease" } else { "increase" };
        self.metrics.inc_adjustment(direction);
        self.logger.log_adjustment(previous, target, &reason_tag);

        (target, reason)
    }

    /// Report how long a stage took at a given thread count
    pub fn record_performance(&self, thread_count: usize, execution_time: Duration) {
        if thread_count == 0 {
            return;
        }

        let mut state = self.state();
        let times = state.performance.entry(thread_count).or_default();
        times.push(execution_time.as_secs_f64());
        if times.len() > PERFORMANCE_HISTORY_CAP {
            let excess = times.len() - PERFORMANCE_HISTORY_KEEP;
            times.drain(0..excess);
        }
    }

    /// Thread count with the lowest recent average, among trusted ones
    pub fn best_thread_count(&self) -> Option<usize> {
        best_by_recent_average(&self.state().performance)
    }

    /// Copy of recorded execution times per thread count
    pub fn performance_history(&self) -> BTreeMap<usize, Vec<f64>> {
        self.state().performance.clone()
    }

    /// Copy of applied adjustments, oldest first
    pub fn adjustment_history(&self) -> Vec<AdjustmentRecord> {
        self.state().adjustments.clone()
    }

    pub fn adjustment_count(&self) -> usize {
        self.state().adjustments.len()
    }
}

fn recent_average(times: &[f64]) -> f64 {
    let recent = &times[times.len().saturating_sub(RECENT_SAMPLES)..];
    recent.iter().sum::<f64>() / recent.len() as f64
}

/// Ties go to the lower thread count
fn best_by_recent_average(performance: &BTreeMap<usize, Vec<f64>>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (&threads, times) in performance {
        if times.len() < MIN_SAMPLES_PER_THREAD_COUNT {
            continue;
        }
        let average = recent_average(times);
        match best {
            Some((_, best_average)) if average >= best_average => {}
            _ => best = Some((threads, average)),
        }
    }
    best.map(|(threads, _)| threads)
}

/// Performance-based estimate: step one thread toward the best measured count
///
/// The current thread count takes part in the comparison even without
/// measurements, so a single measured alternative is enough to move toward.
fn performance_estimate(performance: &BTreeMap<usize, Vec<f64>>, current: usize) -> usize {
    let trusted: Vec<usize> = performance
        .iter()
        .filter(|(_, times)| times.len() >= MIN_SAMPLES_PER_THREAD_COUNT)
        .map(|(&threads, _)| threads)
        .collect();

    let distinct = trusted.len() + usize::from(!trusted.contains(&current));
    if trusted.is_empty() || distinct < 2 {
        return current;
    }

    let Some(best) = best_by_recent_average(performance) else {
        return current;
    };

    match best.cmp(&current) {
        std::cmp::Ordering::Greater => current + 1,
        std::cmp::Ordering::Less => current - 1,
        std::cmp::Ordering::Equal => current,
    }
}

/// Resource-based estimate from the load estimate and pressure levels
fn resource_estimate(load_estimate: usize, memory: PressureLevel, cpu: PressureLevel) -> usize {
    let mut estimate = load_estimate;

    match memory {
        PressureLevel::High => estimate = estimate.saturating_sub(2),
        PressureLevel::Moderate => estimate = estimate.saturating_sub(1),
        _ => {}
    }

    match cpu {
        PressureLevel::High => estimate = estimate.saturating_sub(1),
        PressureLevel::Moderate => estimate = estimate.min(2),
        _ => {}
    }

    estimate.max(1)
}
