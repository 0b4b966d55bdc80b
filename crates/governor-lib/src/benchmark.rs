//! Thread-count benchmarking
//!
//! Runs a caller-supplied workload across a sweep of thread counts and
//! derives speedup and efficiency per configuration. Efficiency drives the
//! recommendation so configurations with diminishing returns lose out.

use crate::config::GovernorConfig;
use crate::models::BenchmarkResult;
use crate::monitor::{CpuMonitor, MemoryMonitor};
use crate::observability::{GovernorMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Efficiencies closer than this are treated as equal
const EFFICIENCY_TOLERANCE: f64 = 1e-9;

/// Advice attached to a benchmark recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkAdvice {
    SingleThreadOptimal,
    LowParallelismRecommended,
    ModerateParallelismRecommended,
    HighParallelismBeneficial,
    /// Every configuration failed
    FallbackToSingleThread,
}

impl BenchmarkAdvice {
    pub fn for_thread_count(threads: usize) -> Self {
        match threads {
            0 | 1 => BenchmarkAdvice::SingleThreadOptimal,
            2 => BenchmarkAdvice::LowParallelismRecommended,
            3 | 4 => BenchmarkAdvice::ModerateParallelismRecommended,
            _ => BenchmarkAdvice::HighParallelismBeneficial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkAdvice::SingleThreadOptimal => "single_thread_optimal",
            BenchmarkAdvice::LowParallelismRecommended => "low_parallelism_recommended",
            BenchmarkAdvice::ModerateParallelismRecommended => "moderate_parallelism_recommended",
            BenchmarkAdvice::HighParallelismBeneficial => "high_parallelism_beneficial",
            BenchmarkAdvice::FallbackToSingleThread => "fallback_to_single_thread",
        }
    }
}

impl fmt::Display for BenchmarkAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommendation derived from a set of benchmark results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkAnalysis {
    pub recommended_threads: usize,
    pub advice: BenchmarkAdvice,
    /// Efficiency of the recommended configuration
    pub efficiency: f64,
    /// Configuration with the highest raw speedup
    pub best_speedup_threads: Option<usize>,
    pub best_speedup: f64,
    pub successes: usize,
    pub failures: usize,
}

/// Runs benchmark sweeps and keeps every result it produced
pub struct PerformanceBenchmarker {
    memory: Arc<MemoryMonitor>,
    cpu: Arc<CpuMonitor>,
    thread_counts: Vec<usize>,
    results: Mutex<Vec<BenchmarkResult>>,
    metrics: GovernorMetrics,
    logger: StructuredLogger,
}

impl PerformanceBenchmarker {
    pub fn new(memory: Arc<MemoryMonitor>, cpu: Arc<CpuMonitor>, config: &GovernorConfig) -> Self {
        Self {
            memory,
            cpu,
            thread_counts: config.benchmark_thread_counts.clone(),
            results: Mutex::new(Vec::new()),
            metrics: GovernorMetrics::new(),
            logger: StructuredLogger::new("benchmarker"),
        }
    }

    fn results_lock(&self) -> MutexGuard<'_, Vec<BenchmarkResult>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Thread counts a sweep would test, ascending
    pub fn candidates(&self, baseline_threads: usize, max_threads: Option<usize>) -> Vec<usize> {
        let mut counts: Vec<usize> = self
            .thread_counts
            .iter()
            .copied()
            .filter(|&n| n > 0 && max_threads.map_or(true, |max| n <= max))
            .collect();
        counts.push(baseline_threads.max(1));
        counts.sort_unstable();
        counts.dedup();
        counts
    }

    /// Run `benchmark` once per candidate thread count
    ///
    /// `benchmark` returns the execution time it measured. A failing
    /// configuration is recorded with `success: false` and the sweep goes on.
    /// Calls must not overlap.
    pub fn run_suite<F, E>(
        &self,
        mut benchmark: F,
        baseline_threads: usize,
        max_threads: Option<usize>,
    ) -> Vec<BenchmarkResult>
    where
        F: FnMut(usize) -> std::result::Result<Duration, E>,
        E: fmt::Display,
    {
        let baseline_threads = baseline_threads.max(1);
        let mut results = Vec::new();

        for threads in self.candidates(baseline_threads, max_threads) {
            let memory_before = self.memory.snapshot_with_context("benchmark");
            let cpu_before = self.cpu.snapshot();
            let started = Instant::now();

            let outcome = benchmark(threads);

            let wall_time = started.elapsed();
            let memory_after = self.memory.snapshot_with_context("benchmark");
            let cpu_after = self.cpu.snapshot();

            let mut result = BenchmarkResult {
                thread_count: threads,
                execution_time_secs: 0.0,
                wall_time_secs: wall_time.as_secs_f64(),
                memory_delta_mb: memory_after.rss_mb - memory_before.rss_mb,
                avg_cpu_percent: (cpu_before.percent + cpu_after.percent) / 2.0,
                speedup: 0.0,
                efficiency: 0.0,
                success: false,
                error: None,
            };

            match outcome {
                Ok(execution_time) => {
                    result.execution_time_secs = execution_time.as_secs_f64();
                    result.success = true;
                    debug!(
                        threads,
                        execution_time_secs = result.execution_time_secs,
                        memory_delta_mb = result.memory_delta_mb,
                        "Benchmark configuration finished"
                    );
                }
                Err(e) => {
                    warn!(threads, error = %e, "Benchmark configuration failed");
                    result.error = Some(e.to_string());
                }
            }
            self.metrics.inc_benchmark_runs(result.success);
            results.push(result);
        }

        apply_speedups(&mut results, baseline_threads);
        self.results_lock().extend(results.iter().cloned());
        results
    }

    /// Pick an operating point from a sweep's results
    ///
    /// Highest efficiency wins; ties go to the lowest thread count.
    pub fn analyze(&self, results: &[BenchmarkResult]) -> BenchmarkAnalysis {
        let analysis = analyze_results(results);
        self.logger.log_benchmark(
            results.len(),
            analysis.failures,
            analysis.recommended_threads,
            analysis.advice.as_str(),
        );
        analysis
    }

    /// Every result produced so far, in run order
    pub fn results(&self) -> Vec<BenchmarkResult> {
        self.results_lock().clone()
    }

    pub fn clear_results(&self) {
        self.results_lock().clear();
    }
}

/// Fill in speedup and efficiency once all configurations have run
fn apply_speedups(results: &mut [BenchmarkResult], baseline_threads: usize) {
    let reference = results
        .iter()
        .find(|r| r.success && r.thread_count == baseline_threads)
        .or_else(|| {
            let fallback = results
                .iter()
                .filter(|r| r.success)
                .min_by_key(|r| r.thread_count);
            if let Some(r) = fallback {
                warn!(
                    baseline_threads,
                    reference_threads = r.thread_count,
                    "Baseline configuration failed, using lowest successful thread count as reference"
                );
            }
            fallback
        })
        .map(|r| (r.thread_count, r.execution_time_secs));

    let Some((reference_threads, reference_secs)) = reference else {
        return;
    };

    for result in results.iter_mut().filter(|r| r.success) {
        result.speedup = if result.thread_count == reference_threads {
            1.0
        } else if result.execution_time_secs > 0.0 {
            reference_secs / result.execution_time_secs
        } else {
            0.0
        };
        result.efficiency = result.speedup / result.thread_count as f64;
    }
}

fn analyze_results(results: &[BenchmarkResult]) -> BenchmarkAnalysis {
    let mut successful: Vec<&BenchmarkResult> = results.iter().filter(|r| r.success).collect();
    successful.sort_by_key(|r| r.thread_count);
    let failures = results.len() - successful.len();

    let mut best_efficiency: Option<&BenchmarkResult> = None;
    let mut best_speedup: Option<&BenchmarkResult> = None;
    for &result in &successful {
        match best_efficiency {
            Some(best) if result.efficiency <= best.efficiency + EFFICIENCY_TOLERANCE => {}
            _ => best_efficiency = Some(result),
        }
        match best_speedup {
            Some(best) if result.speedup <= best.speedup + EFFICIENCY_TOLERANCE => {}
            _ => best_speedup = Some(result),
        }
    }

    match best_efficiency {
        Some(best) => BenchmarkAnalysis {
            recommended_threads: best.thread_count,
            advice: BenchmarkAdvice::for_thread_count(best.thread_count),
            efficiency: best.efficiency,
            best_speedup_threads: best_speedup.map(|r| r.thread_count),
            best_speedup: best_speedup.map_or(0.0, |r| r.speedup),
            successes: successful.len(),
            failures,
        },
        None => BenchmarkAnalysis {
            recommended_threads: 1,
            advice: BenchmarkAdvice::FallbackToSingleThread,
            efficiency: 0.0,
            best_speedup_threads: None,
            best_speedup: 0.0,
            successes: 0,
            failures,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FixedProbe, HeapTrimReclaimer};

    fn benchmarker(thread_counts: Vec<usize>) -> PerformanceBenchmarker {
        let config = GovernorConfig {
            benchmark_thread_counts: thread_counts,
            ..Default::default()
        };
        let probe = Arc::new(FixedProbe::new(16, 8));
        let memory = Arc::new(MemoryMonitor::new(
            probe.clone(),
            Arc::new(HeapTrimReclaimer),
            &config,
        ));
        let cpu = Arc::new(CpuMonitor::new(probe, &config));
        PerformanceBenchmarker::new(memory, cpu, &config)
    }

    fn ideal_scaling(threads: usize) -> Result<Duration, String> {
        Ok(Duration::from_secs_f64(10.0 / threads as f64))
    }

    #[test]
    fn test_ideal_scaling_speedups_and_tie_break() {
        let benchmarker = benchmarker(vec![1, 2, 4]);
        let results = benchmarker.run_suite(ideal_scaling, 1, None);

        let speedups: Vec<f64> = results.iter().map(|r| r.speedup).collect();
        assert_eq!(speedups, vec![1.0, 2.0, 4.0]);
        for result in &results {
            assert!(result.success);
            assert!((result.efficiency - 1.0).abs() < 1e-9);
            assert!((result.efficiency - result.speedup / result.thread_count as f64).abs() < 1e-9);
        }

        let analysis = benchmarker.analyze(&results);
        assert_eq!(analysis.recommended_threads, 1);
        assert_eq!(analysis.advice, BenchmarkAdvice::SingleThreadOptimal);
        assert_eq!(analysis.best_speedup_threads, Some(4));
        assert_eq!((analysis.successes, analysis.failures), (3, 0));
    }

    #[test]
    fn test_candidates_filtered_and_include_baseline() {
        let benchmarker = benchmarker(vec![1, 2, 4, 6, 8]);
        assert_eq!(benchmarker.candidates(1, Some(4)), vec![1, 2, 4]);
        assert_eq!(benchmarker.candidates(3, Some(4)), vec![1, 2, 3, 4]);
        assert_eq!(benchmarker.candidates(2, None), vec![1, 2, 4, 6, 8]);
    }

    #[test]
    fn test_failure_does_not_abort_sweep() {
        let benchmarker = benchmarker(vec![1, 2, 4]);
        let results = benchmarker.run_suite(
            |threads| {
                if threads == 2 {
                    Err("worker pool exhausted".to_string())
                } else {
                    ideal_scaling(threads)
                }
            },
            1,
            None,
        );

        assert_eq!(results.len(), 3);
        assert!(!results[1].success);
        assert_eq!(results[1].error.as_deref(), Some("worker pool exhausted"));
        assert_eq!(results[1].efficiency, 0.0);
        assert!(results[2].success);
        assert_eq!(results[2].speedup, 4.0);

        let analysis = benchmarker.analyze(&results);
        assert_eq!(analysis.failures, 1);
    }

    #[test]
    fn test_all_failures_fall_back_to_single_thread() {
        let benchmarker = benchmarker(vec![1, 2, 4]);
        let results = benchmarker.run_suite(|_| Err::<Duration, _>("boom"), 1, None);

        assert!(results.iter().all(|r| !r.success));
        let analysis = benchmarker.analyze(&results);
        assert_eq!(analysis.recommended_threads, 1);
        assert_eq!(analysis.advice, BenchmarkAdvice::FallbackToSingleThread);
        assert_eq!(analysis.advice.to_string(), "fallback_to_single_thread");
    }

    #[test]
    fn test_diminishing_returns_prefer_efficiency() {
        let benchmarker = benchmarker(vec![1, 2, 4, 8]);
        // 1 -> 10s, 2 -> 4s (superlinear), 4 -> 3s, 8 -> 2.5s
        let results = benchmarker.run_suite(
            |threads| {
                let secs = match threads {
                    1 => 10.0,
                    2 => 4.0,
                    4 => 3.0,
                    _ => 2.5,
                };
                Ok::<_, String>(Duration::from_secs_f64(secs))
            },
            1,
            None,
        );

        let analysis = benchmarker.analyze(&results);
        assert_eq!(analysis.recommended_threads, 2);
        assert_eq!(analysis.advice, BenchmarkAdvice::LowParallelismRecommended);
        assert_eq!(analysis.best_speedup_threads, Some(8));
    }

    #[test]
    fn test_baseline_other_than_smallest() {
        let benchmarker = benchmarker(vec![1, 2, 4]);
        let results = benchmarker.run_suite(ideal_scaling, 2, None);

        assert_eq!(results[0].speedup, 0.5);
        assert_eq!(results[1].speedup, 1.0);
        assert_eq!(results[2].speedup, 2.0);
    }

    #[test]
    fn test_failed_baseline_uses_lowest_successful_reference() {
        let benchmarker = benchmarker(vec![1, 2, 4]);
        let results = benchmarker.run_suite(
            |threads| {
                if threads == 1 {
                    Err("baseline crashed".to_string())
                } else {
                    ideal_scaling(threads)
                }
            },
            1,
            None,
        );

        assert_eq!(results[1].speedup, 1.0);
        assert_eq!(results[2].speedup, 2.0);
    }

    #[test]
    fn test_results_accumulate_across_runs() {
        let benchmarker = benchmarker(vec![1, 2]);
        benchmarker.run_suite(ideal_scaling, 1, None);
        benchmarker.run_suite(ideal_scaling, 1, None);
        assert_eq!(benchmarker.results().len(), 4);

        benchmarker.clear_results();
        assert!(benchmarker.results().is_empty());
    }

    #[test]
    fn test_advice_vocabulary() {
        assert_eq!(BenchmarkAdvice::for_thread_count(1), BenchmarkAdvice::SingleThreadOptimal);
        assert_eq!(BenchmarkAdvice::for_thread_count(2), BenchmarkAdvice::LowParallelismRecommended);
        assert_eq!(
            BenchmarkAdvice::for_thread_count(4),
            BenchmarkAdvice::ModerateParallelismRecommended
        );
        assert_eq!(BenchmarkAdvice::for_thread_count(6), BenchmarkAdvice::HighParallelismBeneficial);
    }
}
