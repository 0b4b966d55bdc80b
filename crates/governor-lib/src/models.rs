//! Core data models for the governor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert a byte count to megabytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Free-form key/value context attached to a recommendation request
pub type AdjustmentContext = HashMap<String, serde_json::Value>;

/// Ordered pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    None,
    Moderate,
    High,
    Critical,
}

impl PressureLevel {
    /// Signed change in thread count this level calls for
    pub fn thread_delta(&self) -> i32 {
        match self {
            PressureLevel::None => 0,
            PressureLevel::Moderate => -1,
            PressureLevel::High => -2,
            PressureLevel::Critical => -3,
        }
    }

    pub fn recommended_action(&self) -> RecommendedAction {
        match self {
            PressureLevel::None => RecommendedAction::Continue,
            PressureLevel::Moderate => RecommendedAction::Monitor,
            PressureLevel::High => RecommendedAction::Reduce,
            PressureLevel::Critical => RecommendedAction::ImmediateFallback,
        }
    }

    /// Numeric form for gauges (0 = none .. 3 = critical)
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::None => "none",
            PressureLevel::Moderate => "moderate",
            PressureLevel::High => "high",
            PressureLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action tag accompanying a pressure verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Continue,
    Monitor,
    Reduce,
    ImmediateFallback,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Continue => "continue",
            RecommendedAction::Monitor => "monitor",
            RecommendedAction::Reduce => "reduce",
            RecommendedAction::ImmediateFallback => "immediate_fallback",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1/5/15 minute load averages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Point-in-time memory reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub timestamp: DateTime<Utc>,
    /// Process resident set size
    pub rss_mb: f64,
    /// Process virtual size
    pub vms_mb: f64,
    /// Host memory in use, percent of total
    pub percent: f64,
    pub available_mb: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl MemorySnapshot {
    /// Degraded reading used when the probe fails
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            rss_mb: 0.0,
            vms_mb: 0.0,
            percent: 0.0,
            available_mb: 0.0,
            thread_id: None,
            context: None,
        }
    }
}

/// Point-in-time CPU reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Host CPU utilization, percent
    pub percent: f64,
    /// This process's CPU utilization, percent of one core
    pub process_percent: f64,
    /// `None` on platforms without load averages
    pub load_average: Option<LoadAverage>,
    pub logical_cores: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl CpuSnapshot {
    pub fn zeroed(timestamp: DateTime<Utc>, logical_cores: usize) -> Self {
        Self {
            timestamp,
            percent: 0.0,
            process_percent: 0.0,
            load_average: None,
            logical_cores,
            context: None,
        }
    }
}

/// Derived pressure verdict; recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePressure {
    pub memory_pressure: PressureLevel,
    pub cpu_pressure: PressureLevel,
    pub memory_usage_mb: f64,
    pub memory_usage_percent: f64,
    pub cpu_percent: f64,
    pub recommended_action: RecommendedAction,
    pub thread_delta: i32,
}

impl ResourcePressure {
    /// Verdict from a memory reading alone
    pub fn from_memory(snapshot: &MemorySnapshot, level: PressureLevel) -> Self {
        Self {
            memory_pressure: level,
            cpu_pressure: PressureLevel::None,
            memory_usage_mb: snapshot.rss_mb,
            memory_usage_percent: snapshot.percent,
            cpu_percent: 0.0,
            recommended_action: level.recommended_action(),
            thread_delta: level.thread_delta(),
        }
    }

    /// Fold a CPU verdict in; the worse of the two levels drives the action
    pub fn with_cpu(mut self, level: PressureLevel, cpu_percent: f64) -> Self {
        self.cpu_pressure = level;
        self.cpu_percent = cpu_percent;
        let worst = self.worst_level();
        self.recommended_action = worst.recommended_action();
        self.thread_delta = worst.thread_delta();
        self
    }

    pub fn worst_level(&self) -> PressureLevel {
        self.memory_pressure.max(self.cpu_pressure)
    }

    pub fn is_critical(&self) -> bool {
        self.worst_level() == PressureLevel::Critical
    }
}

/// Outcome of one benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub thread_count: usize,
    /// Execution time reported by the benchmark function, seconds
    pub execution_time_secs: f64,
    /// Wall-clock time measured around the call, seconds
    pub wall_time_secs: f64,
    pub memory_delta_mb: f64,
    pub avg_cpu_percent: f64,
    pub speedup: f64,
    pub efficiency: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One applied thread-count adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub timestamp: DateTime<Utc>,
    pub previous_threads: usize,
    pub new_threads: usize,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AdjustmentContext>,
}
