//! Resource-aware concurrency control for multi-stage pipelines
//!
//! This crate provides:
//! - Memory and CPU monitors with bounded histories and background sampling
//! - Pressure classification, trend and leak heuristics
//! - An adaptive thread-count adjuster fed by measured stage performance
//! - A benchmarking harness for calibrating thread counts
//! - A `ResourceManager` facade, health checks and observability

pub mod adjuster;
pub mod benchmark;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod probe;

pub use adjuster::{AdaptiveThreadAdjuster, AdjustmentReason};
pub use benchmark::{BenchmarkAdvice, BenchmarkAnalysis, PerformanceBenchmarker};
pub use config::{CpuThresholds, GovernorConfig, MemoryThresholds};
pub use error::{ConfigError, GovernorError, Result};
pub use health::{ComponentHealth, ComponentStatus, HealthResponse, ReadinessResponse};
pub use manager::{
    BenchmarkReport, CleanupResult, ExecutionGuard, ResourceManager, ResourceManagerBuilder,
    StatusSnapshot,
};
pub use models::*;
pub use monitor::{CpuMonitor, MemoryLeak, MemoryMonitor, Trend, TrendDirection, TrendSummary};
pub use observability::{GovernorMetrics, StructuredLogger};
pub use probe::{FixedProbe, Reclaimer, SystemProbe};
