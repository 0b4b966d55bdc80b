//! Error types for the governor library

use thiserror::Error;

/// Configuration validation failures, reported once at construction
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{family} thresholds must be positive (got moderate={moderate}, high={high}, critical={critical})")]
    NonPositiveThreshold {
        family: &'static str,
        moderate: f64,
        high: f64,
        critical: f64,
    },

    #[error("{family} thresholds must be ordered moderate <= high <= critical (got {moderate} / {high} / {critical})")]
    UnorderedThresholds {
        family: &'static str,
        moderate: f64,
        high: f64,
        critical: f64,
    },

    #[error("gc trigger threshold must be positive (got {0})")]
    InvalidGcTrigger(f64),

    #[error("{field} must be a positive, finite number of seconds (got {value})")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("{field} must be at most {max} seconds (got {value})")]
    DurationTooLong {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("history_size must be at least 2 (got {0})")]
    HistoryTooSmall(usize),

    #[error("thread bounds must satisfy 1 <= min_threads <= max_threads (got {min}..={max})")]
    InvalidThreadBounds { min: usize, max: usize },

    #[error("benchmark_thread_counts must be non-empty and contain no zero entries")]
    InvalidBenchmarkSweep,

    #[error("leak_threshold_mb must be positive (got {0})")]
    InvalidLeakThreshold(f64),

    #[error("leak_window_secs must be between 1 and {max} (got {value})")]
    InvalidLeakWindow { value: u64, max: f64 },
}

/// Errors surfaced by the governor's lifecycle operations
#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("background sampling requires a running tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, GovernorError>;
