//! Governor configuration
//!
//! Every recognized option is enumerated here with its default. The
//! configuration is validated once, when a [`crate::ResourceManager`] is built.

use crate::error::ConfigError;
use crate::models::PressureLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for every configured duration (one week)
pub const MAX_DURATION_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Memory pressure thresholds, in MB of process resident set size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    #[serde(default = "default_memory_moderate")]
    pub moderate_mb: f64,
    #[serde(default = "default_memory_high")]
    pub high_mb: f64,
    #[serde(default = "default_memory_critical")]
    pub critical_mb: f64,
    /// Crossing this value during sampling requests a reclamation pass
    #[serde(default = "default_gc_trigger")]
    pub gc_trigger_mb: f64,
}

impl MemoryThresholds {
    /// Classify a resident set size against the configured thresholds
    pub fn classify(&self, rss_mb: f64) -> PressureLevel {
        classify(rss_mb, self.moderate_mb, self.high_mb, self.critical_mb)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_family("memory", self.moderate_mb, self.high_mb, self.critical_mb)?;
        if !(self.gc_trigger_mb.is_finite() && self.gc_trigger_mb > 0.0) {
            return Err(ConfigError::InvalidGcTrigger(self.gc_trigger_mb));
        }
        Ok(())
    }
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            moderate_mb: default_memory_moderate(),
            high_mb: default_memory_high(),
            critical_mb: default_memory_critical(),
            gc_trigger_mb: default_gc_trigger(),
        }
    }
}

/// CPU pressure thresholds, in percent of host CPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuThresholds {
    #[serde(default = "default_cpu_moderate")]
    pub moderate_percent: f64,
    #[serde(default = "default_cpu_high")]
    pub high_percent: f64,
    #[serde(default = "default_cpu_critical")]
    pub critical_percent: f64,
}

impl CpuThresholds {
    pub fn classify(&self, cpu_percent: f64) -> PressureLevel {
        classify(
            cpu_percent,
            self.moderate_percent,
            self.high_percent,
            self.critical_percent,
        )
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_family(
            "cpu",
            self.moderate_percent,
            self.high_percent,
            self.critical_percent,
        )
    }
}

impl Default for CpuThresholds {
    fn default() -> Self {
        Self {
            moderate_percent: default_cpu_moderate(),
            high_percent: default_cpu_high(),
            critical_percent: default_cpu_critical(),
        }
    }
}

/// Complete governor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    #[serde(default)]
    pub memory_thresholds: MemoryThresholds,

    #[serde(default)]
    pub cpu_thresholds: CpuThresholds,

    /// Interval between background samples (default: 1 second)
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: f64,

    /// Maximum snapshots retained per monitor
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Minimum time between two applied thread-count adjustments
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: f64,

    #[serde(default = "default_min_threads")]
    pub min_threads: usize,

    /// Upper bound on recommendations; further capped by the logical core count
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// How long `stop()` waits for a sampling task to finish
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: f64,

    /// Candidate thread counts swept by the benchmarker
    #[serde(default = "default_benchmark_thread_counts")]
    pub benchmark_thread_counts: Vec<usize>,

    /// Growth over the leak window that counts as a suspected leak
    #[serde(default = "default_leak_threshold")]
    pub leak_threshold_mb: f64,

    #[serde(default = "default_leak_window")]
    pub leak_window_secs: u64,
}

fn default_memory_moderate() -> f64 {
    2000.0
}

fn default_memory_high() -> f64 {
    3000.0
}

fn default_memory_critical() -> f64 {
    3500.0
}

fn default_gc_trigger() -> f64 {
    2500.0
}

fn default_cpu_moderate() -> f64 {
    70.0
}

fn default_cpu_high() -> f64 {
    85.0
}

fn default_cpu_critical() -> f64 {
    95.0
}

fn default_sampling_interval() -> f64 {
    1.0
}

fn default_history_size() -> usize {
    600
}

fn default_cooldown() -> f64 {
    30.0
}

fn default_min_threads() -> usize {
    1
}

fn default_max_threads() -> usize {
    8
}

fn default_stop_timeout() -> f64 {
    2.0
}

fn default_benchmark_thread_counts() -> Vec<usize> {
    vec![1, 2, 4, 6, 8]
}

fn default_leak_threshold() -> f64 {
    100.0
}

fn default_leak_window() -> u64 {
    600
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_thresholds: MemoryThresholds::default(),
            cpu_thresholds: CpuThresholds::default(),
            sampling_interval_secs: default_sampling_interval(),
            history_size: default_history_size(),
            cooldown_secs: default_cooldown(),
            min_threads: default_min_threads(),
            max_threads: default_max_threads(),
            stop_timeout_secs: default_stop_timeout(),
            benchmark_thread_counts: default_benchmark_thread_counts(),
            leak_threshold_mb: default_leak_threshold(),
            leak_window_secs: default_leak_window(),
        }
    }
}

impl GovernorConfig {
    /// Check every option for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.memory_thresholds.validate()?;
        self.cpu_thresholds.validate()?;

        validate_seconds("sampling_interval_secs", self.sampling_interval_secs, false)?;
        validate_seconds("cooldown_secs", self.cooldown_secs, true)?;
        validate_seconds("stop_timeout_secs", self.stop_timeout_secs, false)?;

        if self.history_size < 2 {
            return Err(ConfigError::HistoryTooSmall(self.history_size));
        }

        if self.min_threads == 0 || self.min_threads > self.max_threads {
            return Err(ConfigError::InvalidThreadBounds {
                min: self.min_threads,
                max: self.max_threads,
            });
        }

        if self.benchmark_thread_counts.is_empty() || self.benchmark_thread_counts.contains(&0) {
            return Err(ConfigError::InvalidBenchmarkSweep);
        }

        if !(self.leak_threshold_mb.is_finite() && self.leak_threshold_mb > 0.0) {
            return Err(ConfigError::InvalidLeakThreshold(self.leak_threshold_mb));
        }

        if self.leak_window_secs == 0 || self.leak_window_secs as f64 > MAX_DURATION_SECS {
            return Err(ConfigError::InvalidLeakWindow {
                value: self.leak_window_secs,
                max: MAX_DURATION_SECS,
            });
        }

        Ok(())
    }

    pub fn sampling_interval(&self) -> Duration {
        seconds(self.sampling_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        seconds(self.stop_timeout_secs)
    }

    pub fn leak_window(&self) -> Duration {
        Duration::from_secs(self.leak_window_secs.min(MAX_DURATION_SECS as u64))
    }

    /// Effective upper bound: the configured cap limited by the core count
    pub fn effective_max_threads(&self, logical_cores: usize) -> usize {
        self.max_threads.min(logical_cores).max(self.min_threads)
    }
}

fn classify(value: f64, moderate: f64, high: f64, critical: f64) -> PressureLevel {
    if value >= critical {
        PressureLevel::Critical
    } else if value >= high {
        PressureLevel::High
    } else if value >= moderate {
        PressureLevel::Moderate
    } else {
        PressureLevel::None
    }
}

fn validate_family(
    family: &'static str,
    moderate: f64,
    high: f64,
    critical: f64,
) -> Result<(), ConfigError> {
    let positive = [moderate, high, critical]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0);
    if !positive {
        return Err(ConfigError::NonPositiveThreshold {
            family,
            moderate,
            high,
            critical,
        });
    }

    if moderate > high || high > critical {
        return Err(ConfigError::UnorderedThresholds {
            family,
            moderate,
            high,
            critical,
        });
    }

    Ok(())
}

fn validate_seconds(field: &'static str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if !ok {
        return Err(ConfigError::InvalidDuration { field, value });
    }
    if value > MAX_DURATION_SECS {
        return Err(ConfigError::DurationTooLong {
            field,
            value,
            max: MAX_DURATION_SECS,
        });
    }
    Ok(())
}

/// Seconds to a `Duration`, clamped into `[0, MAX_DURATION_SECS]`
fn seconds(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.min(MAX_DURATION_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GovernorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sampling_interval(), Duration::from_secs(1));
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
        assert_eq!(config.benchmark_thread_counts, vec![1, 2, 4, 6, 8]);
    }

    #[test]
    fn test_memory_classification_is_monotonic() {
        let thresholds = MemoryThresholds::default();
        let mut previous = PressureLevel::None;

        for mb in (0..5000).step_by(25) {
            let level = thresholds.classify(mb as f64);
            assert!(level >= previous, "level dropped at {} MB", mb);
            previous = level;
        }

        assert_eq!(thresholds.classify(1999.0), PressureLevel::None);
        assert_eq!(thresholds.classify(2000.0), PressureLevel::Moderate);
        assert_eq!(thresholds.classify(3000.0), PressureLevel::High);
        assert_eq!(thresholds.classify(3600.0), PressureLevel::Critical);
    }

    #[test]
    fn test_cpu_classification() {
        let thresholds = CpuThresholds::default();
        assert_eq!(thresholds.classify(20.0), PressureLevel::None);
        assert_eq!(thresholds.classify(70.0), PressureLevel::Moderate);
        assert_eq!(thresholds.classify(90.0), PressureLevel::High);
        assert_eq!(thresholds.classify(99.0), PressureLevel::Critical);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let config = GovernorConfig {
            memory_thresholds: MemoryThresholds {
                moderate_mb: 3000.0,
                high_mb: 2000.0,
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnorderedThresholds { family: "memory", .. })
        ));
    }

    #[test]
    fn test_invalid_thread_bounds_rejected() {
        let config = GovernorConfig {
            min_threads: 4,
            max_threads: 2,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidThreadBounds { min: 4, max: 2 })
        );

        let config = GovernorConfig {
            min_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_cooldown_allowed_zero_interval_rejected() {
        let config = GovernorConfig {
            cooldown_secs: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = GovernorConfig {
            sampling_interval_secs: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration {
                field: "sampling_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_benchmark_sweep_validation() {
        let config = GovernorConfig {
            benchmark_thread_counts: vec![1, 0, 4],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBenchmarkSweep));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let config = GovernorConfig {
            cooldown_secs: 1e30,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationTooLong {
                field: "cooldown_secs",
                ..
            })
        ));

        let config = GovernorConfig {
            stop_timeout_secs: MAX_DURATION_SECS + 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = GovernorConfig {
            cooldown_secs: MAX_DURATION_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_leak_window_bounds() {
        for secs in [0, 10_000_000_000_000] {
            let config = GovernorConfig {
                leak_window_secs: secs,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidLeakWindow { .. })
            ));
        }
    }

    #[test]
    fn test_duration_accessors_clamp_unvalidated_values() {
        let config = GovernorConfig {
            cooldown_secs: 1e30,
            sampling_interval_secs: f64::NAN,
            stop_timeout_secs: -3.0,
            leak_window_secs: u64::MAX,
            ..Default::default()
        };
        let week = Duration::from_secs_f64(MAX_DURATION_SECS);

        assert_eq!(config.cooldown(), week);
        assert_eq!(config.sampling_interval(), Duration::ZERO);
        assert_eq!(config.stop_timeout(), Duration::ZERO);
        assert_eq!(config.leak_window(), week);
    }

    #[test]
    fn test_effective_max_threads_capped_by_cores() {
        let config = GovernorConfig::default();
        assert_eq!(config.effective_max_threads(4), 4);
        assert_eq!(config.effective_max_threads(32), 8);
        // Never below the lower bound
        assert_eq!(config.effective_max_threads(0), 1);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let json = r#"{"max_threads": 4, "memory_thresholds": {"critical_mb": 5000.0}}"#;
        let config: GovernorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.max_threads, 4);
        assert_eq!(config.memory_thresholds.critical_mb, 5000.0);
        assert_eq!(config.memory_thresholds.moderate_mb, 2000.0);
        assert_eq!(config.history_size, 600);
    }
}
