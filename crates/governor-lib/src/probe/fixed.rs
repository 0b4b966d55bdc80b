//! Settable probe for tests and deterministic simulations

use super::{CpuReading, MemoryReading, SystemProbe};
use crate::models::LoadAverage;
use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Probe that reports whatever values were last set on it
pub struct FixedProbe {
    memory: Mutex<MemoryReading>,
    cpu: Mutex<CpuReading>,
    logical_cores: AtomicUsize,
    physical_cores: AtomicUsize,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl FixedProbe {
    /// Idle host: 500 MB RSS, 30% host memory, 10% CPU
    pub fn new(logical_cores: usize, physical_cores: usize) -> Self {
        let logical_cores = logical_cores.max(1);
        Self {
            memory: Mutex::new(MemoryReading {
                rss_bytes: mb_to_bytes(500.0),
                virtual_bytes: mb_to_bytes(1500.0),
                host_used_percent: 30.0,
                host_available_bytes: mb_to_bytes(8000.0),
            }),
            cpu: Mutex::new(CpuReading {
                host_percent: 10.0,
                process_percent: 5.0,
                load_average: Some(LoadAverage {
                    one: 0.5,
                    five: 0.4,
                    fifteen: 0.3,
                }),
            }),
            logical_cores: AtomicUsize::new(logical_cores),
            physical_cores: AtomicUsize::new(physical_cores.clamp(1, logical_cores)),
            failing: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn set_rss_mb(&self, rss_mb: f64) {
        lock(&self.memory).rss_bytes = mb_to_bytes(rss_mb);
    }

    pub fn set_host_memory_percent(&self, percent: f64) {
        lock(&self.memory).host_used_percent = percent;
    }

    pub fn set_memory(&self, reading: MemoryReading) {
        *lock(&self.memory) = reading;
    }

    pub fn set_cpu_percent(&self, percent: f64) {
        lock(&self.cpu).host_percent = percent;
    }

    pub fn set_load_average(&self, load: Option<LoadAverage>) {
        lock(&self.cpu).load_average = load;
    }

    pub fn set_cores(&self, logical: usize, physical: usize) {
        let logical = logical.max(1);
        self.logical_cores.store(logical, Ordering::SeqCst);
        self.physical_cores
            .store(physical.clamp(1, logical), Ordering::SeqCst);
    }

    /// Make every subsequent read fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Total number of memory and CPU reads served
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("Probe configured to fail");
        }
        Ok(())
    }
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self::new(8, 4)
    }
}

impl SystemProbe for FixedProbe {
    fn memory(&self) -> Result<MemoryReading> {
        self.check()?;
        Ok(*lock(&self.memory))
    }

    fn cpu(&self) -> Result<CpuReading> {
        self.check()?;
        Ok(*lock(&self.cpu))
    }

    fn logical_cores(&self) -> usize {
        self.logical_cores.load(Ordering::SeqCst)
    }

    fn physical_cores(&self) -> usize {
        self.physical_cores.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb.max(0.0) * BYTES_PER_MB) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_round_trip_through_setters() {
        let probe = FixedProbe::new(16, 8);
        probe.set_rss_mb(3600.0);
        probe.set_cpu_percent(42.0);

        let memory = probe.memory().unwrap();
        assert_eq!(memory.rss_bytes, 3600 * 1024 * 1024);
        assert_eq!(probe.cpu().unwrap().host_percent, 42.0);
        assert_eq!(probe.logical_cores(), 16);
        assert_eq!(probe.physical_cores(), 8);
        assert_eq!(probe.read_count(), 2);
    }

    #[test]
    fn test_failing_probe() {
        let probe = FixedProbe::default();
        probe.set_failing(true);
        assert!(probe.memory().is_err());
        assert!(probe.cpu().is_err());

        probe.set_failing(false);
        assert!(probe.memory().is_ok());
    }

    #[test]
    fn test_physical_never_exceeds_logical() {
        let probe = FixedProbe::new(2, 8);
        assert_eq!(probe.physical_cores(), 2);
    }
}
