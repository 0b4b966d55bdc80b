//! sysinfo-backed probe
//!
//! Reads process RSS/virtual size, host memory and CPU utilization through
//! `sysinfo`, and core counts through `num_cpus`.

use super::{CpuReading, MemoryReading, SystemProbe};
use crate::models::LoadAverage;
use anyhow::{anyhow, bail, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};
use sysinfo::{Pid, System};

/// Probe for the current process on the local host
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    logical_cores: usize,
    physical_cores: usize,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        // CPU usage is a delta between refreshes; prime the first one
        system.refresh_cpu();

        let pid = sysinfo::get_current_pid().ok();
        if let Some(pid) = pid {
            system.refresh_process(pid);
        }

        let logical_cores = num_cpus::get().max(1);
        let physical_cores = num_cpus::get_physical().clamp(1, logical_cores);

        Self {
            system: Mutex::new(system),
            pid,
            logical_cores,
            physical_cores,
        }
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for SysinfoProbe {
    fn memory(&self) -> Result<MemoryReading> {
        let pid = self.pid.ok_or_else(|| anyhow!("Current process id unavailable"))?;
        let mut system = self.system();

        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            bail!("Host memory totals unavailable");
        }

        if !system.refresh_process(pid) {
            bail!("Process {} not found", pid);
        }
        let process = system
            .process(pid)
            .ok_or_else(|| anyhow!("Process {} not found", pid))?;

        Ok(MemoryReading {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
            host_used_percent: system.used_memory() as f64 / total as f64 * 100.0,
            host_available_bytes: system.available_memory(),
        })
    }

    fn cpu(&self) -> Result<CpuReading> {
        let mut system = self.system();

        system.refresh_cpu();
        let host_percent = system.global_cpu_info().cpu_usage() as f64;

        let process_percent = match self.pid {
            Some(pid) if system.refresh_process(pid) => system
                .process(pid)
                .map(|p| p.cpu_usage() as f64)
                .unwrap_or(0.0),
            _ => 0.0,
        };

        Ok(CpuReading {
            host_percent,
            process_percent,
            load_average: load_average(),
        })
    }

    fn logical_cores(&self) -> usize {
        self.logical_cores
    }

    fn physical_cores(&self) -> usize {
        self.physical_cores
    }
}

#[cfg(unix)]
fn load_average() -> Option<LoadAverage> {
    let load = System::load_average();
    Some(LoadAverage {
        one: load.one,
        five: load.five,
        fifteen: load.fifteen,
    })
}

#[cfg(not(unix))]
fn load_average() -> Option<LoadAverage> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_counts_are_consistent() {
        let probe = SysinfoProbe::new();
        assert!(probe.logical_cores() >= 1);
        assert!(probe.physical_cores() >= 1);
        assert!(probe.physical_cores() <= probe.logical_cores());
    }

    #[test]
    fn test_memory_reading_for_current_process() {
        let probe = SysinfoProbe::new();
        // Some sandboxes hide /proc; only check the contract when a read succeeds
        if let Ok(reading) = probe.memory() {
            assert!(reading.rss_bytes > 0);
            assert!(reading.host_used_percent >= 0.0);
            assert!(reading.host_used_percent <= 100.0);
        }
    }

    #[test]
    fn test_cpu_reading_is_bounded() {
        let probe = SysinfoProbe::new();
        let reading = probe.cpu().unwrap();
        assert!(reading.host_percent >= 0.0);
        assert!(reading.host_percent <= 100.0 + f64::EPSILON);
    }
}
