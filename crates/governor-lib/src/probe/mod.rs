//! Host telemetry sources
//!
//! Monitors never read the operating system directly; they go through a
//! [`SystemProbe`]. The default probe is backed by `sysinfo`, and a settable
//! [`FixedProbe`] stands in for it in tests and simulations.

mod fixed;
mod reclaim;
mod system;

pub use fixed::FixedProbe;
pub use reclaim::{CallbackReclaimer, HeapTrimReclaimer, Reclaimer};
pub use system::SysinfoProbe;

use crate::models::LoadAverage;
use anyhow::Result;
use std::sync::Arc;

/// Raw memory figures, in bytes and percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub rss_bytes: u64,
    pub virtual_bytes: u64,
    pub host_used_percent: f64,
    pub host_available_bytes: u64,
}

/// Raw CPU figures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CpuReading {
    pub host_percent: f64,
    pub process_percent: f64,
    pub load_average: Option<LoadAverage>,
}

/// Trait for telemetry sources
pub trait SystemProbe: Send + Sync {
    /// Read current memory usage of this process and the host
    fn memory(&self) -> Result<MemoryReading>;

    /// Read current CPU utilization
    fn cpu(&self) -> Result<CpuReading>;

    fn logical_cores(&self) -> usize;

    fn physical_cores(&self) -> usize;
}

/// Create the default probe for this host
pub fn default_probe() -> Arc<dyn SystemProbe> {
    let probe = SysinfoProbe::new();
    tracing::debug!(
        logical_cores = probe.logical_cores(),
        physical_cores = probe.physical_cores(),
        "Using sysinfo telemetry probe"
    );
    Arc::new(probe)
}
