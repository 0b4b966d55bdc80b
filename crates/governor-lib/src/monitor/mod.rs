//! Resource monitors
//!
//! Each monitor owns a bounded snapshot history and one background sampling
//! task. Public reads never wait for the sampling loop.

mod cpu;
mod memory;
mod sampler;
mod trend;

pub use cpu::{estimate_thread_count, CpuMonitor};
pub use memory::{MemoryLeak, MemoryMonitor};
pub use trend::{Trend, TrendDirection, TrendSummary};
