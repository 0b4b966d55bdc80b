//! Memory reclamation hooks
//!
//! Rust has no collector to force, so a reclamation pass hands freed heap
//! pages back to the operating system and runs any caller-supplied cache
//! release hooks.

use anyhow::Result;

/// A pass that tries to lower this process's memory footprint
pub trait Reclaimer: Send + Sync {
    fn reclaim(&self) -> Result<()>;
}

/// Returns free heap pages to the OS (glibc `malloc_trim`); no-op elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapTrimReclaimer;

impl Reclaimer for HeapTrimReclaimer {
    fn reclaim(&self) -> Result<()> {
        let released = trim_heap();
        tracing::debug!(released, "Heap trim requested");
        Ok(())
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() -> bool {
    // SAFETY: malloc_trim only walks allocator-internal free lists
    unsafe { libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() -> bool {
    false
}

/// Reclaimer that runs a closure, e.g. one that drops application caches
pub struct CallbackReclaimer<F> {
    callback: F,
}

impl<F> CallbackReclaimer<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Reclaimer for CallbackReclaimer<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn reclaim(&self) -> Result<()> {
        (self.callback)()
    }
}
