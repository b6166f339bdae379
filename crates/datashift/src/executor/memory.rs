//! Memory pressure handling for the row loop.
//!
//! The executor checks resident memory between rows against a configured
//! ceiling. Above the threshold it walks a reclaim ladder, re-probing after
//! each step, and fails the run only when every rung is exhausted.

use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::{debug, warn};

use crate::driver::{DestinationDriver, SourceDriver};
use crate::error::{MigrateError, Result};
use crate::refstore::ReferenceStore;

/// Source of resident-memory readings.
pub trait MemoryProbe: Send {
    /// Bytes currently used by the process.
    fn used_bytes(&mut self) -> u64;
}

/// Probe backed by the operating system's process accounting.
pub struct ProcessMemoryProbe {
    system: System,
    pid: Pid,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn used_bytes(&mut self) -> u64 {
        self.system
            .refresh_process_specifics(self.pid, ProcessRefreshKind::new().with_memory());
        self.system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0)
    }
}

/// Enforces the configured memory ceiling during a run.
pub struct MemoryGuard {
    probe: Box<dyn MemoryProbe>,
    limit_bytes: u64,
    threshold: f64,
}

impl MemoryGuard {
    /// Guard enforcing `limit_bytes`, reclaiming above `threshold` of it.
    pub fn new(limit_bytes: u64, threshold: f64) -> Self {
        Self::with_probe(Box::new(ProcessMemoryProbe::new()), limit_bytes, threshold)
    }

    /// Guard with an injected probe, for deterministic tests.
    pub fn with_probe(probe: Box<dyn MemoryProbe>, limit_bytes: u64, threshold: f64) -> Self {
        Self {
            probe,
            limit_bytes,
            threshold,
        }
    }

    fn ceiling(&self) -> u64 {
        (self.limit_bytes as f64 * self.threshold) as u64
    }

    /// Check usage and reclaim if needed.
    ///
    /// The ladder frees the reference cache first, then source buffers, then
    /// destination buffers, re-probing after each step. Returns
    /// [`MigrateError::OutOfMemory`] when usage still exceeds the ceiling
    /// after all three.
    pub async fn ensure_capacity(
        &mut self,
        references: &mut ReferenceStore,
        source: &mut dyn SourceDriver,
        destination: &mut dyn DestinationDriver,
    ) -> Result<()> {
        let ceiling = self.ceiling();
        let mut used = self.probe.used_bytes();
        if used <= ceiling {
            return Ok(());
        }

        warn!(
            "Memory usage {} bytes above ceiling {} bytes, reclaiming",
            used, ceiling
        );

        references.free_memory().await;
        used = self.probe.used_bytes();
        if used <= ceiling {
            debug!("Reference cache reclaim brought usage to {} bytes", used);
            return Ok(());
        }

        source.free_memory().await;
        used = self.probe.used_bytes();
        if used <= ceiling {
            debug!("Source reclaim brought usage to {} bytes", used);
            return Ok(());
        }

        destination.free_memory().await;
        used = self.probe.used_bytes();
        if used <= ceiling {
            debug!("Destination reclaim brought usage to {} bytes", used);
            return Ok(());
        }

        Err(MigrateError::OutOfMemory {
            used,
            limit: self.limit_bytes,
        })
    }
}
