use sysinfo::System;

/// How much the swap level may climb over its scan-start baseline before the
/// scan is flagged as spilling. Chosen from experience with our cosmics
/// build files and might not always be reasonable.
const SWAP_GROWTH_WARN_BYTES: u64 = 256 * 1024 * 1024;

/// Polls host memory so long scans can report utilization and flag the one
/// condition that silently ruins throughput: spilling to swap.
#[derive(Debug)]
pub struct MemoryMonitor {
    system: System,
    swap_baseline: u64,
    swap_warned: bool,
}

impl MemoryMonitor {
    /// Create a monitor, recording the current swap level as the baseline.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let swap_baseline = system.used_swap();
        Self {
            system,
            swap_baseline,
            swap_warned: false,
        }
    }

    /// Bytes of memory currently available to new allocations.
    pub fn available_bytes(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }

    /// Host memory utilization in percent.
    pub fn percent_used(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64 * 100.0
    }

    /// Warn (once per monitor) if swap usage has grown past the baseline by
    /// more than the threshold. Never aborts the scan.
    pub fn check_swap_growth(&mut self) {
        if self.swap_warned {
            return;
        }
        self.system.refresh_memory();
        let used = self.system.used_swap();
        if used.saturating_sub(self.swap_baseline) > SWAP_GROWTH_WARN_BYTES {
            self.swap_warned = true;
            log::warn!("No more free memory. Using swap now. This is much slower.");
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}
