use std::sync::{Arc, Mutex};

/// Snapshot of a running scan, updated once per batch.
///
/// Scans are single-threaded; the status exists so a UI (typically the CLI
/// progress bar) can poll from another thread without touching the scan.
#[derive(Debug, Clone, Default)]
pub struct ScanStatus {
    /// Raw events scanned over total raw events, in [0, 1].
    pub fraction: f32,
    /// Rows passing the trigger so far (event-selection scans).
    pub n_triggered: u64,
    /// Grid cells resolved so far (mask builds).
    pub cells_found: u64,
    /// Host memory utilization in percent at the last poll.
    pub memory_percent: f32,
}

pub type SharedStatus = Arc<Mutex<ScanStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(ScanStatus::default()))
}

/// Overwrite the shared snapshot, ignoring a poisoned lock (a panicked UI
/// thread must not kill the scan).
pub fn publish(status: Option<&SharedStatus>, snapshot: ScanStatus) {
    if let Some(shared) = status {
        if let Ok(mut guard) = shared.lock() {
            *guard = snapshot;
        }
    }
}
