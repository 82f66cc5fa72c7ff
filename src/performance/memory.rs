//! Memory Profiling
//!
//! Samples process and system memory via sysinfo and tracks the peak
//! resident size seen across samples.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// One memory reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub process_resident_bytes: u64,
    pub process_virtual_bytes: u64,
}

impl MemorySample {
    /// Used / total system memory, 0..=1.
    pub fn system_usage(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.total_bytes as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryProfiler {
    peak_resident_bytes: AtomicU64,
    samples: AtomicU64,
}

impl MemoryProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read current memory usage. Uses a cached `System` instance, refreshing
    /// only memory and this process.
    pub fn sample(&self) -> MemorySample {
        static CACHED_SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();
        let mut sys = CACHED_SYSTEM.get_or_init(|| Mutex::new(System::new())).lock();

        sys.refresh_memory();
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[pid]),
            ProcessRefreshKind::new().with_memory(),
        );
        let (resident, virtual_mem) = sys
            .process(pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or((0, 0));

        self.samples.fetch_add(1, Ordering::Relaxed);
        self.peak_resident_bytes.fetch_max(resident, Ordering::Relaxed);

        MemorySample {
            total_bytes: sys.total_memory(),
            available_bytes: sys.available_memory(),
            used_bytes: sys.used_memory(),
            process_resident_bytes: resident,
            process_virtual_bytes: virtual_mem,
        }
    }

    pub fn peak_resident_bytes(&self) -> u64 {
        self.peak_resident_bytes.load(Ordering::Relaxed)
    }

    pub fn sample_count(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

/// Helper to format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
