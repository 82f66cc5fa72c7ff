//! Performance Measurement Module
//!
//! Stage-level profiling for the analysis pipeline:
//! - Wall time per stage (`Instant`)
//! - Process resident memory before and after each stage (sysinfo)
//! - Items produced per stage
//! - Slow-stage detection against the configured timeout
//!
//! ```text
//! monitor.time_stage("06_absorption", || { ... })
//!     ├─ sample memory
//!     ├─ run closure
//!     ├─ sample memory
//!     └─ push StageMetrics
//! ```

pub mod memory;
pub mod report;

pub use memory::*;
pub use report::*;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Metrics for one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub duration_ms: f64,
    pub memory_before_bytes: u64,
    pub memory_after_bytes: u64,
    /// Rows, records or projects the stage produced
    pub items: u64,
    pub success: bool,
}

impl StageMetrics {
    pub fn memory_delta_bytes(&self) -> i64 {
        self.memory_after_bytes as i64 - self.memory_before_bytes as i64
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms / 1000.0
    }
}

/// Collects stage timings and memory samples for one pipeline run.
#[derive(Debug)]
pub struct PerformanceMonitor {
    pub memory: MemoryProfiler,
    pub start_time: Instant,
    timeout_secs: u64,
    memory_threshold: f64,
    stages: RwLock<Vec<StageMetrics>>,
}

impl PerformanceMonitor {
    pub fn new(timeout_secs: u64, memory_threshold: f64) -> Self {
        Self {
            memory: MemoryProfiler::new(),
            start_time: Instant::now(),
            timeout_secs,
            memory_threshold,
            stages: RwLock::new(Vec::new()),
        }
    }

    /// Run `f` as stage `name`, recording its duration and memory.
    ///
    /// The stage is recorded whether or not `f` succeeds; the error is
    /// returned unchanged.
    pub fn time_stage<T, E, F>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let before = self.memory.sample();
        info!(stage = name, "Stage started");
        let start = Instant::now();

        let result = f();

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let after = self.memory.sample();
        let success = result.is_ok();

        if after.system_usage() > self.memory_threshold {
            warn!(
                stage = name,
                usage = format!("{:.1}%", after.system_usage() * 100.0),
                "System memory above threshold"
            );
        }
        if duration_ms / 1000.0 > self.timeout_secs as f64 * SLOW_STAGE_FRACTION {
            warn!(stage = name, duration_ms, timeout_secs = self.timeout_secs, "Slow stage");
        }
        info!(
            stage = name,
            duration_ms = format!("{:.1}", duration_ms),
            memory = %format_bytes(after.process_resident_bytes),
            success,
            "Stage finished"
        );

        self.stages.write().push(StageMetrics {
            name: name.to_string(),
            duration_ms,
            memory_before_bytes: before.process_resident_bytes,
            memory_after_bytes: after.process_resident_bytes,
            items: 0,
            success,
        });
        result
    }

    /// Attach an item count to the most recent run of `name`.
    pub fn record_items(&self, name: &str, items: u64) {
        if let Some(stage) = self.stages.write().iter_mut().rev().find(|s| s.name == name) {
            stage.items = items;
        }
    }

    pub fn stages(&self) -> Vec<StageMetrics> {
        self.stages.read().clone()
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Generate a full performance report
    pub fn report(&self) -> PerformanceReport {
        PerformanceReport::new(
            chrono::Utc::now().timestamp(),
            self.elapsed_secs(),
            self.timeout_secs,
            self.stages(),
            self.memory.peak_resident_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_stage_records_success_and_failure() {
        let monitor = PerformanceMonitor::new(3600, 1.0);
        let ok: Result<u32, String> = monitor.time_stage("01_load", || Ok(7));
        assert_eq!(ok, Ok(7));
        monitor.record_items("01_load", 42);

        let err: Result<(), String> = monitor.time_stage("02_parse", || Err("bad".to_string()));
        assert!(err.is_err());

        let stages = monitor.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].name, "01_load");
        assert_eq!(stages[0].items, 42);
        assert!(stages[0].success);
        assert!(!stages[1].success);
        assert!(stages[0].duration_ms >= 0.0);
    }

    #[test]
    fn test_report_lists_stages() {
        let monitor = PerformanceMonitor::new(3600, 1.0);
        let _: Result<(), ()> = monitor.time_stage("stage", || Ok(()));
        let report = monitor.report();
        assert_eq!(report.stages.len(), 1);
        assert!(report.slow_stages.is_empty());
        assert!(report.executive_summary().contains("stage"));
    }
}
