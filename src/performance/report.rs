//! Performance Report Generation
//!
//! Summarises a pipeline run's stage timings and memory for logs and the
//! run summary file.

use serde::{Deserialize, Serialize};

use super::{memory::format_bytes, StageMetrics};

/// A stage is slow once it uses this share of the configured timeout.
pub const SLOW_STAGE_FRACTION: f64 = 0.5;

/// Full performance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub timestamp: i64,
    pub total_secs: f64,
    pub timeout_secs: u64,
    pub stages: Vec<StageMetrics>,
    pub peak_resident_bytes: u64,
    /// Names of stages above `SLOW_STAGE_FRACTION` of the timeout
    pub slow_stages: Vec<String>,
}

impl PerformanceReport {
    pub fn new(
        timestamp: i64,
        total_secs: f64,
        timeout_secs: u64,
        stages: Vec<StageMetrics>,
        peak_resident_bytes: u64,
    ) -> Self {
        let limit = timeout_secs as f64 * SLOW_STAGE_FRACTION;
        let slow_stages = stages
            .iter()
            .filter(|s| s.duration_secs() > limit)
            .map(|s| s.name.clone())
            .collect();
        Self { timestamp, total_secs, timeout_secs, stages, peak_resident_bytes, slow_stages }
    }

    /// Every stage finished inside the timeout.
    pub fn within_timeout(&self) -> bool {
        self.stages.iter().all(|s| s.duration_secs() <= self.timeout_secs as f64)
    }

    pub fn slowest_stage(&self) -> Option<&StageMetrics> {
        self.stages.iter().max_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms))
    }

    /// Generate executive summary (text)
    pub fn executive_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str(&format!(
            "=== Pipeline Performance Report ===\n\
             Timestamp: {}\n\
             Total time: {:.2}s (timeout {}s)\n\
             Peak memory: {}\n\n",
            chrono::DateTime::from_timestamp(self.timestamp, 0)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string()),
            self.total_secs,
            self.timeout_secs,
            format_bytes(self.peak_resident_bytes),
        ));

        summary.push_str("STAGES:\n");
        for stage in &self.stages {
            summary.push_str(&format!(
                "  {} {:<28} {:>10.1}ms  {:>10}  items {}\n",
                if stage.success { "✓" } else { "✗" },
                stage.name,
                stage.duration_ms,
                format_bytes(stage.memory_after_bytes),
                stage.items,
            ));
        }

        if let Some(slowest) = self.slowest_stage() {
            summary.push_str(&format!("\nSlowest stage: {} ({:.1}ms)\n", slowest.name, slowest.duration_ms));
        }
        if !self.slow_stages.is_empty() {
            summary.push_str("\nIssues Detected:\n");
            for name in &self.slow_stages {
                summary.push_str(&format!("  - {} exceeded {:.0}% of the timeout\n", name, SLOW_STAGE_FRACTION * 100.0));
            }
        }

        summary
    }

    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str, ms: f64) -> StageMetrics {
        StageMetrics {
            name: name.to_string(),
            duration_ms: ms,
            memory_before_bytes: 1024,
            memory_after_bytes: 4096,
            items: 10,
            success: true,
        }
    }

    #[test]
    fn test_slow_stages_flagged() {
        let report = PerformanceReport::new(0, 70.0, 100, vec![stage("fast", 1_000.0), stage("slow", 60_000.0)], 0);
        assert_eq!(report.slow_stages, vec!["slow".to_string()]);
        assert!(report.within_timeout());
        assert_eq!(report.slowest_stage().map(|s| s.name.as_str()), Some("slow"));
        assert!(report.executive_summary().contains("slow exceeded 50% of the timeout"));
    }

    #[test]
    fn test_timeout_exceeded() {
        let report = PerformanceReport::new(0, 200.0, 100, vec![stage("stuck", 150_000.0)], 0);
        assert!(!report.within_timeout());
        assert_eq!(report.stages[0].memory_delta_bytes(), 3072);
    }
}
