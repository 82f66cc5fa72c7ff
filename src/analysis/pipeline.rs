//! Integrated Pipeline
//!
//! Runs every analysis stage in dependency order under the performance
//! monitor, writes the reports and validates the run as a whole.
//!
//! ```text
//! 01 load ─► 02 explore ─► 03 cancellations ─► 04 dedup ─► 05 matching
//!                                                              │
//! 09 community ◄─ 08 stage/risk ◄─ 07 dynamics ◄─ 06 absorption ◄┘
//!     │
//!     └─► 10 aggregation ─► 11 insights ─► 12 integrity ─► summary (+ run store)
//! ```
//!
//! Per-project work inside the stages runs on a rayon pool sized by
//! `processing.parallel_workers`.

use crate::analysis::absorption::{
    calculate_all, detect_anomalies, establish_benchmarks, validate_rates, Benchmarks,
};
use crate::analysis::aggregation::{
    aggregate_cities, aggregate_districts, distinct_regions, validate_consistency, write_city_report,
    write_district_report, CityReportRow, ConsistencyReport, DistrictReportRow,
};
use crate::analysis::cancellation::{analyze_cancellations, parse_all, CancellationAnalysis};
use crate::analysis::charts::{export_datasets, render_dashboard, DEFAULT_WIDTH};
use crate::analysis::community_report::{
    generate_community_report, report_quality_check, summarize_report, write_community_report,
    CommunityReportRow, ReportContext, ReportQuality, ReportSummary,
};
use crate::analysis::config::PipelineConfig;
use crate::analysis::dedup::{check_consistency, clean_transactions, detect_price_outliers, resolve_duplicates, DedupSummary};
use crate::analysis::dynamics::analyze_dynamics;
use crate::analysis::exploration::{explore, ExplorationReport};
use crate::analysis::export::write_json;
use crate::analysis::insights::{generate_insights, InsightInputs, InsightsReport};
use crate::analysis::loader::{load_projects, load_transactions, LoadReport};
use crate::analysis::matching::{
    build_project_index, estimate_missing_projects, match_projects, max_gross_rate, screen_active,
    validate_matching, ActiveProject, MatchingValidation, ProjectProfile,
};
use crate::analysis::records::TransactionRecord;
use crate::analysis::run_store::{config_fingerprint, RunRecord, RunStore};
use crate::analysis::stage_risk::assess_all;
use crate::analysis::stats::{mean, std_dev};
use crate::performance::{PerformanceMonitor, PerformanceReport, StageMetrics};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{info, warn};

// =============================================================================
// STAGES
// =============================================================================

pub const STAGE_LOAD: &str = "01_load";
pub const STAGE_EXPLORATION: &str = "02_exploration";
pub const STAGE_CANCELLATION: &str = "03_cancellation";
pub const STAGE_DEDUP: &str = "04_dedup";
pub const STAGE_MATCHING: &str = "05_matching";
pub const STAGE_ABSORPTION: &str = "06_absorption";
pub const STAGE_DYNAMICS: &str = "07_dynamics";
pub const STAGE_RISK: &str = "08_stage_risk";
pub const STAGE_COMMUNITY: &str = "09_community_report";
pub const STAGE_AGGREGATION: &str = "10_aggregation";
pub const STAGE_INSIGHTS: &str = "11_insights";
pub const STAGE_INTEGRITY: &str = "12_integrity";

/// Every stage, in execution order.
pub const STAGES: [&str; 12] = [
    STAGE_LOAD,
    STAGE_EXPLORATION,
    STAGE_CANCELLATION,
    STAGE_DEDUP,
    STAGE_MATCHING,
    STAGE_ABSORPTION,
    STAGE_DYNAMICS,
    STAGE_RISK,
    STAGE_COMMUNITY,
    STAGE_AGGREGATION,
    STAGE_INSIGHTS,
    STAGE_INTEGRITY,
];

pub const COMMUNITY_REPORT_FILE: &str = "community_report.csv";
pub const DISTRICT_REPORT_FILE: &str = "district_report.csv";
pub const CITY_REPORT_FILE: &str = "city_report.csv";
pub const INSIGHTS_FILE: &str = "insights.json";
pub const SUMMARY_FILE: &str = "pipeline_summary.json";
pub const PERFORMANCE_FILE: &str = "performance_report.txt";

/// Community rates must lie in 0..=COMMUNITY_RATE_MAX.
const COMMUNITY_RATE_MAX: f64 = 100.0;
/// District and city rates must lie in 0..=AGGREGATE_RATE_MAX.
const AGGREGATE_RATE_MAX: f64 = 120.0;
const CONSISTENCY_MIN_SCORE: f64 = 95.0;

fn stage<T>(monitor: &PerformanceMonitor, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    monitor
        .time_stage(name, f)
        .with_context(|| format!("Stage {} failed", name))
}

// =============================================================================
// INTEGRITY
// =============================================================================

/// One system-level check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrityCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub checks: Vec<IntegrityCheck>,
}

impl IntegrityReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &IntegrityCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    fn push(&mut self, name: &'static str, passed: bool, detail: String) {
        if !passed {
            warn!(check = name, detail = %detail, "Integrity check failed");
        }
        self.checks.push(IntegrityCheck { name, passed, detail });
    }
}

fn out_of_range<T>(rows: &[T], max: f64, rates: &[fn(&T) -> f64]) -> usize {
    rows.iter()
        .filter(|row| rates.iter().any(|get| !(0.0..=max).contains(&get(row))))
        .count()
}

/// Validate the finished reports, the consistency score and the stage
/// timings against `timeout_secs`.
pub fn validate_integrity(
    community: &[CommunityReportRow],
    districts: &[DistrictReportRow],
    cities: &[CityReportRow],
    consistency: &ConsistencyReport,
    stages: &[StageMetrics],
    timeout_secs: u64,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();

    let empty: Vec<&str> = [("community", community.len()), ("district", districts.len()), ("city", cities.len())]
        .into_iter()
        .filter(|(_, n)| *n == 0)
        .map(|(name, _)| name)
        .collect();
    report.push(
        "reports_non_empty",
        empty.is_empty(),
        if empty.is_empty() {
            format!("{} / {} / {} rows", community.len(), districts.len(), cities.len())
        } else {
            format!("empty reports: {}", empty.join(", "))
        },
    );

    let bad_community = out_of_range(
        community,
        COMMUNITY_RATE_MAX,
        &[
            |r: &CommunityReportRow| r.gross_rate,
            |r: &CommunityReportRow| r.net_rate,
            |r: &CommunityReportRow| r.adjusted_rate,
            |r: &CommunityReportRow| r.season_cancellation_rate,
            |r: &CommunityReportRow| r.cumulative_cancellation_rate,
        ],
    );
    report.push(
        "community_rates_in_range",
        bad_community == 0,
        format!("{} rows outside 0..={}", bad_community, COMMUNITY_RATE_MAX),
    );

    let bad_aggregate = out_of_range(
        districts,
        AGGREGATE_RATE_MAX,
        &[
            |d: &DistrictReportRow| d.net_rate,
            |d: &DistrictReportRow| d.normal_net_rate,
            |d: &DistrictReportRow| d.cancellation_rate,
        ],
    ) + out_of_range(
        cities,
        AGGREGATE_RATE_MAX,
        &[|c: &CityReportRow| c.net_rate, |c: &CityReportRow| c.cancellation_rate],
    );
    report.push(
        "aggregate_rates_in_range",
        bad_aggregate == 0,
        format!("{} rows outside 0..={}", bad_aggregate, AGGREGATE_RATE_MAX),
    );

    report.push(
        "consistency_score",
        consistency.overall_score >= CONSISTENCY_MIN_SCORE,
        format!("{:.1} (minimum {})", consistency.overall_score, CONSISTENCY_MIN_SCORE),
    );

    let total_secs: f64 = stages.iter().map(StageMetrics::duration_secs).sum();
    report.push(
        "within_timeout",
        total_secs <= timeout_secs as f64,
        format!("{:.2}s of {}s", total_secs, timeout_secs),
    );

    report
}

// =============================================================================
// SUMMARY
// =============================================================================

/// Everything a run measured, written as `pipeline_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub target_seasons: Vec<String>,
    pub loading: Vec<LoadReport>,
    pub exploration: ExplorationReport,
    pub cancellation: CancellationAnalysis,
    pub dedup: DedupSummary,
    /// IQR price outliers among clean records
    pub price_outliers: usize,
    /// Unit prices beyond `price_outlier_threshold` standard deviations
    pub zscore_outliers: usize,
    pub inconsistent_records: usize,
    pub matching: MatchingValidation,
    pub estimated_projects: usize,
    pub active_by_season: BTreeMap<String, usize>,
    pub absorption_computed: usize,
    pub absorption_failed: usize,
    pub invalid_rates: usize,
    pub anomalies: usize,
    pub benchmarks: Benchmarks,
    pub report_quality: ReportQuality,
    pub report: ReportSummary,
    pub consistency: ConsistencyReport,
    pub counties: usize,
    pub districts: usize,
    pub seasons: usize,
    pub high_cancellation_rows: usize,
    pub high_performance_rows: usize,
    pub quality_warnings: Vec<String>,
    pub integrity: IntegrityReport,
    pub performance: PerformanceReport,
}

/// Reports and verdicts of one run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub community: Vec<CommunityReportRow>,
    pub districts: Vec<DistrictReportRow>,
    pub cities: Vec<CityReportRow>,
    pub insights: InsightsReport,
    pub summary: PipelineSummary,
    pub integrity: IntegrityReport,
    pub performance: PerformanceReport,
    /// Files written under the output directory
    pub outputs: Vec<PathBuf>,
}

impl PipelineOutcome {
    pub fn passed(&self) -> bool {
        self.integrity.passed()
    }
}

fn zscore_outliers(clean: &[TransactionRecord], threshold: f64) -> usize {
    let prices: Vec<f64> = clean.iter().filter_map(|r| r.unit_price).filter(|p| *p > 0.0).collect();
    let sd = std_dev(&prices);
    if sd == 0.0 {
        return 0;
    }
    let m = mean(&prices);
    prices.iter().filter(|p| ((**p - m) / sd).abs() > threshold).count()
}

struct MatchingStage {
    profiles: BTreeMap<String, ProjectProfile>,
    active: Vec<ActiveProject>,
    validation: MatchingValidation,
    estimated: usize,
}

// =============================================================================
// PIPELINE
// =============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    export_charts: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config, export_charts: false }
    }

    /// Also write the chart datasets and a text dashboard under
    /// `<output_dir>/charts`.
    pub fn with_chart_export(mut self, enabled: bool) -> Self {
        self.export_charts = enabled;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage and write the outputs.
    pub fn run(&self) -> Result<PipelineOutcome> {
        self.config.validate().context("Invalid pipeline configuration")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.processing.parallel_workers)
            .build()
            .context("Failed to build worker pool")?;
        pool.install(|| self.run_stages())
    }

    fn run_stages(&self) -> Result<PipelineOutcome> {
        let cfg = &self.config;
        let paths = &cfg.data_paths;
        let started_at = Utc::now();
        let monitor = PerformanceMonitor::new(cfg.processing.timeout_seconds, cfg.processing.memory_threshold);
        let targets = cfg.sorted_target_seasons();
        let mut outputs = Vec::new();
        let mut quality_warnings = Vec::new();

        info!(
            transactions = %paths.pre_sale_data.display(),
            projects = %paths.sale_data.display(),
            seasons = ?targets.iter().map(ToString::to_string).collect::<Vec<_>>(),
            workers = cfg.processing.parallel_workers,
            "Pipeline started"
        );

        // 01
        let (transactions, projects) = stage(&monitor, STAGE_LOAD, || {
            let transactions = load_transactions(&paths.pre_sale_data, cfg.processing.price_unit)?;
            let projects = load_projects(&paths.sale_data)?;
            Ok((transactions, projects))
        })?;
        monitor.record_items(STAGE_LOAD, (transactions.records.len() + projects.records.len()) as u64);

        // 02
        let exploration = stage(&monitor, STAGE_EXPLORATION, || {
            Ok(explore(&transactions.raw, &projects.raw, cfg.quality_thresholds.min_completeness))
        })?;
        if !exploration.passes {
            for issue in &exploration.issues {
                warn!(issue = %issue, "Exploration quality issue");
            }
        }
        quality_warnings.extend(exploration.issues.iter().cloned());

        // 03
        let units_by_code: HashMap<String, u32> = projects
            .records
            .iter()
            .filter_map(|p| p.total_units.map(|u| (p.code.clone(), u)))
            .collect();
        let cancellation = stage(&monitor, STAGE_CANCELLATION, || {
            let parsed = parse_all(&transactions.records);
            Ok(analyze_cancellations(&transactions.records, &parsed, &units_by_code))
        })?;
        monitor.record_items(STAGE_CANCELLATION, cancellation.cancelled_transactions as u64);
        let max_cancellation_pct = cfg.quality_thresholds.max_cancellation_rate * 100.0;
        if cancellation.cancellation_rate > max_cancellation_pct {
            let message = format!(
                "Cancellation rate {:.2}% exceeds {:.2}%",
                cancellation.cancellation_rate, max_cancellation_pct
            );
            warn!("{}", message);
            quality_warnings.push(message);
        }

        // 04
        let (dedup, clean, price_outliers, inconsistent_records) = stage(&monitor, STAGE_DEDUP, || {
            let outcome = resolve_duplicates(&transactions.records);
            let clean = clean_transactions(&transactions.records, &outcome);
            let outliers = detect_price_outliers(&clean);
            let issues = check_consistency(&clean);
            Ok((
                outcome.summary,
                clean,
                outliers.unit_price_outliers.len() + outliers.total_price_outliers.len(),
                issues.total(),
            ))
        })?;
        monitor.record_items(STAGE_DEDUP, clean.len() as u64);
        let zscore_outliers = zscore_outliers(&clean, cfg.analysis.price_outlier_threshold);

        // 05
        let matching = stage(&monitor, STAGE_MATCHING, || {
            let outcome = match_projects(&projects.records, &clean);
            let estimates = estimate_missing_projects(&outcome, &clean);
            let profiles = build_project_index(&projects.records, &estimates, &clean);
            let active: Vec<ActiveProject> = targets
                .iter()
                .flat_map(|t| screen_active(&profiles, &clean, *t, cfg.analysis.stagnant_threshold))
                .collect();
            let validation = validate_matching(&outcome, &estimates, &active, max_gross_rate(&profiles, &clean));
            Ok(MatchingStage { profiles, active, validation, estimated: estimates.len() })
        })?;
        monitor.record_items(STAGE_MATCHING, matching.active.len() as u64);
        quality_warnings.extend(matching.validation.issues.iter().cloned());
        let mut active_by_season = BTreeMap::new();
        for a in &matching.active {
            *active_by_season.entry(a.target.to_string()).or_insert(0) += 1;
        }

        // 06
        let requests: Vec<_> = matching.active.iter().map(|a| (a.code.clone(), a.target)).collect();
        let (absorption, invalid_rates, anomalies, benchmarks) = stage(&monitor, STAGE_ABSORPTION, || {
            let run = calculate_all(&matching.profiles, &clean, &requests, cfg.analysis.analysis_date);
            let invalid = run.results.iter().filter(|r| !validate_rates(r).is_valid()).count();
            let anomalies = detect_anomalies(&run.results).len();
            let benchmarks = establish_benchmarks(&run.results);
            Ok((run, invalid, anomalies, benchmarks))
        })?;
        monitor.record_items(STAGE_ABSORPTION, absorption.results.len() as u64);
        let (min_rate, max_rate) = (
            cfg.quality_thresholds.min_absorption_rate * 100.0,
            cfg.quality_thresholds.max_absorption_rate * 100.0,
        );
        let outside_bounds = absorption
            .results
            .iter()
            .filter(|r| r.net_rate < min_rate || r.net_rate > max_rate)
            .count();
        if outside_bounds > 0 {
            quality_warnings.push(format!(
                "{} results have net absorption outside {:.0}%..{:.0}%",
                outside_bounds, min_rate, max_rate
            ));
        }

        // 07
        let dynamics = stage(&monitor, STAGE_DYNAMICS, || Ok(analyze_dynamics(&absorption.results)))?;
        monitor.record_items(STAGE_DYNAMICS, dynamics.len() as u64);

        // 08
        let stage_risk = stage(&monitor, STAGE_RISK, || Ok(assess_all(&absorption.results, &dynamics, &clean)))?;
        monitor.record_items(STAGE_RISK, stage_risk.len() as u64);

        // 09
        let community_path = paths.output_dir.join(COMMUNITY_REPORT_FILE);
        let (community, report_quality, report) = stage(&monitor, STAGE_COMMUNITY, || {
            let ctx = ReportContext {
                profiles: &matching.profiles,
                clean: &clean,
                absorption: &absorption,
                dynamics: &dynamics,
                stage_risk: &stage_risk,
            };
            let rows = generate_community_report(&ctx);
            let quality = report_quality_check(&rows);
            let summary = summarize_report(&rows);
            write_community_report(&community_path, &rows)?;
            Ok((rows, quality, summary))
        })?;
        monitor.record_items(STAGE_COMMUNITY, community.len() as u64);
        outputs.push(community_path);
        quality_warnings.extend(report_quality.issues.iter().cloned());

        // 10
        let district_path = paths.output_dir.join(DISTRICT_REPORT_FILE);
        let city_path = paths.output_dir.join(CITY_REPORT_FILE);
        let (districts, cities, consistency) = stage(&monitor, STAGE_AGGREGATION, || {
            let districts = aggregate_districts(&community);
            let cities = aggregate_cities(&community, &districts);
            let consistency = validate_consistency(&community, &districts, &cities);
            write_district_report(&district_path, &districts)?;
            write_city_report(&city_path, &cities)?;
            Ok((districts, cities, consistency))
        })?;
        monitor.record_items(STAGE_AGGREGATION, (districts.len() + cities.len()) as u64);
        outputs.push(district_path);
        outputs.push(city_path);

        // 11
        let insights_path = paths.output_dir.join(INSIGHTS_FILE);
        let charts_dir = paths.output_dir.join("charts");
        let (insights, chart_files) = stage(&monitor, STAGE_INSIGHTS, || {
            let inputs = InsightInputs { community: &community, districts: &districts, cities: &cities };
            let insights = generate_insights(&inputs);
            write_json(&insights_path, &insights)?;

            let mut chart_files = Vec::new();
            if self.export_charts {
                chart_files = export_datasets(&charts_dir, &insights)?;
                let dashboard = charts_dir.join("dashboard.txt");
                std::fs::write(&dashboard, render_dashboard(&insights, DEFAULT_WIDTH))
                    .with_context(|| format!("Failed to write {}", dashboard.display()))?;
                chart_files.push(dashboard);
            }
            Ok((insights, chart_files))
        })?;
        outputs.push(insights_path);
        outputs.extend(chart_files);

        // 12
        let integrity = stage(&monitor, STAGE_INTEGRITY, || {
            Ok(validate_integrity(
                &community,
                &districts,
                &cities,
                &consistency,
                &monitor.stages(),
                cfg.processing.timeout_seconds,
            ))
        })?;

        let performance = monitor.report();
        let (counties, district_count, seasons) = distinct_regions(&community);
        let high_cancellation_pct = cfg.analysis.cancellation_risk_threshold * 100.0;
        let high_performance_pct = cfg.analysis.high_performance_threshold * 100.0;

        let mut summary = PipelineSummary {
            run_id: None,
            started_at,
            target_seasons: targets.iter().map(ToString::to_string).collect(),
            loading: vec![transactions.report.clone(), projects.report.clone()],
            exploration,
            cancellation,
            dedup,
            price_outliers,
            zscore_outliers,
            inconsistent_records,
            matching: matching.validation.clone(),
            estimated_projects: matching.estimated,
            active_by_season,
            absorption_computed: absorption.results.len(),
            absorption_failed: absorption.errors.len(),
            invalid_rates,
            anomalies,
            benchmarks,
            report_quality,
            report,
            consistency,
            counties,
            districts: district_count,
            seasons,
            high_cancellation_rows: community
                .iter()
                .filter(|r| r.cumulative_cancellation_rate > high_cancellation_pct)
                .count(),
            high_performance_rows: community.iter().filter(|r| r.net_rate >= high_performance_pct).count(),
            quality_warnings,
            integrity: integrity.clone(),
            performance: performance.clone(),
        };

        if let Some(db_path) = &paths.run_db {
            let record = RunRecord {
                run_id: uuid::Uuid::new_v4().to_string(),
                started_at,
                config_fingerprint: config_fingerprint(cfg)?,
                target_seasons: summary.target_seasons.clone(),
                total_secs: performance.total_secs,
                stages: performance.stages.clone(),
                integrity_passed: integrity.passed(),
                community_rows: community.len(),
            };
            let store = RunStore::open(db_path)?;
            store.record_run(&record, &community)?;
            summary.run_id = Some(record.run_id);
        }

        let summary_path = paths.output_dir.join(SUMMARY_FILE);
        write_json(&summary_path, &summary)?;
        outputs.push(summary_path);

        std::fs::create_dir_all(&paths.logs_dir)
            .with_context(|| format!("Failed to create {}", paths.logs_dir.display()))?;
        let performance_path = paths.logs_dir.join(PERFORMANCE_FILE);
        std::fs::write(&performance_path, performance.executive_summary())
            .with_context(|| format!("Failed to write {}", performance_path.display()))?;

        info!(
            community = community.len(),
            districts = districts.len(),
            cities = cities.len(),
            integrity = integrity.passed(),
            total_secs = format!("{:.2}", performance.total_secs),
            "Pipeline complete"
        );

        Ok(PipelineOutcome {
            community,
            districts,
            cities,
            insights,
            summary,
            integrity,
            performance,
            outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consistency(score: f64) -> ConsistencyReport {
        ConsistencyReport { overall_score: score, ..Default::default() }
    }

    fn timing(secs: f64) -> StageMetrics {
        StageMetrics {
            name: STAGE_LOAD.to_string(),
            duration_ms: secs * 1000.0,
            memory_before_bytes: 0,
            memory_after_bytes: 0,
            items: 0,
            success: true,
        }
    }

    #[test]
    fn test_integrity_fails_on_empty_reports() {
        let report = validate_integrity(&[], &[], &[], &consistency(100.0), &[timing(1.0)], 60);
        assert!(!report.passed());
        let failed: Vec<&str> = report.failures().map(|c| c.name).collect();
        assert_eq!(failed, vec!["reports_non_empty"]);
        assert!(report.checks[0].detail.contains("community, district, city"));
    }

    #[test]
    fn test_integrity_checks_score_and_timeout() {
        let report = validate_integrity(&[], &[], &[], &consistency(90.0), &[timing(30.0), timing(40.0)], 60);
        let failed: Vec<&str> = report.failures().map(|c| c.name).collect();
        assert_eq!(failed, vec!["reports_non_empty", "consistency_score", "within_timeout"]);
    }

    #[test]
    fn test_stage_names_ordered() {
        let mut sorted = STAGES;
        sorted.sort();
        assert_eq!(sorted, STAGES);
        assert_eq!(STAGES.len(), 12);
    }
}
