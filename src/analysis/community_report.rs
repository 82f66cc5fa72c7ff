//! Community-Level Report
//!
//! Flattens absorption, dynamics and stage/risk results into one 32-field row
//! per (project, target season). Field groups, in column order:
//!
//! ```text
//! basic (7) │ time (5) │ cancellation (6) │ absorption (3) │ dynamics (4)
//! price (3) │ stage (3) │ quality (1)
//! ```
//!
//! Column headers are the Chinese names used by the downstream reports; the
//! CSV writer takes them from the serde renames below.

use crate::analysis::absorption::AbsorptionRun;
use crate::analysis::dynamics::{DynamicsRecord, EfficiencyGrade, UNPREDICTABLE_SEASONS};
use crate::analysis::export::write_csv;
use crate::analysis::matching::{ProjectProfile, DEFAULT_UNITS};
use crate::analysis::records::TransactionRecord;
use crate::analysis::season::YearSeason;
use crate::analysis::stage_risk::StageRiskRecord;
use crate::analysis::stats::{mean, quantile, round_to};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Minimum sales days for a start season to count as complete.
const MIN_COMPLETE_SALES_DAYS: u32 = 80;

const MAX_UNIT_PRICE: f64 = 300.0;
const MAX_AREA: f64 = 200.0;
const MAX_TOTAL_PRICE: f64 = 50_000.0;

// =============================================================================
// ROW
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityReportRow {
    // Basic
    #[serde(rename = "備查編號")]
    pub code: String,
    #[serde(rename = "社區名稱")]
    pub name: String,
    #[serde(rename = "縣市")]
    pub county: String,
    #[serde(rename = "行政區")]
    pub district: String,
    #[serde(rename = "坐落街道")]
    pub street: String,
    #[serde(rename = "總戶數")]
    pub total_units: u32,
    #[serde(rename = "銷售起始年季")]
    pub sales_start_season: String,

    // Time and quantity
    #[serde(rename = "年季")]
    pub season: String,
    #[serde(rename = "銷售季數")]
    pub sales_seasons: u32,
    #[serde(rename = "累積成交筆數")]
    pub cumulative_transactions: usize,
    #[serde(rename = "該季成交筆數")]
    pub season_transactions: usize,
    /// Full quarter once the season is complete, elapsed days before that
    #[serde(rename = "該季銷售天數")]
    pub sales_days: u32,

    // Cancellation
    #[serde(rename = "累積解約筆數")]
    pub cumulative_cancellations: usize,
    #[serde(rename = "該季解約筆數")]
    pub season_cancellations: usize,
    #[serde(rename = "季度解約率(%)")]
    pub season_cancellation_rate: f64,
    #[serde(rename = "累積解約率(%)")]
    pub cumulative_cancellation_rate: f64,
    #[serde(rename = "最近解約年季")]
    pub latest_cancellation_season: String,
    #[serde(rename = "連續無解約季數")]
    pub consecutive_no_cancellation_seasons: u32,

    // Absorption
    #[serde(rename = "毛去化率(%)")]
    pub gross_rate: f64,
    #[serde(rename = "淨去化率(%)")]
    pub net_rate: f64,
    #[serde(rename = "調整去化率(%)")]
    pub adjusted_rate: f64,

    // Dynamics
    #[serde(rename = "季度去化速度(戶/季)")]
    pub speed: f64,
    #[serde(rename = "去化加速度(%)")]
    pub acceleration: f64,
    #[serde(rename = "預估完售季數")]
    pub estimated_seasons: u32,
    #[serde(rename = "去化效率評級")]
    pub efficiency_grade: String,

    // Price
    #[serde(rename = "平均交易單價(萬/坪)")]
    pub avg_unit_price: f64,
    #[serde(rename = "平均總面積(坪)")]
    pub avg_area: f64,
    #[serde(rename = "平均交易總價(萬)")]
    pub avg_total_price: f64,

    // Stage
    #[serde(rename = "銷售階段")]
    pub stage: String,
    #[serde(rename = "階段表現")]
    pub stage_performance: String,
    #[serde(rename = "解約警示")]
    pub cancellation_alert: String,

    // Quality
    #[serde(rename = "是否完整季")]
    pub complete_season: String,
}

impl CommunityReportRow {
    pub fn target(&self) -> Option<YearSeason> {
        self.season.parse().ok()
    }

    pub fn is_complete_season(&self) -> bool {
        self.complete_season == "Y"
    }
}

/// Inputs of the report, all produced by earlier stages.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub profiles: &'a BTreeMap<String, ProjectProfile>,
    pub clean: &'a [TransactionRecord],
    pub absorption: &'a AbsorptionRun,
    pub dynamics: &'a [DynamicsRecord],
    pub stage_risk: &'a [StageRiskRecord],
}

// =============================================================================
// GENERATION
// =============================================================================

/// Mean of the positive values of one price field.
fn positive_mean(records: &[&TransactionRecord], field: fn(&TransactionRecord) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(|r| field(r)).filter(|v| *v > 0.0).collect();
    if values.is_empty() {
        None
    } else {
        Some(mean(&values))
    }
}

/// Season mean, falling back to the cumulative mean; 0 when out of range.
fn price_field(
    season: &[&TransactionRecord],
    cumulative: &[&TransactionRecord],
    field: fn(&TransactionRecord) -> Option<f64>,
    max: f64,
) -> f64 {
    let value = positive_mean(season, field)
        .or_else(|| positive_mean(cumulative, field))
        .unwrap_or(0.0);
    if value > max {
        0.0
    } else {
        round_to(value, 2)
    }
}

fn rate(value: f64) -> f64 {
    round_to(value.clamp(0.0, 100.0), 2)
}

/// Build the report. One row per absorption result, in (code, season) order.
pub fn generate_community_report(ctx: &ReportContext<'_>) -> Vec<CommunityReportRow> {
    let mut by_code: HashMap<&str, Vec<&TransactionRecord>> = HashMap::new();
    for rec in ctx.clean {
        by_code.entry(rec.project_code.as_str()).or_default().push(rec);
    }
    let dynamics: HashMap<(&str, YearSeason), &DynamicsRecord> =
        ctx.dynamics.iter().map(|d| ((d.code.as_str(), d.target), d)).collect();
    let stage_risk: HashMap<(&str, YearSeason), &StageRiskRecord> =
        ctx.stage_risk.iter().map(|s| ((s.code.as_str(), s.target), s)).collect();

    let mut rows = Vec::with_capacity(ctx.absorption.results.len());
    for r in &ctx.absorption.results {
        let Some(profile) = ctx.profiles.get(&r.code) else {
            warn!(code = %r.code, "Absorption result without project profile");
            continue;
        };
        let key = (r.code.as_str(), r.target);
        let dyn_rec = dynamics.get(&key).copied();
        let risk = stage_risk.get(&key).copied();

        let records = by_code.get(r.code.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let cumulative: Vec<&TransactionRecord> = records.iter().copied().filter(|t| t.season <= r.target).collect();
        let in_season: Vec<&TransactionRecord> = cumulative.iter().copied().filter(|t| t.season == r.target).collect();

        let metrics = risk.map(|s| &s.cancellation.metrics);
        let complete = r.target != r.sales_start_season
            || (r.season_transactions > 0 && r.sales_days >= MIN_COMPLETE_SALES_DAYS);

        rows.push(CommunityReportRow {
            code: r.code.clone(),
            name: profile.name.clone(),
            county: profile.county.clone(),
            district: profile.district.clone(),
            street: profile.street.clone(),
            total_units: if r.total_units == 0 { DEFAULT_UNITS } else { r.total_units },
            sales_start_season: r.sales_start_season.to_string(),

            season: r.target.to_string(),
            sales_seasons: r.sales_seasons,
            cumulative_transactions: r.cumulative_transactions,
            season_transactions: r.season_transactions,
            sales_days: r.sales_days,

            cumulative_cancellations: r.cumulative_cancelled,
            season_cancellations: r.season_cancelled,
            season_cancellation_rate: rate(metrics.map_or(0.0, |m| m.season_rate)),
            cumulative_cancellation_rate: rate(metrics.map_or(0.0, |m| m.cumulative_rate)),
            latest_cancellation_season: metrics
                .and_then(|m| m.latest_cancellation_season)
                .map(|s| s.to_string())
                .unwrap_or_default(),
            consecutive_no_cancellation_seasons: metrics
                .map_or(r.sales_seasons, |m| m.consecutive_no_cancellation_seasons),

            gross_rate: rate(r.gross_rate),
            net_rate: rate(r.net_rate),
            adjusted_rate: rate(r.adjusted_rate),

            speed: dyn_rec.map_or(0.0, |d| d.speed),
            acceleration: round_to(dyn_rec.map_or(0.0, |d| d.acceleration.value).clamp(-100.0, 500.0), 2),
            estimated_seasons: dyn_rec.map_or(UNPREDICTABLE_SEASONS, |d| d.forecast.seasons),
            efficiency_grade: dyn_rec
                .map_or(EfficiencyGrade::Poor, |d| d.efficiency.grade)
                .display(),

            avg_unit_price: price_field(&in_season, &cumulative, |t| t.unit_price, MAX_UNIT_PRICE),
            avg_area: price_field(&in_season, &cumulative, |t| t.area, MAX_AREA),
            avg_total_price: price_field(&in_season, &cumulative, |t| t.total_price, MAX_TOTAL_PRICE),

            stage: risk.map(|s| s.stage.label().to_string()).unwrap_or_default(),
            stage_performance: risk.map(|s| s.performance.display()).unwrap_or_default(),
            cancellation_alert: risk.map(|s| s.cancellation.level.display()).unwrap_or_default(),

            complete_season: if complete { "Y" } else { "N" }.to_string(),
        });
    }

    info!(
        rows = rows.len(),
        projects = rows.iter().map(|r| r.code.as_str()).collect::<BTreeSet<_>>().len(),
        "Community report generated"
    );
    rows
}

/// Write the report with its Chinese header row.
pub fn write_community_report(path: &Path, rows: &[CommunityReportRow]) -> Result<()> {
    write_csv(path, rows)?;
    info!(path = %path.display(), rows = rows.len(), "Community report written");
    Ok(())
}

// =============================================================================
// QUALITY CHECK
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportQuality {
    pub total_rows: usize,
    /// Field name → rows with the field empty
    pub missing_fields: BTreeMap<String, usize>,
    /// Field name → rows outside the plausible range
    pub out_of_range: BTreeMap<String, usize>,
    pub net_above_gross: usize,
    pub quarterly_above_cumulative: usize,
    /// Field name → IQR outliers (only checked above 10 values)
    pub outliers: BTreeMap<String, usize>,
    /// Share of rows without any missing, out-of-range or inconsistent field
    pub clean_row_rate: f64,
    pub issues: Vec<String>,
}

impl ReportQuality {
    pub fn passes(&self) -> bool {
        self.issues.is_empty()
    }
}

type RangeCheck = (&'static str, fn(&CommunityReportRow) -> f64, f64, f64, bool);

/// (field, accessor, min, max, skip zero)
fn range_checks() -> [RangeCheck; 8] {
    [
        ("毛去化率(%)", |r| r.gross_rate, 0.0, 120.0, false),
        ("淨去化率(%)", |r| r.net_rate, 0.0, 110.0, false),
        ("累積解約率(%)", |r| r.cumulative_cancellation_rate, 0.0, 100.0, false),
        ("平均交易單價(萬/坪)", |r| r.avg_unit_price, 10.0, 300.0, true),
        ("平均總面積(坪)", |r| r.avg_area, 5.0, 200.0, true),
        ("平均交易總價(萬)", |r| r.avg_total_price, 500.0, 50_000.0, true),
        ("總戶數", |r| r.total_units as f64, 1.0, 5000.0, false),
        ("銷售季數", |r| r.sales_seasons as f64, 1.0, 50.0, false),
    ]
}

fn iqr_outliers(values: &[f64]) -> usize {
    if values.len() <= 10 {
        return 0;
    }
    let (Some(q1), Some(q3)) = (quantile(values, 0.25), quantile(values, 0.75)) else {
        return 0;
    };
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    values.iter().filter(|v| **v < lower || **v > upper).count()
}

/// Check completeness, plausible ranges and internal consistency.
pub fn report_quality_check(rows: &[CommunityReportRow]) -> ReportQuality {
    let mut q = ReportQuality { total_rows: rows.len(), ..Default::default() };
    let mut flagged = 0usize;
    let checks = range_checks();

    for row in rows {
        let mut row_flagged = false;

        let required: [(&str, &str); 7] = [
            ("備查編號", row.code.as_str()),
            ("社區名稱", row.name.as_str()),
            ("縣市", row.county.as_str()),
            ("行政區", row.district.as_str()),
            ("年季", row.season.as_str()),
            ("銷售階段", row.stage.as_str()),
            ("解約警示", row.cancellation_alert.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                *q.missing_fields.entry(field.to_string()).or_default() += 1;
                row_flagged = true;
            }
        }

        for (field, get, min, max, skip_zero) in checks.iter() {
            let v = get(row);
            if *skip_zero && v == 0.0 {
                continue;
            }
            if !(v >= *min && v <= *max) {
                *q.out_of_range.entry(field.to_string()).or_default() += 1;
                row_flagged = true;
            }
        }

        if row.net_rate > row.gross_rate {
            q.net_above_gross += 1;
            row_flagged = true;
        }
        if row.season_transactions > row.cumulative_transactions
            || row.season_cancellations > row.cumulative_cancellations
        {
            q.quarterly_above_cumulative += 1;
            row_flagged = true;
        }
        if row_flagged {
            flagged += 1;
        }
    }

    let numeric: [(&str, fn(&CommunityReportRow) -> f64); 3] = [
        ("淨去化率(%)", |r| r.net_rate),
        ("平均交易單價(萬/坪)", |r| r.avg_unit_price),
        ("季度去化速度(戶/季)", |r| r.speed),
    ];
    for (field, get) in numeric {
        let values: Vec<f64> = rows.iter().map(get).filter(|v| *v > 0.0).collect();
        let n = iqr_outliers(&values);
        if n > 0 {
            q.outliers.insert(field.to_string(), n);
        }
    }

    q.clean_row_rate = if rows.is_empty() {
        0.0
    } else {
        round_to((rows.len() - flagged) as f64 / rows.len() as f64 * 100.0, 2)
    };

    for (field, n) in &q.missing_fields {
        q.issues.push(format!("{}: {} rows missing", field, n));
    }
    for (field, n) in &q.out_of_range {
        q.issues.push(format!("{}: {} rows out of range", field, n));
    }
    if q.net_above_gross > 0 {
        q.issues.push(format!("{} rows with net rate above gross rate", q.net_above_gross));
    }
    if q.quarterly_above_cumulative > 0 {
        q.issues.push(format!(
            "{} rows with quarterly counts above cumulative counts",
            q.quarterly_above_cumulative
        ));
    }
    for issue in &q.issues {
        warn!(issue = %issue, "Community report quality issue");
    }
    q
}

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub rows: usize,
    pub mean_gross_rate: f64,
    pub mean_net_rate: f64,
    pub mean_adjusted_rate: f64,
    pub mean_cumulative_cancellation_rate: f64,
    pub mean_speed: f64,
    pub sold_out: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_rows: usize,
    pub projects: usize,
    pub counties: usize,
    pub districts: usize,
    pub by_season: BTreeMap<String, SeasonSummary>,
    pub stage_distribution: BTreeMap<String, usize>,
    pub projects_with_cancellations: usize,
    /// Rows with cumulative cancellation rate above 5%
    pub high_risk_count: usize,
    /// Rows with speed ≥ 3 units per season
    pub fast_rows: usize,
    /// Rows with speed below 1 unit per season
    pub slow_rows: usize,
    pub complete_season_rows: usize,
}

pub fn summarize_report(rows: &[CommunityReportRow]) -> ReportSummary {
    let mut grouped: BTreeMap<&str, Vec<&CommunityReportRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.season.as_str()).or_default().push(row);
    }

    let by_season = grouped
        .into_iter()
        .map(|(season, rs)| {
            let avg = |get: fn(&CommunityReportRow) -> f64| {
                round_to(mean(&rs.iter().map(|r| get(r)).collect::<Vec<_>>()), 2)
            };
            let summary = SeasonSummary {
                rows: rs.len(),
                mean_gross_rate: avg(|r| r.gross_rate),
                mean_net_rate: avg(|r| r.net_rate),
                mean_adjusted_rate: avg(|r| r.adjusted_rate),
                mean_cumulative_cancellation_rate: avg(|r| r.cumulative_cancellation_rate),
                mean_speed: avg(|r| r.speed),
                sold_out: rs.iter().filter(|r| r.net_rate >= 100.0).count(),
            };
            (season.to_string(), summary)
        })
        .collect();

    let mut stage_distribution = BTreeMap::new();
    for row in rows {
        *stage_distribution.entry(row.stage.clone()).or_insert(0) += 1;
    }

    ReportSummary {
        total_rows: rows.len(),
        projects: rows.iter().map(|r| r.code.as_str()).collect::<BTreeSet<_>>().len(),
        counties: rows.iter().map(|r| r.county.as_str()).collect::<BTreeSet<_>>().len(),
        districts: rows
            .iter()
            .map(|r| (r.county.as_str(), r.district.as_str()))
            .collect::<BTreeSet<_>>()
            .len(),
        by_season,
        stage_distribution,
        projects_with_cancellations: rows
            .iter()
            .filter(|r| r.cumulative_cancellations > 0)
            .map(|r| r.code.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
        high_risk_count: rows.iter().filter(|r| r.cumulative_cancellation_rate > 5.0).count(),
        fast_rows: rows.iter().filter(|r| r.speed >= 3.0).count(),
        slow_rows: rows.iter().filter(|r| r.speed < 1.0).count(),
        complete_season_rows: rows.iter().filter(|r| r.is_complete_season()).count(),
    }
}
