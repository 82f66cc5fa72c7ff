//! Absorption Rate Calculation
//!
//! For a project at a target season, only clean records with season ≤ target
//! count:
//!
//! ```text
//! gross    = normal / units × 100
//! net      = max(0, normal - cancelled) / units × 100
//! adjusted = net × season_days / sales_days      (incomplete season only)
//! ```
//!
//! The adjustment annualizes a partially elapsed quarter so it can be
//! compared with complete ones. Computation fans out over (project, season)
//! pairs with rayon and is sorted afterwards.

use crate::analysis::matching::{ProjectProfile, ProjectSource};
use crate::analysis::records::TransactionRecord;
use crate::analysis::season::{sales_seasons, YearSeason};
use crate::analysis::stats::{pct, quantile, round_to};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AbsorptionError {
    ProjectNotFound { code: String },
    InvalidUnits { code: String, units: u32 },
}

impl fmt::Display for AbsorptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectNotFound { code } => write!(f, "Project {} not found", code),
            Self::InvalidUnits { code, units } => {
                write!(f, "Project {} has invalid unit count {}", code, units)
            }
        }
    }
}

impl std::error::Error for AbsorptionError {}

// =============================================================================
// RESULT
// =============================================================================

/// Absorption of one project at one target season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionResult {
    pub code: String,
    pub target: YearSeason,
    pub total_units: u32,
    pub sales_start_season: YearSeason,
    pub sales_seasons: u32,

    /// Clean records up to and including the target
    pub cumulative_transactions: usize,
    pub cumulative_normal: usize,
    pub cumulative_cancelled: usize,
    /// Clean records inside the target season
    pub season_transactions: usize,
    pub season_cancelled: usize,

    pub gross_rate: f64,
    pub net_rate: f64,
    pub cancellation_rate: f64,
    pub adjusted_rate: f64,
    pub adjustment_factor: f64,

    pub season_complete: bool,
    pub season_days: u32,
    pub sales_days: u32,
    pub has_complete_info: bool,
    pub estimated: bool,
}

impl AbsorptionResult {
    /// Units sold net of cancellations.
    pub fn net_units(&self) -> f64 {
        self.net_rate / 100.0 * self.total_units as f64
    }
}

/// Compute absorption for `profile` from its clean records.
pub fn calculate_absorption(
    profile: &ProjectProfile,
    records: &[&TransactionRecord],
    target: YearSeason,
    analysis_date: NaiveDate,
) -> Result<AbsorptionResult, AbsorptionError> {
    if profile.total_units == 0 {
        return Err(AbsorptionError::InvalidUnits { code: profile.code.clone(), units: profile.total_units });
    }
    let units = profile.total_units as f64;

    let mut cumulative = 0usize;
    let mut normal = 0usize;
    let mut cancelled = 0usize;
    let mut season_transactions = 0usize;
    let mut season_cancelled = 0usize;
    for rec in records.iter().filter(|r| r.season <= target) {
        cumulative += 1;
        if rec.is_cancelled() {
            cancelled += 1;
        } else {
            normal += 1;
        }
        if rec.season == target {
            season_transactions += 1;
            if rec.is_cancelled() {
                season_cancelled += 1;
            }
        }
    }

    let gross = normal as f64 / units * 100.0;
    let net = normal.saturating_sub(cancelled) as f64 / units * 100.0;
    let cancellation_rate = pct(cancelled as f64, normal as f64);

    let season_days = target.days();
    let season_complete = target.is_complete(analysis_date);
    let sales_days = if season_complete { season_days } else { target.elapsed_days(analysis_date) };
    let factor = if season_complete {
        1.0
    } else {
        round_to(season_days as f64 / sales_days as f64, 3)
    };

    Ok(AbsorptionResult {
        code: profile.code.clone(),
        target,
        total_units: profile.total_units,
        sales_start_season: profile.sales_start_season,
        sales_seasons: sales_seasons(profile.sales_start_season, target),
        cumulative_transactions: cumulative,
        cumulative_normal: normal,
        cumulative_cancelled: cancelled,
        season_transactions,
        season_cancelled,
        gross_rate: round_to(gross, 2),
        net_rate: round_to(net, 2),
        cancellation_rate: round_to(cancellation_rate, 2),
        adjusted_rate: round_to(net * factor, 2),
        adjustment_factor: factor,
        season_complete,
        season_days,
        sales_days,
        has_complete_info: profile.has_complete_info,
        estimated: profile.source == ProjectSource::Estimated,
    })
}

/// Results and per-pair failures of a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AbsorptionRun {
    /// Sorted by (code, target)
    pub results: Vec<AbsorptionResult>,
    pub errors: Vec<(String, YearSeason, AbsorptionError)>,
}

impl AbsorptionRun {
    /// Result of one project at one season.
    pub fn get(&self, code: &str, target: YearSeason) -> Option<&AbsorptionResult> {
        self.results
            .binary_search_by(|r| (r.code.as_str(), r.target).cmp(&(code, target)))
            .ok()
            .map(|i| &self.results[i])
    }
}

/// Compute absorption for every requested (code, season) pair in parallel.
pub fn calculate_all(
    profiles: &BTreeMap<String, ProjectProfile>,
    clean: &[TransactionRecord],
    requests: &[(String, YearSeason)],
    analysis_date: NaiveDate,
) -> AbsorptionRun {
    let mut by_code: HashMap<&str, Vec<&TransactionRecord>> = HashMap::new();
    for rec in clean {
        by_code.entry(rec.project_code.as_str()).or_default().push(rec);
    }

    let outcomes: Vec<Result<AbsorptionResult, (String, YearSeason, AbsorptionError)>> = requests
        .par_iter()
        .map(|(code, target)| {
            let profile = profiles.get(code).ok_or_else(|| {
                (code.clone(), *target, AbsorptionError::ProjectNotFound { code: code.clone() })
            })?;
            let records = by_code.get(code.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            calculate_absorption(profile, records, *target, analysis_date)
                .map_err(|e| (code.clone(), *target, e))
        })
        .collect();

    let mut run = AbsorptionRun::default();
    for outcome in outcomes {
        match outcome {
            Ok(result) => run.results.push(result),
            Err(err) => run.errors.push(err),
        }
    }
    run.results.sort_by(|a, b| (a.code.as_str(), a.target).cmp(&(b.code.as_str(), b.target)));
    run.errors.sort_by(|a, b| (a.0.as_str(), a.1).cmp(&(b.0.as_str(), b.1)));

    for (code, season, err) in &run.errors {
        debug!(code = %code, season = %season, error = %err, "Absorption skipped");
    }
    info!(
        requested = requests.len(),
        computed = run.results.len(),
        failed = run.errors.len(),
        "Absorption calculation complete"
    );
    run
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RateValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_rates(result: &AbsorptionResult) -> RateValidation {
    let mut v = RateValidation::default();
    if result.net_rate > 100.0 {
        v.errors.push(format!("net rate {:.2}% exceeds 100%", result.net_rate));
    }
    if result.cumulative_cancelled > result.cumulative_normal {
        v.errors.push(format!(
            "cancelled {} > normal {}",
            result.cumulative_cancelled, result.cumulative_normal
        ));
    }
    if result.net_rate < 0.0 {
        v.errors.push(format!("net rate {:.2}% is negative", result.net_rate));
    }
    if result.adjusted_rate > 150.0 {
        v.warnings.push(format!("adjusted rate {:.2}% exceeds 150%", result.adjusted_rate));
    } else if result.adjusted_rate > 100.0 {
        v.warnings.push(format!("adjusted rate {:.2}% exceeds 100%", result.adjusted_rate));
    }
    if result.adjustment_factor > 4.0 {
        v.warnings.push(format!("adjustment factor {:.3} exceeds 4", result.adjustment_factor));
    }
    v
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    AdjustedAbove150,
    ExtremeFactor,
    HighCancellation,
    SingleUnitMultipleSales,
    NoNetSalesWithActivity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub code: String,
    pub target: YearSeason,
    pub kind: AnomalyKind,
}

pub fn detect_anomalies(results: &[AbsorptionResult]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for r in results {
        let mut flag = |kind| anomalies.push(Anomaly { code: r.code.clone(), target: r.target, kind });
        if r.adjusted_rate > 150.0 {
            flag(AnomalyKind::AdjustedAbove150);
        }
        if r.adjustment_factor > 4.0 {
            flag(AnomalyKind::ExtremeFactor);
        }
        if r.cancellation_rate > 10.0 {
            flag(AnomalyKind::HighCancellation);
        }
        if r.total_units == 1 && r.cumulative_transactions > 1 {
            flag(AnomalyKind::SingleUnitMultipleSales);
        }
        if r.has_complete_info && r.net_rate == 0.0 && r.cumulative_transactions > 0 {
            flag(AnomalyKind::NoNetSalesWithActivity);
        }
    }
    if !anomalies.is_empty() {
        warn!(count = anomalies.len(), "Absorption anomalies detected");
    }
    anomalies
}

// =============================================================================
// BENCHMARKS AND GRADES
// =============================================================================

/// Market benchmarks over a batch of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Benchmarks {
    pub net_q10: f64,
    pub net_q25: f64,
    pub net_q50: f64,
    pub net_q75: f64,
    pub net_q90: f64,
    pub cancellation_q75: f64,
    pub cancellation_q90: f64,
    pub cancellation_q95: f64,
    pub units_q33: f64,
    pub units_q67: f64,
}

pub fn establish_benchmarks(results: &[AbsorptionResult]) -> Benchmarks {
    let net: Vec<f64> = results.iter().map(|r| r.net_rate).collect();
    let cancel: Vec<f64> = results.iter().map(|r| r.cancellation_rate).collect();
    let units: Vec<f64> = results.iter().map(|r| r.total_units as f64).collect();
    let q = |v: &[f64], p: f64| quantile(v, p).unwrap_or(0.0);
    Benchmarks {
        net_q10: q(&net, 0.10),
        net_q25: q(&net, 0.25),
        net_q50: q(&net, 0.50),
        net_q75: q(&net, 0.75),
        net_q90: q(&net, 0.90),
        cancellation_q75: q(&cancel, 0.75),
        cancellation_q90: q(&cancel, 0.90),
        cancellation_q95: q(&cancel, 0.95),
        units_q33: q(&units, 0.33),
        units_q67: q(&units, 0.67),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbsorptionGrade {
    High,
    Good,
    Average,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationGrade {
    Extreme,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleGrade {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grades {
    pub absorption: AbsorptionGrade,
    pub cancellation: CancellationGrade,
    pub scale: ScaleGrade,
}

/// Grade a result against batch benchmarks.
pub fn grade(result: &AbsorptionResult, b: &Benchmarks) -> Grades {
    let net = result.net_rate;
    let absorption = if net >= b.net_q75 {
        AbsorptionGrade::High
    } else if net >= b.net_q50 {
        AbsorptionGrade::Good
    } else if net >= b.net_q25 {
        AbsorptionGrade::Average
    } else {
        AbsorptionGrade::Below
    };

    let c = result.cancellation_rate;
    let cancellation = if c >= b.cancellation_q95 {
        CancellationGrade::Extreme
    } else if c >= b.cancellation_q90 {
        CancellationGrade::High
    } else if c >= b.cancellation_q75 {
        CancellationGrade::Medium
    } else {
        CancellationGrade::Low
    };

    let units = result.total_units as f64;
    let scale = if units <= b.units_q33 {
        ScaleGrade::Small
    } else if units <= b.units_q67 {
        ScaleGrade::Medium
    } else {
        ScaleGrade::Large
    };

    Grades { absorption, cancellation, scale }
}
