//! Project Matching and Activity Screening
//!
//! Links clean transactions to registry projects by code, estimates a
//! profile for transaction codes the registry does not know, and screens
//! which projects are still selling at a target season.
//!
//! ```text
//! clean transactions ─┬─ code in registry ──▶ Registry profile
//!                     └─ unknown code ──────▶ Estimated profile (confidence 0..1)
//!                                                   │
//!                         screen_active(target) ◀───┘
//! ```

use crate::analysis::records::{ProjectRecord, TransactionRecord};
use crate::analysis::season::{sales_seasons, YearSeason};
use crate::analysis::stats::{mode, pct};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Units assumed for a registry project that does not report a count.
pub const DEFAULT_UNITS: u32 = 50;

/// Street similarity above which a matched pair is geographically consistent.
const STREET_SIMILARITY_THRESHOLD: f64 = 0.6;

/// Sold share assumed when estimating an unknown project's size.
const ESTIMATED_SOLD_SHARE: f64 = 0.45;

// =============================================================================
// DIRECT MATCHING
// =============================================================================

/// Character-level similarity ratio in `0..=1` (2·M / T).
pub fn street_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    similar::TextDiff::from_chars(a, b).ratio() as f64
}

/// Location agreement between a project and its transactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoCheck {
    pub code: String,
    pub county_match: bool,
    pub district_match: bool,
    pub street_similarity: f64,
    pub consistent: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchOutcome {
    pub matched_codes: Vec<String>,
    /// Transaction codes with no registry project
    pub unmatched_transaction_codes: Vec<String>,
    /// Registry projects without any clean transaction
    pub projects_without_transactions: Vec<String>,
    /// matched / registry projects per county, %
    pub county_match_rates: BTreeMap<String, f64>,
    pub geo_checks: Vec<GeoCheck>,
    pub geo_consistency_rate: f64,
}

fn group_by_code(clean: &[TransactionRecord]) -> BTreeMap<&str, Vec<&TransactionRecord>> {
    let mut groups: BTreeMap<&str, Vec<&TransactionRecord>> = BTreeMap::new();
    for rec in clean {
        groups.entry(rec.project_code.as_str()).or_default().push(rec);
    }
    groups
}

pub fn match_projects(projects: &[ProjectRecord], clean: &[TransactionRecord]) -> MatchOutcome {
    let by_code = group_by_code(clean);
    let project_codes: BTreeSet<&str> = projects.iter().map(|p| p.code.as_str()).collect();

    let matched_codes: Vec<String> = by_code
        .keys()
        .filter(|c| project_codes.contains(*c))
        .map(|c| c.to_string())
        .collect();
    let unmatched_transaction_codes: Vec<String> = by_code
        .keys()
        .filter(|c| !project_codes.contains(*c))
        .map(|c| c.to_string())
        .collect();
    let projects_without_transactions: Vec<String> = project_codes
        .iter()
        .filter(|c| !by_code.contains_key(*c))
        .map(|c| c.to_string())
        .collect();

    let mut county_totals: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut geo_checks = Vec::new();
    for project in projects {
        let entry = county_totals.entry(project.county.as_str()).or_insert((0, 0));
        entry.0 += 1;
        let Some(records) = by_code.get(project.code.as_str()) else {
            continue;
        };
        entry.1 += 1;

        let county = mode(records.iter().map(|r| r.county.as_str())).unwrap_or_default();
        let district = mode(records.iter().map(|r| r.district.as_str())).unwrap_or_default();
        let street = mode(records.iter().map(|r| r.street.as_str())).unwrap_or_default();
        let similarity = street_similarity(&project.street, &street);
        let county_match = county == project.county;
        let district_match = district == project.district;
        geo_checks.push(GeoCheck {
            code: project.code.clone(),
            county_match,
            district_match,
            street_similarity: similarity,
            consistent: county_match && district_match && similarity > STREET_SIMILARITY_THRESHOLD,
        });
    }

    let consistent = geo_checks.iter().filter(|g| g.consistent).count();
    let outcome = MatchOutcome {
        county_match_rates: county_totals
            .into_iter()
            .map(|(county, (total, matched))| (county.to_string(), pct(matched as f64, total as f64)))
            .collect(),
        geo_consistency_rate: pct(consistent as f64, geo_checks.len() as f64),
        geo_checks,
        matched_codes,
        unmatched_transaction_codes,
        projects_without_transactions,
    };

    info!(
        matched = outcome.matched_codes.len(),
        unmatched = outcome.unmatched_transaction_codes.len(),
        idle_projects = outcome.projects_without_transactions.len(),
        geo_consistency = outcome.geo_consistency_rate,
        "Project matching complete"
    );
    outcome
}

// =============================================================================
// ESTIMATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Project profile inferred from transactions alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstimatedProject {
    pub code: String,
    pub name: String,
    pub county: String,
    pub district: String,
    pub street: String,
    pub estimated_units: u32,
    pub sales_start_season: YearSeason,
    pub transaction_count: usize,
    pub confidence: f64,
    pub band: ConfidenceBand,
}

fn estimation_confidence(records: &[&TransactionRecord]) -> f64 {
    let n = records.len();
    let size = if n >= 10 {
        0.3
    } else if n >= 5 {
        0.2
    } else {
        0.1
    };

    let locations: BTreeSet<(&str, &str)> =
        records.iter().map(|r| (r.county.as_str(), r.district.as_str())).collect();
    let location = if locations.len() == 1 { 0.3 } else { 0.1 };

    let seasons: BTreeSet<YearSeason> = records.iter().map(|r| r.season).collect();
    let time = if seasons.len() <= 4 {
        0.4
    } else if seasons.len() <= 8 {
        0.2
    } else {
        0.1
    };

    size + location + time
}

/// Build an estimated profile for every unmatched transaction code.
pub fn estimate_missing_projects(
    outcome: &MatchOutcome,
    clean: &[TransactionRecord],
) -> Vec<EstimatedProject> {
    let by_code = group_by_code(clean);
    let mut estimates = Vec::with_capacity(outcome.unmatched_transaction_codes.len());

    for code in &outcome.unmatched_transaction_codes {
        let Some(records) = by_code.get(code.as_str()) else {
            continue;
        };
        let n = records.len();
        let earliest = records
            .iter()
            .min_by_key(|r| (r.transaction_date.is_none(), r.transaction_date, r.season))
            .map(|r| r.transaction_date.and_then(YearSeason::from_date).unwrap_or(r.season));
        let Some(sales_start_season) = earliest else {
            continue;
        };

        let names = records.iter().map(|r| r.community_name.as_str()).filter(|s| !s.is_empty());
        let confidence = estimation_confidence(records);
        estimates.push(EstimatedProject {
            code: code.clone(),
            name: mode(names).unwrap_or_else(|| code.clone()),
            county: mode(records.iter().map(|r| r.county.as_str())).unwrap_or_default(),
            district: mode(records.iter().map(|r| r.district.as_str())).unwrap_or_default(),
            street: mode(records.iter().map(|r| r.street.as_str())).unwrap_or_default(),
            estimated_units: ((n as f64 / ESTIMATED_SOLD_SHARE).floor() as u32).max(n as u32 + 10),
            sales_start_season,
            transaction_count: n,
            confidence,
            band: ConfidenceBand::from_confidence(confidence),
        });
    }

    debug!(estimated = estimates.len(), "Estimated unmatched projects");
    estimates
}

// =============================================================================
// PROJECT INDEX
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectSource {
    Registry,
    Estimated,
}

/// Everything later stages need to know about a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectProfile {
    pub code: String,
    pub name: String,
    pub county: String,
    pub district: String,
    pub street: String,
    pub total_units: u32,
    pub sales_start_season: YearSeason,
    pub source: ProjectSource,
    /// 1.0 for registry projects
    pub confidence: f64,
    /// Registry project with a reported unit count and start season
    pub has_complete_info: bool,
}

/// Merge registry and estimated projects, keyed by code.
///
/// Registry projects without a start season take the season of their
/// earliest transaction; those with neither are left out.
pub fn build_project_index(
    projects: &[ProjectRecord],
    estimates: &[EstimatedProject],
    clean: &[TransactionRecord],
) -> BTreeMap<String, ProjectProfile> {
    let first_season: HashMap<&str, YearSeason> =
        clean.iter().fold(HashMap::new(), |mut acc, rec| {
            let entry = acc.entry(rec.project_code.as_str()).or_insert(rec.season);
            if rec.season < *entry {
                *entry = rec.season;
            }
            acc
        });

    let mut index = BTreeMap::new();
    let mut skipped = 0usize;
    for project in projects {
        let start = project
            .sales_start_season
            .or_else(|| first_season.get(project.code.as_str()).copied());
        let Some(sales_start_season) = start else {
            skipped += 1;
            continue;
        };
        index.insert(
            project.code.clone(),
            ProjectProfile {
                code: project.code.clone(),
                name: project.name.clone(),
                county: project.county.clone(),
                district: project.district.clone(),
                street: project.street.clone(),
                total_units: project.total_units.unwrap_or(DEFAULT_UNITS),
                sales_start_season,
                source: ProjectSource::Registry,
                confidence: 1.0,
                has_complete_info: project.total_units.is_some() && project.sales_start_season.is_some(),
            },
        );
    }

    for est in estimates {
        index.entry(est.code.clone()).or_insert_with(|| ProjectProfile {
            code: est.code.clone(),
            name: est.name.clone(),
            county: est.county.clone(),
            district: est.district.clone(),
            street: est.street.clone(),
            total_units: est.estimated_units,
            sales_start_season: est.sales_start_season,
            source: ProjectSource::Estimated,
            confidence: est.confidence,
            has_complete_info: false,
        });
    }

    if skipped > 0 {
        warn!(skipped, "Registry projects without any start season were left out");
    }
    index
}

// =============================================================================
// ACTIVITY SCREENING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StagnationLevel {
    High,
    Medium,
    Low,
}

/// A project still selling at the target season.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveProject {
    pub code: String,
    pub target: YearSeason,
    pub gross_rate: f64,
    pub sales_seasons: u32,
    /// Seasons since the latest transaction
    pub no_txn_seasons: u32,
    pub is_long_term_stagnant: bool,
    pub stagnation_points: u32,
    pub stagnation_level: StagnationLevel,
}

pub(crate) fn stagnation_points(sales: u32, no_txn: u32, rate: f64) -> u32 {
    let mut points = 0;
    if sales > 12 {
        points += 1;
    }
    if sales > 16 {
        points += 1;
    }
    if no_txn >= 8 {
        points += 1;
    }
    if no_txn >= 12 {
        points += 1;
    }
    if rate < 30.0 {
        points += 2;
    } else if rate < 50.0 {
        points += 1;
    }
    points
}

/// Projects whose sales have started by `target` and whose gross absorption
/// is still below 100%.
pub fn screen_active(
    profiles: &BTreeMap<String, ProjectProfile>,
    clean: &[TransactionRecord],
    target: YearSeason,
    stagnant_threshold: u32,
) -> Vec<ActiveProject> {
    let by_code = group_by_code(clean);
    let mut active = Vec::new();

    for profile in profiles.values() {
        if target < profile.sales_start_season || profile.total_units == 0 {
            continue;
        }
        let upto: Vec<&&TransactionRecord> = by_code
            .get(profile.code.as_str())
            .map(|records| records.iter().filter(|r| r.season <= target).collect())
            .unwrap_or_default();
        let normal = upto.iter().filter(|r| r.is_normal()).count();
        let gross_rate = pct(normal as f64, profile.total_units as f64);
        if gross_rate >= 100.0 {
            continue;
        }

        let sales = sales_seasons(profile.sales_start_season, target);
        let no_txn_seasons = upto
            .iter()
            .map(|r| r.season)
            .max()
            .map(|latest| latest.seasons_between(&target).max(0) as u32)
            .unwrap_or(stagnant_threshold);
        let points = stagnation_points(sales, no_txn_seasons, gross_rate);
        let stagnation_level = match points {
            4.. => StagnationLevel::High,
            2..=3 => StagnationLevel::Medium,
            _ => StagnationLevel::Low,
        };

        active.push(ActiveProject {
            code: profile.code.clone(),
            target,
            gross_rate,
            sales_seasons: sales,
            no_txn_seasons,
            is_long_term_stagnant: sales > 12 && no_txn_seasons >= 12 && gross_rate < 70.0,
            stagnation_points: points,
            stagnation_level,
        });
    }

    info!(
        season = %target,
        active = active.len(),
        stagnant = active.iter().filter(|a| a.is_long_term_stagnant).count(),
        "Activity screening complete"
    );
    active
}

// =============================================================================
// VALIDATION
// =============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchingValidation {
    pub low_confidence_share: f64,
    pub geo_consistency_rate: f64,
    /// Matched codes / transaction codes, %
    pub coverage: f64,
    pub max_gross_rate: f64,
    pub issues: Vec<String>,
}

impl MatchingValidation {
    pub fn passes(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn validate_matching(
    outcome: &MatchOutcome,
    estimates: &[EstimatedProject],
    active: &[ActiveProject],
    max_gross_seen: f64,
) -> MatchingValidation {
    let low = estimates.iter().filter(|e| e.band == ConfidenceBand::Low).count();
    let low_confidence_share = pct(low as f64, estimates.len() as f64);
    let transaction_codes = outcome.matched_codes.len() + outcome.unmatched_transaction_codes.len();
    let coverage = pct(outcome.matched_codes.len() as f64, transaction_codes as f64);
    let max_gross_rate = active
        .iter()
        .map(|a| a.gross_rate)
        .fold(max_gross_seen, f64::max);

    let mut issues = Vec::new();
    if low_confidence_share > 30.0 {
        issues.push(format!("Low-confidence estimates make up {:.1}% of estimated projects", low_confidence_share));
    }
    if !outcome.geo_checks.is_empty() && outcome.geo_consistency_rate < 80.0 {
        issues.push(format!("Geographic consistency {:.1}% below 80%", outcome.geo_consistency_rate));
    }
    if transaction_codes > 0 && coverage < 50.0 {
        issues.push(format!("Registry covers only {:.1}% of transaction codes", coverage));
    }
    if max_gross_rate > 150.0 {
        issues.push(format!("Gross absorption reaches {:.1}%", max_gross_rate));
    }
    for issue in &issues {
        warn!("{}", issue);
    }

    MatchingValidation {
        low_confidence_share,
        geo_consistency_rate: outcome.geo_consistency_rate,
        coverage,
        max_gross_rate,
        issues,
    }
}

/// Highest gross absorption of any profile over all clean records.
pub fn max_gross_rate(profiles: &BTreeMap<String, ProjectProfile>, clean: &[TransactionRecord]) -> f64 {
    let mut normal: HashMap<&str, usize> = HashMap::new();
    for rec in clean.iter().filter(|r| r.is_normal()) {
        *normal.entry(rec.project_code.as_str()).or_insert(0) += 1;
    }
    profiles
        .values()
        .filter(|p| p.total_units > 0)
        .map(|p| pct(*normal.get(p.code.as_str()).unwrap_or(&0) as f64, p.total_units as f64))
        .fold(0.0, f64::max)
}
