//! District and City Aggregation
//!
//! Rolls the community report up two levels and checks that the levels
//! agree with each other.
//!
//! ```text
//! community rows ──(county, district, season)──▶ district rows
//!                                                    │ ranked within (county, season)
//!                ──(county, season)────────────▶ city rows ◀── district rows
//! ```
//!
//! A project is long-term stagnant when it has sold for more than 12
//! seasons with a net rate below 70%. Absorption at both levels is
//! `(transactions - cancellations) / units`, clamped to 0..=120.

use crate::analysis::community_report::CommunityReportRow;
use crate::analysis::export::write_csv;
use crate::analysis::season::YearSeason;
use crate::analysis::stage_risk::RiskLevel;
use crate::analysis::stats::{mean, mode, pct, round_to};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

const MAX_AGGREGATE_RATE: f64 = 120.0;
const ISSUE_DETAIL_LIMIT: usize = 10;
const CONSISTENCY_TARGET: f64 = 95.0;

/// Map a point total onto a three-step risk level.
pub fn classify_risk_level(score: u32) -> RiskLevel {
    if score >= 7 {
        RiskLevel::High
    } else if score >= 4 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn is_stagnant(row: &CommunityReportRow) -> bool {
    row.sales_seasons > 12 && row.net_rate < 70.0
}

fn is_active(row: &CommunityReportRow) -> bool {
    row.cumulative_transactions > 0 || row.net_rate < 100.0
}

fn net_absorption(rows: &[&CommunityReportRow]) -> f64 {
    let units: u32 = rows.iter().map(|r| r.total_units).sum();
    if units == 0 {
        return 0.0;
    }
    let txns: usize = rows.iter().map(|r| r.cumulative_transactions).sum();
    let cancels: usize = rows.iter().map(|r| r.cumulative_cancellations).sum();
    let net = (txns as f64 - cancels as f64) / units as f64 * 100.0;
    net.clamp(0.0, MAX_AGGREGATE_RATE)
}

/// Unit-weighted mean speed over projects that moved at all.
fn weighted_speed(rows: &[&CommunityReportRow]) -> f64 {
    let moving: Vec<&&CommunityReportRow> = rows.iter().filter(|r| r.speed > 0.0).collect();
    let units: u32 = moving.iter().map(|r| r.total_units).sum();
    if units == 0 {
        return 0.0;
    }
    moving.iter().map(|r| r.speed * r.total_units as f64).sum::<f64>() / units as f64
}

/// Unit price weighted by quarterly transactions, or the plain mean of
/// positive prices when no project traded this season.
fn weighted_unit_price(rows: &[&CommunityReportRow]) -> f64 {
    let priced: Vec<&&CommunityReportRow> = rows.iter().filter(|r| r.avg_unit_price > 0.0).collect();
    let weight: usize = priced.iter().map(|r| r.season_transactions).sum();
    if weight > 0 {
        priced
            .iter()
            .map(|r| r.avg_unit_price * r.season_transactions as f64)
            .sum::<f64>()
            / weight as f64
    } else {
        mean(&priced.iter().map(|r| r.avg_unit_price).collect::<Vec<_>>())
    }
}

fn share(count: usize, total: usize) -> f64 {
    pct(count as f64, total as f64)
}

// =============================================================================
// DISTRICT LEVEL
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistrictReportRow {
    #[serde(rename = "縣市")]
    pub county: String,
    #[serde(rename = "行政區")]
    pub district: String,
    #[serde(rename = "年季")]
    pub season: String,

    #[serde(rename = "活躍建案數")]
    pub active_projects: usize,
    #[serde(rename = "正常活躍建案數")]
    pub normal_active_projects: usize,
    #[serde(rename = "長期滯銷建案數")]
    pub stagnant_projects: usize,

    #[serde(rename = "區域總戶數")]
    pub total_units: u32,
    #[serde(rename = "區域總成交筆數")]
    pub total_transactions: usize,
    #[serde(rename = "整體淨去化率(%)")]
    pub net_rate: f64,
    #[serde(rename = "正常建案去化率(%)")]
    pub normal_net_rate: f64,

    #[serde(rename = "區域總解約筆數")]
    pub total_cancellations: usize,
    #[serde(rename = "區域解約率(%)")]
    pub cancellation_rate: f64,
    #[serde(rename = "區域解約風險等級")]
    pub cancellation_risk: String,

    #[serde(rename = "區域平均去化速度(戶/季)")]
    pub avg_speed: f64,
    #[serde(rename = "區域去化效率排名")]
    pub efficiency_rank: String,
    #[serde(rename = "區域去化趨勢")]
    pub trend: String,

    #[serde(rename = "加權平均單價(萬/坪)")]
    pub weighted_unit_price: f64,
    #[serde(rename = "長期滯銷影響度(%)")]
    pub stagnant_impact: f64,
    #[serde(rename = "區域階段")]
    pub dominant_stage: String,
    #[serde(rename = "風險等級")]
    pub risk_level: String,
}

impl DistrictReportRow {
    pub fn is_high_risk(&self) -> bool {
        self.risk_level.contains(RiskLevel::High.emoji())
    }

    /// Position in the district ranking, parsed from `第N名`.
    pub fn rank(&self) -> Option<usize> {
        self.efficiency_rank
            .strip_prefix('第')
            .and_then(|s| s.strip_suffix('名'))
            .and_then(|n| n.parse().ok())
    }
}

fn district_trend(rows: &[&CommunityReportRow]) -> &'static str {
    let graded: Vec<&&CommunityReportRow> = rows.iter().filter(|r| !r.efficiency_grade.is_empty()).collect();
    if graded.is_empty() {
        return "📈 穩定去化";
    }
    let high = graded
        .iter()
        .filter(|r| r.efficiency_grade.contains('🚀') || r.efficiency_grade.contains("高效"))
        .count();
    let ratio = high as f64 / graded.len() as f64;
    if ratio > 0.5 {
        "🚀 加速去化"
    } else if ratio > 0.3 {
        "📈 穩定去化"
    } else if ratio > 0.1 {
        "📉 減緩去化"
    } else {
        "⚠️ 去化停滯"
    }
}

fn district_row(county: &str, district: &str, season: &str, rows: &[&CommunityReportRow]) -> DistrictReportRow {
    let total = rows.len();
    let active = rows.iter().filter(|r| is_active(r)).count();
    let stagnant = rows.iter().filter(|r| is_stagnant(r)).count();
    let normal: Vec<&CommunityReportRow> = rows.iter().copied().filter(|r| !is_stagnant(r)).collect();

    let txns: usize = rows.iter().map(|r| r.cumulative_transactions).sum();
    let cancels: usize = rows.iter().map(|r| r.cumulative_cancellations).sum();
    let cancellation_rate = pct(cancels as f64, txns as f64);

    let mut cancellation_points = 0;
    if cancellation_rate > 3.0 {
        cancellation_points += 3;
    } else if cancellation_rate > 1.5 {
        cancellation_points += 1;
    }
    let high_cancel_share = share(rows.iter().filter(|r| r.cumulative_cancellation_rate > 5.0).count(), total);
    if high_cancel_share > 30.0 {
        cancellation_points += 2;
    } else if high_cancel_share > 15.0 {
        cancellation_points += 1;
    }

    let avg_speed = weighted_speed(rows);
    let stagnant_impact = share(stagnant, total);
    let mean_cancellation = mean(&rows.iter().map(|r| r.cumulative_cancellation_rate).collect::<Vec<_>>());
    let low_net_share = rows.iter().filter(|r| r.net_rate < 30.0).count() as f64 / total.max(1) as f64;
    let risk_factors = [stagnant_impact > 25.0, mean_cancellation > 5.0, avg_speed < 1.0, low_net_share > 0.5];
    let risk_points = 2 * risk_factors.iter().filter(|f| **f).count() as u32;

    DistrictReportRow {
        county: county.to_string(),
        district: district.to_string(),
        season: season.to_string(),
        active_projects: active,
        normal_active_projects: active.saturating_sub(stagnant),
        stagnant_projects: stagnant,
        total_units: rows.iter().map(|r| r.total_units).sum(),
        total_transactions: txns,
        net_rate: round_to(net_absorption(rows), 2),
        normal_net_rate: round_to(net_absorption(&normal), 2),
        total_cancellations: cancels,
        cancellation_rate: round_to(cancellation_rate, 2),
        cancellation_risk: classify_risk_level(cancellation_points).display(),
        avg_speed: round_to(avg_speed, 2),
        efficiency_rank: String::new(),
        trend: district_trend(rows).to_string(),
        weighted_unit_price: round_to(weighted_unit_price(rows), 2),
        stagnant_impact: round_to(stagnant_impact, 2),
        dominant_stage: mode(rows.iter().map(|r| r.stage.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "穩定銷售期".to_string()),
        risk_level: classify_risk_level(risk_points).display(),
    }
}

/// Ranking score of a district: absorption 40, speed 40, stagnation 20.
pub fn district_efficiency_score(row: &DistrictReportRow) -> u32 {
    let absorption = match row.net_rate {
        r if r >= 70.0 => 40,
        r if r >= 50.0 => 30,
        r if r >= 30.0 => 20,
        _ => 10,
    };
    let speed = match row.avg_speed {
        s if s >= 3.0 => 40,
        s if s >= 2.0 => 30,
        s if s >= 1.0 => 20,
        _ => 10,
    };
    let stagnation = match row.stagnant_impact {
        i if i < 10.0 => 20,
        i if i < 25.0 => 15,
        i if i < 40.0 => 10,
        _ => 5,
    };
    absorption + speed + stagnation
}

/// Fill `efficiency_rank` within each (county, season). Ties keep input order.
pub fn rank_districts(rows: &mut [DistrictReportRow]) {
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        groups.entry((row.county.clone(), row.season.clone())).or_default().push(i);
    }
    for indices in groups.values() {
        let mut scored: Vec<(usize, u32)> = indices.iter().map(|&i| (i, district_efficiency_score(&rows[i]))).collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        for (rank, (i, _)) in scored.into_iter().enumerate() {
            rows[i].efficiency_rank = format!("第{}名", rank + 1);
        }
    }
}

/// One row per (county, district, season), ranked.
pub fn aggregate_districts(community: &[CommunityReportRow]) -> Vec<DistrictReportRow> {
    let mut groups: BTreeMap<(&str, &str, &str), Vec<&CommunityReportRow>> = BTreeMap::new();
    for row in community {
        groups
            .entry((row.county.as_str(), row.district.as_str(), row.season.as_str()))
            .or_default()
            .push(row);
    }

    let mut out: Vec<DistrictReportRow> = groups
        .into_iter()
        .map(|((county, district, season), rows)| district_row(county, district, season, &rows))
        .collect();
    rank_districts(&mut out);

    info!(
        districts = out.len(),
        high_risk = out.iter().filter(|d| d.is_high_risk()).count(),
        "District aggregation complete"
    );
    out
}

// =============================================================================
// CITY LEVEL
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityReportRow {
    #[serde(rename = "縣市")]
    pub county: String,
    #[serde(rename = "年季")]
    pub season: String,

    #[serde(rename = "活躍行政區數")]
    pub active_districts: usize,
    #[serde(rename = "縣市總建案數")]
    pub total_projects: usize,
    #[serde(rename = "新推案數量")]
    pub new_projects: usize,
    #[serde(rename = "完售建案數量")]
    pub sold_out_projects: usize,

    #[serde(rename = "縣市總戶數")]
    pub total_units: u32,
    #[serde(rename = "縣市總成交筆數")]
    pub total_transactions: usize,
    #[serde(rename = "縣市加權去化率(%)")]
    pub net_rate: f64,
    #[serde(rename = "長期滯銷建案占比(%)")]
    pub stagnant_share: f64,

    #[serde(rename = "縣市總解約筆數")]
    pub total_cancellations: usize,
    #[serde(rename = "縣市解約率(%)")]
    pub cancellation_rate: f64,
    #[serde(rename = "縣市解約風險等級")]
    pub cancellation_risk: String,

    #[serde(rename = "縣市平均去化速度(戶/季)")]
    pub avg_speed: f64,
    #[serde(rename = "縣市去化表現分數")]
    pub performance_score: u32,
    #[serde(rename = "縣市去化表現分級")]
    pub performance_grade: String,

    #[serde(rename = "縣市加權平均單價(萬/坪)")]
    pub weighted_unit_price: f64,
    #[serde(rename = "價格漲跌幅(%)")]
    pub price_change: f64,
    #[serde(rename = "主要熱點行政區")]
    pub hotspot_districts: String,
    #[serde(rename = "高風險行政區數")]
    pub high_risk_districts: usize,
    #[serde(rename = "縣市風險等級")]
    pub risk_level: String,
}

impl CityReportRow {
    pub fn is_high_risk(&self) -> bool {
        self.risk_level.contains(RiskLevel::High.emoji())
    }
}

/// Speed 40, mean net rate 30, sold-out share 30.
pub fn city_performance_score(avg_speed: f64, mean_net: f64, completion_share: f64) -> u32 {
    let speed = match avg_speed {
        s if s >= 3.0 => 40,
        s if s >= 2.0 => 30,
        s if s >= 1.0 => 20,
        _ => 10,
    };
    let absorption = match mean_net {
        r if r >= 60.0 => 30,
        r if r >= 45.0 => 25,
        r if r >= 30.0 => 15,
        _ => 5,
    };
    let completion = match completion_share {
        c if c >= 20.0 => 30,
        c if c >= 10.0 => 20,
        c if c >= 5.0 => 10,
        _ => 0,
    };
    speed + absorption + completion
}

pub fn city_performance_grade(score: u32) -> &'static str {
    match score {
        80.. => "🏆 優秀表現",
        65..=79 => "🥇 良好表現",
        45..=64 => "🥈 普通表現",
        _ => "🥉 待改善表現",
    }
}

fn hotspot_districts(districts: &[&DistrictReportRow]) -> String {
    let mut top: Vec<&&DistrictReportRow> = districts
        .iter()
        .filter(|d| matches!(d.rank(), Some(1..=3)))
        .collect();
    top.sort_by(|a, b| b.net_rate.total_cmp(&a.net_rate));
    top.iter().take(3).map(|d| d.district.as_str()).collect::<Vec<_>>().join("、")
}

fn city_row(county: &str, season: &str, rows: &[&CommunityReportRow], districts: &[&DistrictReportRow]) -> CityReportRow {
    let total = rows.len();
    let stagnant = rows.iter().filter(|r| is_stagnant(r)).count();
    let stagnant_share = share(stagnant, total);
    let sold_out = rows.iter().filter(|r| r.net_rate >= 100.0).count();

    let txns: usize = rows.iter().map(|r| r.cumulative_transactions).sum();
    let cancels: usize = rows.iter().map(|r| r.cumulative_cancellations).sum();
    let cancellation_rate = pct(cancels as f64, txns as f64);

    let mut cancellation_points = 0;
    if cancellation_rate > 2.0 {
        cancellation_points += 3;
    } else if cancellation_rate > 1.0 {
        cancellation_points += 1;
    }
    let high_cancel_share = share(rows.iter().filter(|r| r.cumulative_cancellation_rate > 5.0).count(), total);
    if high_cancel_share > 25.0 {
        cancellation_points += 2;
    } else if high_cancel_share > 15.0 {
        cancellation_points += 1;
    }
    if stagnant_share > 15.0 {
        cancellation_points += 1;
    }

    let avg_speed = weighted_speed(rows);
    let mean_net = mean(&rows.iter().map(|r| r.net_rate).collect::<Vec<_>>());
    let score = city_performance_score(avg_speed, mean_net, share(sold_out, total));

    let high_risk_districts = districts.iter().filter(|d| d.is_high_risk()).count();
    let mean_cancellation = mean(&rows.iter().map(|r| r.cumulative_cancellation_rate).collect::<Vec<_>>());
    let risk_factors = [
        share(high_risk_districts, districts.len().max(1)) > 25.0,
        mean_cancellation > 3.0,
        stagnant_share > 20.0,
        avg_speed < 1.0,
    ];
    let risk_points = 2 * risk_factors.iter().filter(|f| **f).count() as u32;

    CityReportRow {
        county: county.to_string(),
        season: season.to_string(),
        active_districts: districts.iter().filter(|d| d.active_projects > 0).count(),
        total_projects: total,
        new_projects: rows.iter().filter(|r| r.sales_start_season == season).count(),
        sold_out_projects: sold_out,
        total_units: rows.iter().map(|r| r.total_units).sum(),
        total_transactions: txns,
        net_rate: round_to(net_absorption(rows), 2),
        stagnant_share: round_to(stagnant_share, 2),
        total_cancellations: cancels,
        cancellation_rate: round_to(cancellation_rate, 2),
        cancellation_risk: classify_risk_level(cancellation_points).display(),
        avg_speed: round_to(avg_speed, 2),
        performance_score: score,
        performance_grade: city_performance_grade(score).to_string(),
        weighted_unit_price: round_to(weighted_unit_price(rows), 2),
        price_change: 0.0,
        hotspot_districts: hotspot_districts(districts),
        high_risk_districts,
        risk_level: classify_risk_level(risk_points).display(),
    }
}

/// Fill `price_change` from the same county's preceding season.
fn apply_price_changes(rows: &mut [CityReportRow]) {
    let prices: HashMap<(String, YearSeason), f64> = rows
        .iter()
        .filter_map(|r| Some(((r.county.clone(), r.season.parse().ok()?), r.weighted_unit_price)))
        .collect();
    for row in rows.iter_mut() {
        let Ok(season) = row.season.parse::<YearSeason>() else {
            continue;
        };
        let previous = prices.get(&(row.county.clone(), season.prev())).copied().unwrap_or(0.0);
        row.price_change = if previous > 0.0 && row.weighted_unit_price > 0.0 {
            round_to((row.weighted_unit_price - previous) / previous * 100.0, 2)
        } else {
            0.0
        };
    }
}

/// One row per (county, season).
pub fn aggregate_cities(community: &[CommunityReportRow], districts: &[DistrictReportRow]) -> Vec<CityReportRow> {
    let mut groups: BTreeMap<(&str, &str), Vec<&CommunityReportRow>> = BTreeMap::new();
    for row in community {
        groups.entry((row.county.as_str(), row.season.as_str())).or_default().push(row);
    }
    let mut district_groups: HashMap<(&str, &str), Vec<&DistrictReportRow>> = HashMap::new();
    for d in districts {
        district_groups.entry((d.county.as_str(), d.season.as_str())).or_default().push(d);
    }

    let mut out: Vec<CityReportRow> = groups
        .into_iter()
        .map(|((county, season), rows)| {
            let ds = district_groups.get(&(county, season)).map(Vec::as_slice).unwrap_or(&[]);
            city_row(county, season, &rows, ds)
        })
        .collect();
    apply_price_changes(&mut out);

    info!(
        cities = out.len(),
        high_risk = out.iter().filter(|c| c.is_high_risk()).count(),
        "City aggregation complete"
    );
    out
}

pub fn write_district_report(path: &Path, rows: &[DistrictReportRow]) -> Result<()> {
    write_csv(path, rows)
}

pub fn write_city_report(path: &Path, rows: &[CityReportRow]) -> Result<()> {
    write_csv(path, rows)
}

// =============================================================================
// CONSISTENCY
// =============================================================================

/// Outcome of one cross-level check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelCheck {
    pub total_checks: usize,
    pub issues_found: usize,
    /// First few issues
    pub issues: Vec<String>,
    pub pass_rate: f64,
}

impl LevelCheck {
    fn from_issues(total_checks: usize, issues: Vec<String>) -> Self {
        let issues_found = issues.len();
        let pass_rate = (1.0 - issues_found as f64 / total_checks.max(1) as f64) * 100.0;
        Self {
            total_checks,
            issues_found,
            issues: issues.into_iter().take(ISSUE_DETAIL_LIMIT).collect(),
            pass_rate: round_to(pass_rate.max(0.0), 2),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeasonCoverage {
    pub communities: usize,
    pub districts: usize,
    pub cities: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub by_season: BTreeMap<String, SeasonCoverage>,
    pub communities_with_transactions: usize,
    pub communities_with_complete_info: usize,
    pub districts_with_active_projects: usize,
    pub cities_with_active_districts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub community_to_district: LevelCheck,
    pub district_to_city: LevelCheck,
    pub aggregation_accuracy: LevelCheck,
    pub coverage: Coverage,
    pub overall_score: f64,
    pub recommendations: Vec<String>,
}

impl ConsistencyReport {
    pub fn passes(&self) -> bool {
        self.overall_score >= CONSISTENCY_TARGET
    }
}

/// Cross-check the three report levels.
pub fn validate_consistency(
    community: &[CommunityReportRow],
    districts: &[DistrictReportRow],
    cities: &[CityReportRow],
) -> ConsistencyReport {
    let district_index: HashMap<(&str, &str, &str), &DistrictReportRow> = districts
        .iter()
        .map(|d| ((d.county.as_str(), d.district.as_str(), d.season.as_str()), d))
        .collect();
    let city_index: HashMap<(&str, &str), &CityReportRow> =
        cities.iter().map(|c| ((c.county.as_str(), c.season.as_str()), c)).collect();

    let mut community_groups: BTreeMap<(&str, &str, &str), Vec<&CommunityReportRow>> = BTreeMap::new();
    for row in community {
        community_groups
            .entry((row.county.as_str(), row.district.as_str(), row.season.as_str()))
            .or_default()
            .push(row);
    }

    // Community → district
    let mut issues = Vec::new();
    for (key, rows) in &community_groups {
        let (county, district, season) = *key;
        let Some(d) = district_index.get(key) else {
            issues.push(format!("Missing district row: {}{} {}", county, district, season));
            continue;
        };
        let active = rows.iter().filter(|r| is_active(r)).count();
        if active != d.active_projects {
            issues.push(format!(
                "Active projects differ: {}{} {} ({} vs {})",
                county, district, season, active, d.active_projects
            ));
        }
        let units: u32 = rows.iter().map(|r| r.total_units).sum();
        if units.abs_diff(d.total_units) > 1 {
            issues.push(format!(
                "Unit totals differ: {}{} {} ({} vs {})",
                county, district, season, units, d.total_units
            ));
        }
        let cancels: usize = rows.iter().map(|r| r.cumulative_cancellations).sum();
        if cancels != d.total_cancellations {
            issues.push(format!(
                "Cancellation totals differ: {}{} {} ({} vs {})",
                county, district, season, cancels, d.total_cancellations
            ));
        }
    }
    let community_to_district = LevelCheck::from_issues(community_groups.len(), issues);

    // District → city
    let mut district_groups: BTreeMap<(&str, &str), Vec<&DistrictReportRow>> = BTreeMap::new();
    for d in districts {
        district_groups.entry((d.county.as_str(), d.season.as_str())).or_default().push(d);
    }
    let mut issues = Vec::new();
    for (key, ds) in &district_groups {
        let (county, season) = *key;
        let Some(c) = city_index.get(key) else {
            issues.push(format!("Missing city row: {} {}", county, season));
            continue;
        };
        let active = ds.iter().filter(|d| d.active_projects > 0).count();
        if active != c.active_districts {
            issues.push(format!(
                "Active districts differ: {} {} ({} vs {})",
                county, season, active, c.active_districts
            ));
        }
        let units: u32 = ds.iter().map(|d| d.total_units).sum();
        if units.abs_diff(c.total_units) > 10 {
            issues.push(format!("Unit totals differ: {} {} ({} vs {})", county, season, units, c.total_units));
        }
        let high_risk = ds.iter().filter(|d| d.is_high_risk()).count();
        if high_risk != c.high_risk_districts {
            issues.push(format!(
                "High-risk districts differ: {} {} ({} vs {})",
                county, season, high_risk, c.high_risk_districts
            ));
        }
    }
    let district_to_city = LevelCheck::from_issues(district_groups.len(), issues);

    // Recomputed district absorption
    let mut issues = Vec::new();
    let mut checked = 0;
    for d in districts {
        let Some(rows) = community_groups.get(&(d.county.as_str(), d.district.as_str(), d.season.as_str())) else {
            continue;
        };
        let units: u32 = rows.iter().map(|r| r.total_units).sum();
        if units == 0 {
            continue;
        }
        checked += 1;
        let txns: usize = rows.iter().map(|r| r.cumulative_transactions).sum();
        let cancels: usize = rows.iter().map(|r| r.cumulative_cancellations).sum();
        let recomputed = (txns as f64 - cancels as f64) / units as f64 * 100.0;
        if (recomputed - d.net_rate).abs() > 1.0 {
            issues.push(format!(
                "Absorption differs: {}{} {} ({:.1}% vs {:.1}%)",
                d.county, d.district, d.season, recomputed, d.net_rate
            ));
        }
    }
    let aggregation_accuracy = LevelCheck::from_issues(checked, issues);

    // Coverage
    let mut coverage = Coverage::default();
    for row in community {
        coverage.by_season.entry(row.season.clone()).or_default().communities += 1;
    }
    for d in districts {
        coverage.by_season.entry(d.season.clone()).or_default().districts += 1;
    }
    for c in cities {
        coverage.by_season.entry(c.season.clone()).or_default().cities += 1;
    }
    coverage.communities_with_transactions = community.iter().filter(|r| r.cumulative_transactions > 0).count();
    coverage.communities_with_complete_info = community
        .iter()
        .filter(|r| !r.code.is_empty() && !r.county.is_empty() && r.total_units > 0)
        .count();
    coverage.districts_with_active_projects = districts.iter().filter(|d| d.active_projects > 0).count();
    coverage.cities_with_active_districts = cities.iter().filter(|c| c.active_districts > 0).count();

    let overall_score = round_to(
        (community_to_district.pass_rate + district_to_city.pass_rate + aggregation_accuracy.pass_rate) / 3.0,
        2,
    );

    let mut recommendations = Vec::new();
    for (name, check) in [
        ("Community → district", &community_to_district),
        ("District → city", &district_to_city),
        ("Aggregation accuracy", &aggregation_accuracy),
    ] {
        if check.pass_rate < CONSISTENCY_TARGET {
            recommendations.push(format!("{} pass rate {:.1}% is below target, review the aggregation", name, check.pass_rate));
        }
    }
    let complete_share = share(coverage.communities_with_complete_info, community.len());
    if !community.is_empty() && complete_share < 90.0 {
        recommendations.push(format!("Only {:.1}% of community rows have complete basic info", complete_share));
    }

    let report = ConsistencyReport {
        community_to_district,
        district_to_city,
        aggregation_accuracy,
        coverage,
        overall_score,
        recommendations,
    };
    if report.passes() {
        info!(score = report.overall_score, "Three-level consistency check passed");
    } else {
        warn!(score = report.overall_score, "Three-level consistency below target");
    }
    report
}

/// Counties, districts and seasons seen in the community report.
pub fn distinct_regions(community: &[CommunityReportRow]) -> (usize, usize, usize) {
    let counties: BTreeSet<&str> = community.iter().map(|r| r.county.as_str()).collect();
    let districts: BTreeSet<(&str, &str)> = community.iter().map(|r| (r.county.as_str(), r.district.as_str())).collect();
    let seasons: BTreeSet<&str> = community.iter().map(|r| r.season.as_str()).collect();
    (counties.len(), districts.len(), seasons.len())
}
