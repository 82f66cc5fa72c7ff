//! Market Insights
//!
//! Specialised analyses over the three report levels. Each analysis is a
//! plain function from the reports (and, for the later ones, from earlier
//! analyses) to a serializable struct; `generate_insights` runs them in
//! dependency order.
//!
//! ```text
//! community ─┐
//! district  ─┼─▶ cancellation ─┐
//! city      ─┘   speed ────────┼─▶ dashboard, market ─▶ policy
//!                efficiency ───┘
//!                hotspots, three-level
//! ```

use crate::analysis::aggregation::{CityReportRow, DistrictReportRow};
use crate::analysis::community_report::CommunityReportRow;
use crate::analysis::kmeans::{standardize, KMeans};
use crate::analysis::stats::{mean, pct, pearson, population_std, quantile, std_dev, Describe};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Cumulative cancellation rate (%) above which a project counts as
/// high-cancellation.
pub const HIGH_CANCELLATION_RATE: f64 = 5.0;
const CLUSTER_MIN_ROWS: usize = 10;
const CORRELATION_MIN_ROWS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct InsightInputs<'a> {
    pub community: &'a [CommunityReportRow],
    pub districts: &'a [DistrictReportRow],
    pub cities: &'a [CityReportRow],
}

// ============================================================================
// Shared enums and helpers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    /// Gauge value: LOW 1, MEDIUM 2, HIGH 3.
    pub fn score(&self) -> u8 {
        match self {
            Level::Low => 1,
            Level::Medium => 2,
            Level::High => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outlook {
    Positive,
    Negative,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketHealth {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl MarketHealth {
    pub fn from_points(points: u32) -> Self {
        match points {
            p if p >= 5 => MarketHealth::Excellent,
            p if p >= 3 => MarketHealth::Good,
            p if p >= 1 => MarketHealth::Fair,
            _ => MarketHealth::Poor,
        }
    }

    /// Gauge value: POOR 1 up to EXCELLENT 4.
    pub fn score(&self) -> u8 {
        match self {
            MarketHealth::Poor => 1,
            MarketHealth::Fair => 2,
            MarketHealth::Good => 3,
            MarketHealth::Excellent => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketBalance {
    Oversupply,
    Balanced,
    HighDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stability {
    Stable,
    Volatile,
    HighlyVolatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecentTrend {
    Improving,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Concentration {
    Dispersed,
    Concentrated,
}

/// Chart-ready label/value pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelValue {
    pub label: String,
    pub value: f64,
}

impl LabelValue {
    fn new(label: impl Into<String>, value: f64) -> Self {
        Self { label: label.into(), value }
    }
}

/// Count and share of a category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub count: usize,
    pub percentage: f64,
}

fn group_by<'a, T, K, F>(rows: &'a [T], key: F) -> BTreeMap<K, Vec<&'a T>>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    let mut groups: BTreeMap<K, Vec<&'a T>> = BTreeMap::new();
    for row in rows {
        groups.entry(key(row)).or_default().push(row);
    }
    groups
}

/// Distinct values in first-seen order.
fn unique_in_order<'a, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

/// Occurrence counts, most frequent first, ties by name.
fn value_counts<'a, I>(values: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

fn distribution<'a, I>(values: I) -> BTreeMap<String, usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = BTreeMap::new();
    for value in values {
        *out.entry(value.to_string()).or_default() += 1;
    }
    out
}

fn column<T>(rows: &[&T], f: impl Fn(&T) -> f64) -> Vec<f64> {
    rows.iter().map(|r| f(r)).collect()
}

// ============================================================================
// Cancellation trend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonCancellation {
    pub season: String,
    pub total_projects: usize,
    pub high_cancellation_projects: usize,
    pub high_cancellation_ratio: f64,
    pub avg_cancellation_rate: f64,
    pub max_cancellation_rate: f64,
    /// Projects whose cancellation alert is 🔴
    pub high_risk_count: usize,
    pub high_risk_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyCancellation {
    pub county: String,
    pub avg_cancellation: f64,
    pub max_cancellation: f64,
    pub total_projects: usize,
    pub high_cancellation_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighRiskDistrict {
    pub county: String,
    pub district: String,
    pub season: String,
    pub cancellation_rate: f64,
    pub risk_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketImpact {
    pub affected_projects: usize,
    pub total_cancellations: usize,
    /// Cancellation rate vs net rate; 0 when too few rows
    pub correlation_with_absorption: f64,
    pub economic_impact: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationTrend {
    pub seasons: Vec<SeasonCancellation>,
    pub counties: Vec<CountyCancellation>,
    pub high_risk_districts: Vec<HighRiskDistrict>,
    pub overall_risk_level: Level,
    pub market_average: f64,
    pub trend: Trend,
    /// Top counties by number of high-cancellation projects
    pub risk_concentration: Vec<(String, usize)>,
    pub market_impact: MarketImpact,
    pub insights: Vec<String>,
}

fn is_high_cancellation(row: &CommunityReportRow) -> bool {
    row.cumulative_cancellation_rate > HIGH_CANCELLATION_RATE
}

pub fn cancellation_trend_analysis(inputs: &InsightInputs<'_>) -> CancellationTrend {
    let community = inputs.community;

    let seasons: Vec<SeasonCancellation> = group_by(community, |r| r.season.clone())
        .into_iter()
        .map(|(season, rows)| {
            let rates = column(&rows, |r| r.cumulative_cancellation_rate);
            let high = rows.iter().filter(|r| is_high_cancellation(r)).count();
            let red = rows.iter().filter(|r| r.cancellation_alert.contains('🔴')).count();
            SeasonCancellation {
                season,
                total_projects: rows.len(),
                high_cancellation_projects: high,
                high_cancellation_ratio: pct(high as f64, rows.len() as f64),
                avg_cancellation_rate: mean(&rates),
                max_cancellation_rate: rates.iter().copied().fold(0.0, f64::max),
                high_risk_count: red,
                high_risk_ratio: pct(red as f64, rows.len() as f64),
            }
        })
        .collect();

    let counties = group_by(community, |r| r.county.clone())
        .into_iter()
        .map(|(county, rows)| {
            let rates = column(&rows, |r| r.cumulative_cancellation_rate);
            let high = rows.iter().filter(|r| is_high_cancellation(r)).count();
            CountyCancellation {
                county,
                avg_cancellation: mean(&rates),
                max_cancellation: rates.iter().copied().fold(0.0, f64::max),
                total_projects: rows.len(),
                high_cancellation_ratio: pct(high as f64, rows.len() as f64),
            }
        })
        .collect();

    let high_risk_districts = inputs
        .districts
        .iter()
        .filter(|d| d.cancellation_rate > 3.0)
        .map(|d| HighRiskDistrict {
            county: d.county.clone(),
            district: d.district.clone(),
            season: d.season.clone(),
            cancellation_rate: d.cancellation_rate,
            risk_level: d.cancellation_risk.clone(),
        })
        .collect();

    let all_rates: Vec<f64> = community.iter().map(|r| r.cumulative_cancellation_rate).collect();
    let high_share = pct(
        community.iter().filter(|r| is_high_cancellation(r)).count() as f64,
        community.len() as f64,
    );
    let overall_risk_level = if high_share > 15.0 {
        Level::High
    } else if high_share > 8.0 {
        Level::Medium
    } else {
        Level::Low
    };

    let trend = match (seasons.first(), seasons.last()) {
        (Some(first), Some(last)) if seasons.len() >= 2 => {
            if last.high_cancellation_ratio > first.high_cancellation_ratio * 1.2 {
                Trend::Increasing
            } else if last.high_cancellation_ratio < first.high_cancellation_ratio * 0.8 {
                Trend::Decreasing
            } else {
                Trend::Stable
            }
        }
        _ => Trend::Stable,
    };

    let risk_concentration: Vec<(String, usize)> = value_counts(
        community.iter().filter(|r| is_high_cancellation(r)).map(|r| r.county.as_str()),
    )
    .into_iter()
    .take(5)
    .collect();

    let market_average = mean(&all_rates);
    let correlation = if community.len() > CORRELATION_MIN_ROWS {
        let net: Vec<f64> = community.iter().map(|r| r.net_rate).collect();
        pearson(&all_rates, &net).unwrap_or(0.0)
    } else {
        0.0
    };
    let market_impact = MarketImpact {
        affected_projects: community.iter().filter(|r| r.cumulative_cancellation_rate > 0.0).count(),
        total_cancellations: community.iter().map(|r| r.cumulative_cancellations).sum(),
        correlation_with_absorption: correlation,
        economic_impact: if market_average > 3.0 {
            Level::High
        } else if market_average < 1.0 {
            Level::Low
        } else {
            Level::Medium
        },
    };

    let mut insights = Vec::new();
    if overall_risk_level == Level::High {
        insights.push("市場解約風險偏高，需要密切監控解約趨勢".to_string());
    }
    if trend == Trend::Increasing {
        insights.push("解約率呈現上升趨勢，建議加強風險管控".to_string());
    }
    if risk_concentration.len() > 3 {
        insights.push("解約風險存在地區集中現象，需關注特定區域".to_string());
    }
    if market_impact.correlation_with_absorption < -0.3 {
        insights.push("解約率與去化率呈現負相關，解約可能影響銷售表現".to_string());
    }
    if insights.is_empty() {
        insights.push("整體解約風險控制良好，市場狀況穩定".to_string());
    }

    CancellationTrend {
        seasons,
        counties,
        high_risk_districts,
        overall_risk_level,
        market_average,
        trend,
        risk_concentration,
        market_impact,
        insights,
    }
}

// ============================================================================
// Absorption speed
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedCategories {
    /// speed ≥ 3
    pub high: CategoryShare,
    /// 1 ≤ speed < 3
    pub normal: CategoryShare,
    /// 0 < speed < 1
    pub slow: CategoryShare,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopCity {
    pub county: String,
    pub season: String,
    pub net_rate: f64,
    pub avg_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonPerformance {
    pub season: String,
    pub avg_absorption_rate: f64,
    pub avg_speed: f64,
    pub completion_rate: f64,
    pub total_projects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendChange {
    pub absorption_rate_change: f64,
    pub speed_change: f64,
    pub completion_rate_change: f64,
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    pub avg_absorption: f64,
    pub avg_speed: f64,
    pub avg_cancellation: f64,
    pub characteristics: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedAnalysis {
    /// Community speeds above zero
    pub community_speed: Describe,
    pub categories: Option<SpeedCategories>,
    /// District speeds above zero
    pub district_speed: Describe,
    pub efficiency_distribution: BTreeMap<String, usize>,
    pub city_grade_distribution: BTreeMap<String, usize>,
    pub top_cities: Vec<TopCity>,
    pub seasonal_trends: Vec<SeasonPerformance>,
    pub trend_change: Option<TrendChange>,
    pub clusters: Vec<ClusterProfile>,
    pub outlook: Option<Outlook>,
    pub outlook_reason: Option<String>,
    pub health_points: u32,
    pub market_health: MarketHealth,
}

pub fn classify_cluster(avg_absorption: f64, avg_speed: f64, avg_cancellation: f64) -> &'static str {
    if avg_absorption >= 60.0 && avg_speed >= 2.0 {
        "高效表現群"
    } else if avg_absorption >= 40.0 && avg_speed >= 1.0 {
        "穩定表現群"
    } else if avg_cancellation > 3.0 {
        "風險關注群"
    } else {
        "一般表現群"
    }
}

fn completion_rate(rows: &[&CommunityReportRow]) -> f64 {
    pct(rows.iter().filter(|r| r.net_rate >= 100.0).count() as f64, rows.len() as f64)
}

/// k-means over z-scored (net rate, speed, cancellation rate).
pub fn cluster_projects(community: &[CommunityReportRow]) -> Vec<ClusterProfile> {
    if community.len() <= CLUSTER_MIN_ROWS {
        return Vec::new();
    }
    let features: Vec<Vec<f64>> = community
        .iter()
        .map(|r| vec![r.net_rate, r.speed, r.cumulative_cancellation_rate])
        .collect();
    let kmeans = KMeans::default();
    let Some(clustering) = kmeans.fit(&standardize(&features)) else {
        return Vec::new();
    };

    (0..kmeans.k)
        .map(|cluster| {
            let members: Vec<&CommunityReportRow> = community
                .iter()
                .zip(&clustering.labels)
                .filter(|(_, l)| **l == cluster)
                .map(|(r, _)| r)
                .collect();
            let avg_absorption = mean(&column(&members, |r| r.net_rate));
            let avg_speed = mean(&column(&members, |r| r.speed));
            let avg_cancellation = mean(&column(&members, |r| r.cumulative_cancellation_rate));
            ClusterProfile {
                cluster,
                size: members.len(),
                avg_absorption,
                avg_speed,
                avg_cancellation,
                characteristics: classify_cluster(avg_absorption, avg_speed, avg_cancellation).to_string(),
            }
        })
        .collect()
}

pub fn absorption_speed_analysis(inputs: &InsightInputs<'_>) -> SpeedAnalysis {
    let community = inputs.community;

    let speeds: Vec<f64> = community.iter().map(|r| r.speed).filter(|s| *s > 0.0).collect();
    let categories = if speeds.is_empty() {
        None
    } else {
        let total = speeds.len() as f64;
        let share = |count: usize| CategoryShare { count, percentage: pct(count as f64, total) };
        Some(SpeedCategories {
            high: share(speeds.iter().filter(|s| **s >= 3.0).count()),
            normal: share(speeds.iter().filter(|s| (1.0..3.0).contains(*s)).count()),
            slow: share(speeds.iter().filter(|s| **s < 1.0).count()),
        })
    };
    let district_speeds: Vec<f64> = inputs.districts.iter().map(|d| d.avg_speed).filter(|s| *s > 0.0).collect();

    let mut top: Vec<&CityReportRow> = inputs.cities.iter().collect();
    top.sort_by(|a, b| b.net_rate.total_cmp(&a.net_rate));
    let top_cities = top
        .into_iter()
        .take(5)
        .map(|c| TopCity {
            county: c.county.clone(),
            season: c.season.clone(),
            net_rate: c.net_rate,
            avg_speed: c.avg_speed,
        })
        .collect();

    let by_season = group_by(community, |r| r.season.clone());
    let seasonal_trends: Vec<SeasonPerformance> = if by_season.len() > 1 {
        by_season
            .into_iter()
            .map(|(season, rows)| SeasonPerformance {
                season,
                avg_absorption_rate: mean(&column(&rows, |r| r.net_rate)),
                avg_speed: mean(&column(&rows, |r| r.speed)),
                completion_rate: completion_rate(&rows),
                total_projects: rows.len(),
            })
            .collect()
    } else {
        Vec::new()
    };

    let trend_change = match (seasonal_trends.first(), seasonal_trends.last()) {
        (Some(first), Some(last)) if seasonal_trends.len() >= 2 => Some(TrendChange {
            absorption_rate_change: last.avg_absorption_rate - first.avg_absorption_rate,
            speed_change: last.avg_speed - first.avg_speed,
            completion_rate_change: last.completion_rate - first.completion_rate,
            period: format!("{} → {}", first.season, last.season),
        }),
        _ => None,
    };

    let (outlook, outlook_reason) = match &trend_change {
        Some(change) if change.absorption_rate_change > 5.0 => (Some(Outlook::Positive), Some("去化率呈現上升趨勢")),
        Some(change) if change.absorption_rate_change < -5.0 => (Some(Outlook::Negative), Some("去化率呈現下降趨勢")),
        Some(_) => (Some(Outlook::Stable), Some("去化率保持穩定")),
        None => (None, None),
    };

    let community_speed = Describe::of(&speeds);
    let mut health_points = 0;
    if !speeds.is_empty() {
        health_points += match community_speed.mean {
            s if s >= 2.5 => 3,
            s if s >= 1.5 => 2,
            s if s >= 1.0 => 1,
            _ => 0,
        };
    }
    if !community.is_empty() {
        let avg_net = mean(&community.iter().map(|r| r.net_rate).collect::<Vec<_>>());
        health_points += match avg_net {
            n if n >= 60.0 => 3,
            n if n >= 40.0 => 2,
            n if n >= 20.0 => 1,
            _ => 0,
        };
    }

    SpeedAnalysis {
        community_speed,
        categories,
        district_speed: Describe::of(&district_speeds),
        efficiency_distribution: distribution(community.iter().map(|r| r.efficiency_grade.as_str())),
        city_grade_distribution: distribution(inputs.cities.iter().map(|c| c.performance_grade.as_str())),
        top_cities,
        seasonal_trends,
        trend_change,
        clusters: cluster_projects(community),
        outlook,
        outlook_reason: outlook_reason.map(str::to_string),
        health_points,
        market_health: MarketHealth::from_points(health_points),
    }
}

// ============================================================================
// Efficiency ranking
// ============================================================================

/// 0.4 × rate + 0.3 × speed × 20 + 0.2 × (100 − stagnant) + 0.1 × (100 − cancellation × 10)
pub fn efficiency_score(net_rate: f64, speed: f64, stagnant_share: f64, cancellation_rate: f64) -> f64 {
    net_rate * 0.4 + speed * 20.0 * 0.3 + (100.0 - stagnant_share) * 0.2 + (100.0 - cancellation_rate * 10.0) * 0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRanking {
    pub county: String,
    pub season: String,
    pub score: f64,
    pub ranking: usize,
    pub net_rate: f64,
    pub avg_speed: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictRanking {
    pub district: String,
    pub season: String,
    pub score: f64,
    pub county_ranking: usize,
    pub net_rate: f64,
    pub avg_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    /// q90
    pub excellent: f64,
    /// q75
    pub good: f64,
    pub average: f64,
    /// q25
    pub poor: f64,
}

impl Benchmark {
    pub fn of(values: &[f64]) -> Option<Self> {
        Some(Self {
            excellent: quantile(values, 0.9)?,
            good: quantile(values, 0.75)?,
            average: quantile(values, 0.5)?,
            poor: quantile(values, 0.25)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyPerformance {
    pub county: String,
    pub avg_absorption: f64,
    pub avg_speed: f64,
    /// Share of rows at or above the q75 net-rate benchmark
    pub high_performance_ratio: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupImpact {
    pub group: String,
    pub mean_net_rate: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Competition {
    pub name: String,
    pub season: String,
    pub own_rate: f64,
    pub competitor_avg: f64,
    pub advantage: f64,
    pub rank: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementOpportunity {
    pub county: String,
    pub low_efficiency_count: usize,
    pub avg_absorption: f64,
    pub avg_cancellation: f64,
    pub potential: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPractice {
    pub county: String,
    pub district: String,
    pub name: String,
    pub net_rate: f64,
    pub speed: f64,
    pub cancellation_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyRanking {
    pub city_ranking: Vec<CityRanking>,
    pub district_ranking: BTreeMap<String, Vec<DistrictRanking>>,
    pub absorption_benchmark: Option<Benchmark>,
    pub speed_benchmark: Option<Benchmark>,
    pub county_performance: Vec<CountyPerformance>,
    pub price_correlation: Option<f64>,
    pub cancellation_correlation: Option<f64>,
    pub stage_impact: Vec<GroupImpact>,
    pub size_impact: Vec<GroupImpact>,
    pub district_competition: Vec<Competition>,
    pub city_competition: Vec<Competition>,
    pub improvement_opportunities: Vec<ImprovementOpportunity>,
    pub best_practices: Vec<BestPractice>,
}

pub fn size_bucket(units: u32) -> Option<&'static str> {
    match units {
        0 => None,
        1..=50 => Some("小型(≤50)"),
        51..=100 => Some("中型(51-100)"),
        101..=200 => Some("大型(101-200)"),
        _ => Some("超大型(>200)"),
    }
}

fn group_impact(groups: BTreeMap<String, Vec<&CommunityReportRow>>) -> Vec<GroupImpact> {
    groups
        .into_iter()
        .map(|(group, rows)| GroupImpact {
            group,
            mean_net_rate: mean(&column(&rows, |r| r.net_rate)),
            count: rows.len(),
        })
        .collect()
}

fn competition<T>(
    rows: &[T],
    own: &T,
    name: String,
    season: &str,
    is_competitor: impl Fn(&T) -> bool,
    rate: impl Fn(&T) -> f64,
) -> Option<Competition> {
    let others: Vec<f64> = rows.iter().filter(|r| is_competitor(r)).map(&rate).collect();
    if others.is_empty() {
        return None;
    }
    let own_rate = rate(own);
    let competitor_avg = mean(&others);
    Some(Competition {
        name,
        season: season.to_string(),
        own_rate,
        competitor_avg,
        advantage: own_rate - competitor_avg,
        rank: others.iter().filter(|r| **r < own_rate).count() + 1,
        total: others.len() + 1,
    })
}

pub fn efficiency_ranking_analysis(inputs: &InsightInputs<'_>) -> EfficiencyRanking {
    let community = inputs.community;

    let mut scored_cities: Vec<(&CityReportRow, f64)> = inputs
        .cities
        .iter()
        .map(|c| (c, efficiency_score(c.net_rate, c.avg_speed, c.stagnant_share, c.cancellation_rate)))
        .collect();
    scored_cities.sort_by(|a, b| b.1.total_cmp(&a.1));
    let city_ranking = scored_cities
        .iter()
        .take(10)
        .enumerate()
        .map(|(i, (c, score))| CityRanking {
            county: c.county.clone(),
            season: c.season.clone(),
            score: *score,
            ranking: i + 1,
            net_rate: c.net_rate,
            avg_speed: c.avg_speed,
            grade: c.performance_grade.clone(),
        })
        .collect();

    let district_ranking = group_by(inputs.districts, |d| d.county.clone())
        .into_iter()
        .map(|(county, rows)| {
            let mut scored: Vec<(&DistrictReportRow, f64)> = rows
                .into_iter()
                .map(|d| (d, efficiency_score(d.net_rate, d.avg_speed, d.stagnant_impact, d.cancellation_rate)))
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            let ranked: Vec<DistrictRanking> = scored
                .into_iter()
                .take(5)
                .enumerate()
                .map(|(i, (d, score))| DistrictRanking {
                    district: d.district.clone(),
                    season: d.season.clone(),
                    score,
                    county_ranking: i + 1,
                    net_rate: d.net_rate,
                    avg_speed: d.avg_speed,
                })
                .collect();
            (county, ranked)
        })
        .collect();

    let net: Vec<f64> = community.iter().map(|r| r.net_rate).collect();
    let cancel: Vec<f64> = community.iter().map(|r| r.cumulative_cancellation_rate).collect();
    let speeds: Vec<f64> = community.iter().map(|r| r.speed).filter(|s| *s > 0.0).collect();
    let absorption_benchmark = Benchmark::of(&net);

    let county_performance = group_by(community, |r| r.county.clone())
        .into_iter()
        .map(|(county, rows)| {
            let high = absorption_benchmark
                .map(|b| rows.iter().filter(|r| r.net_rate >= b.good).count())
                .unwrap_or(0);
            CountyPerformance {
                county,
                avg_absorption: mean(&column(&rows, |r| r.net_rate)),
                avg_speed: mean(&column(&rows, |r| r.speed)),
                high_performance_ratio: pct(high as f64, rows.len() as f64),
                sample_size: rows.len(),
            }
        })
        .collect();

    let priced: Vec<&CommunityReportRow> = community.iter().filter(|r| r.avg_unit_price > 0.0).collect();
    let price_correlation = pearson(&column(&priced, |r| r.avg_unit_price), &column(&priced, |r| r.net_rate));

    let stage_impact = group_impact(group_by(community, |r| r.stage.clone()));
    let mut sized: BTreeMap<String, Vec<&CommunityReportRow>> = BTreeMap::new();
    for row in community {
        if let Some(bucket) = size_bucket(row.total_units) {
            sized.entry(bucket.to_string()).or_default().push(row);
        }
    }
    let size_impact = group_impact(sized);

    let district_competition = inputs
        .districts
        .iter()
        .filter_map(|d| {
            competition(
                inputs.districts,
                d,
                format!("{}_{}", d.county, d.district),
                &d.season,
                |o| o.county == d.county && o.district != d.district,
                |o| o.net_rate,
            )
        })
        .collect();
    let city_competition = inputs
        .cities
        .iter()
        .filter_map(|c| {
            competition(inputs.cities, c, c.county.clone(), &c.season, |o| o.county != c.county, |o| o.net_rate)
        })
        .collect();

    let mut improvement_opportunities = Vec::new();
    if let (Some(net_q25), Some(cancel_q75)) = (quantile(&net, 0.25), quantile(&cancel, 0.75)) {
        let low: Vec<&CommunityReportRow> = community
            .iter()
            .filter(|r| r.net_rate < net_q25 && r.cumulative_cancellation_rate > cancel_q75)
            .collect();
        for county in unique_in_order(low.iter().map(|r| r.county.as_str())) {
            let rows: Vec<&CommunityReportRow> = low.iter().copied().filter(|r| r.county == county).collect();
            improvement_opportunities.push(ImprovementOpportunity {
                low_efficiency_count: rows.len(),
                avg_absorption: mean(&column(&rows, |r| r.net_rate)),
                avg_cancellation: mean(&column(&rows, |r| r.cumulative_cancellation_rate)),
                potential: if rows.len() > 5 { Level::High } else { Level::Medium },
                county,
            });
        }
    }

    let best_practices = match (quantile(&net, 0.9), quantile(&cancel, 0.1)) {
        (Some(net_q90), Some(cancel_q10)) => community
            .iter()
            .filter(|r| r.net_rate > net_q90 && r.cumulative_cancellation_rate < cancel_q10)
            .take(10)
            .map(|r| BestPractice {
                county: r.county.clone(),
                district: r.district.clone(),
                name: r.name.clone(),
                net_rate: r.net_rate,
                speed: r.speed,
                cancellation_rate: r.cumulative_cancellation_rate,
            })
            .collect(),
        _ => Vec::new(),
    };

    EfficiencyRanking {
        city_ranking,
        district_ranking,
        absorption_benchmark,
        speed_benchmark: Benchmark::of(&speeds),
        county_performance,
        price_correlation,
        cancellation_correlation: pearson(&cancel, &net),
        stage_impact,
        size_impact,
        district_competition,
        city_competition,
        improvement_opportunities,
        best_practices,
    }
}

// ============================================================================
// Risk dashboard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMatrixRow {
    pub county: String,
    pub districts: Vec<String>,
    /// 1 🟢, 2 🟡, 3 🔴
    pub scores: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScatterPoint {
    pub label: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub label: String,
    pub value: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDashboard {
    pub county_risk_distribution: Vec<LabelValue>,
    pub risk_matrix: Vec<RiskMatrixRow>,
    pub cancellation_trend: Vec<LabelValue>,
    pub stagnant_counties: Vec<LabelValue>,
    pub risk_concentration: Vec<LabelValue>,
    /// x = net rate, y = cumulative cancellation rate
    pub absorption_vs_cancellation: Vec<ScatterPoint>,
    pub high_risk_districts: Vec<LabelValue>,
    pub risk_gauge: Gauge,
    pub health_gauge: Gauge,
}

fn risk_score(level: &str) -> u8 {
    if level.contains('🔴') {
        3
    } else if level.contains('🟡') {
        2
    } else {
        1
    }
}

pub fn risk_dashboard(inputs: &InsightInputs<'_>, cancellation: &CancellationTrend, speed: &SpeedAnalysis) -> RiskDashboard {
    let county_risk_distribution = value_counts(inputs.cities.iter().map(|c| c.risk_level.as_str()))
        .into_iter()
        .map(|(label, count)| LabelValue::new(label, count as f64))
        .collect();

    let risk_matrix = unique_in_order(inputs.districts.iter().map(|d| d.county.as_str()))
        .into_iter()
        .take(10)
        .map(|county| {
            let rows: Vec<&DistrictReportRow> =
                inputs.districts.iter().filter(|d| d.county == county).take(5).collect();
            RiskMatrixRow {
                districts: rows.iter().map(|d| d.district.clone()).collect(),
                scores: rows.iter().map(|d| risk_score(&d.risk_level)).collect(),
                county,
            }
        })
        .collect();

    let mut stagnant: Vec<&CityReportRow> = inputs.cities.iter().collect();
    stagnant.sort_by(|a, b| b.stagnant_share.total_cmp(&a.stagnant_share));
    let stagnant_counties = stagnant
        .into_iter()
        .take(10)
        .map(|c| LabelValue::new(c.county.clone(), c.stagnant_share))
        .collect();

    let mut high_risk: Vec<&DistrictReportRow> =
        inputs.districts.iter().filter(|d| d.cancellation_rate > 2.0).collect();
    high_risk.sort_by(|a, b| b.cancellation_rate.total_cmp(&a.cancellation_rate));
    let high_risk_districts = high_risk
        .into_iter()
        .take(8)
        .map(|d| LabelValue::new(format!("{}-{}", d.county, d.district), d.cancellation_rate))
        .collect();

    RiskDashboard {
        county_risk_distribution,
        risk_matrix,
        cancellation_trend: cancellation
            .seasons
            .iter()
            .map(|s| LabelValue::new(s.season.clone(), s.avg_cancellation_rate))
            .collect(),
        stagnant_counties,
        risk_concentration: cancellation
            .risk_concentration
            .iter()
            .take(8)
            .map(|(county, count)| LabelValue::new(county.clone(), *count as f64))
            .collect(),
        absorption_vs_cancellation: inputs
            .community
            .iter()
            .map(|r| ScatterPoint {
                label: r.name.clone(),
                x: r.net_rate,
                y: r.cumulative_cancellation_rate,
            })
            .collect(),
        high_risk_districts,
        risk_gauge: Gauge {
            label: "整體解約風險".to_string(),
            value: cancellation.overall_risk_level.score() as f64,
            max: 3.0,
        },
        health_gauge: Gauge {
            label: "市場健康度".to_string(),
            value: speed.market_health.score() as f64,
            max: 4.0,
        },
    }
}

// ============================================================================
// Hotspots
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotspotClass {
    Hot,
    Potential,
    Normal,
}

impl HotspotClass {
    pub fn label(&self) -> &'static str {
        match self {
            HotspotClass::Hot => "🔥 熱點區域",
            HotspotClass::Potential => "⭐ 潛力區域",
            HotspotClass::Normal => "🔵 一般區域",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictHotspot {
    pub county: String,
    pub district: String,
    pub season: String,
    pub net_rate: f64,
    pub avg_speed: f64,
    pub cancellation_rate: f64,
    pub stagnant_impact: f64,
    pub class: HotspotClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotAnalysis {
    /// q75 of district net rates
    pub rate_threshold: f64,
    /// q75 of district speeds
    pub speed_threshold: f64,
    /// Every district, best net rate then speed first
    pub ranked: Vec<DistrictHotspot>,
    pub hotspots: Vec<DistrictHotspot>,
    pub cold_spots: Vec<DistrictHotspot>,
    pub top_cities: Vec<LabelValue>,
}

pub fn hotspot_analysis(inputs: &InsightInputs<'_>) -> HotspotAnalysis {
    let rates: Vec<f64> = inputs.districts.iter().map(|d| d.net_rate).collect();
    let speeds: Vec<f64> = inputs.districts.iter().map(|d| d.avg_speed).collect();
    let rate_threshold = quantile(&rates, 0.75).unwrap_or(0.0);
    let speed_threshold = quantile(&speeds, 0.75).unwrap_or(0.0);

    let mut ranked: Vec<DistrictHotspot> = inputs
        .districts
        .iter()
        .map(|d| {
            let fast = d.avg_speed >= speed_threshold;
            let strong = d.net_rate >= rate_threshold;
            DistrictHotspot {
                county: d.county.clone(),
                district: d.district.clone(),
                season: d.season.clone(),
                net_rate: d.net_rate,
                avg_speed: d.avg_speed,
                cancellation_rate: d.cancellation_rate,
                stagnant_impact: d.stagnant_impact,
                class: match (strong, fast) {
                    (true, true) => HotspotClass::Hot,
                    (true, false) | (false, true) => HotspotClass::Potential,
                    (false, false) => HotspotClass::Normal,
                },
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.net_rate
            .total_cmp(&a.net_rate)
            .then_with(|| b.avg_speed.total_cmp(&a.avg_speed))
    });

    let hotspots = ranked
        .iter()
        .filter(|d| d.net_rate > 70.0 && d.cancellation_rate < 2.0)
        .cloned()
        .collect();
    let cold_spots = ranked
        .iter()
        .filter(|d| d.stagnant_impact > 25.0 || d.net_rate < 30.0)
        .cloned()
        .collect();

    let mut cities: Vec<&CityReportRow> = inputs.cities.iter().collect();
    cities.sort_by(|a, b| b.net_rate.total_cmp(&a.net_rate));
    let top_cities = cities
        .into_iter()
        .take(10)
        .map(|c| LabelValue::new(format!("{} {}", c.county, c.season), c.net_rate))
        .collect();

    HotspotAnalysis { rate_threshold, speed_threshold, ranked, hotspots, cold_spots, top_cities }
}

// ============================================================================
// Three-level comparison
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelTriple {
    pub city: f64,
    pub district_mean: f64,
    pub community_mean: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelComparisonRow {
    pub county: String,
    pub season: String,
    pub net_rate: LevelTriple,
    pub speed: LevelTriple,
    pub cancellation_rate: LevelTriple,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRiskCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl LevelRiskCounts {
    fn of<'a, I: IntoIterator<Item = &'a str>>(levels: I) -> Self {
        let mut counts = Self::default();
        for level in levels {
            match risk_score(level) {
                3 => counts.high += 1,
                2 => counts.medium += 1,
                _ => counts.low += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeLevelComparison {
    pub rows: Vec<LevelComparisonRow>,
    pub community_risk: LevelRiskCounts,
    pub district_risk: LevelRiskCounts,
    pub city_risk: LevelRiskCounts,
    /// Mean net rate at each level
    pub level_means: LevelTriple,
}

pub fn three_level_comparison(inputs: &InsightInputs<'_>) -> ThreeLevelComparison {
    let community = group_by(inputs.community, |r| (r.county.clone(), r.season.clone()));
    let districts = group_by(inputs.districts, |d| (d.county.clone(), d.season.clone()));

    let rows = inputs
        .cities
        .iter()
        .map(|city| {
            let key = (city.county.clone(), city.season.clone());
            let c_rows = community.get(&key).map(Vec::as_slice).unwrap_or_default();
            let d_rows = districts.get(&key).map(Vec::as_slice).unwrap_or_default();
            LevelComparisonRow {
                net_rate: LevelTriple {
                    city: city.net_rate,
                    district_mean: mean(&column(d_rows, |d| d.net_rate)),
                    community_mean: mean(&column(c_rows, |r| r.net_rate)),
                },
                speed: LevelTriple {
                    city: city.avg_speed,
                    district_mean: mean(&column(d_rows, |d| d.avg_speed)),
                    community_mean: mean(&column(c_rows, |r| r.speed)),
                },
                cancellation_rate: LevelTriple {
                    city: city.cancellation_rate,
                    district_mean: mean(&column(d_rows, |d| d.cancellation_rate)),
                    community_mean: mean(&column(c_rows, |r| r.cumulative_cancellation_rate)),
                },
                county: key.0,
                season: key.1,
            }
        })
        .collect();

    let nonneg = |values: Vec<f64>| mean(&values.into_iter().filter(|v| *v >= 0.0).collect::<Vec<_>>());
    ThreeLevelComparison {
        rows,
        community_risk: LevelRiskCounts::of(inputs.community.iter().map(|r| r.cancellation_alert.as_str())),
        district_risk: LevelRiskCounts::of(inputs.districts.iter().map(|d| d.risk_level.as_str())),
        city_risk: LevelRiskCounts::of(inputs.cities.iter().map(|c| c.risk_level.as_str())),
        level_means: LevelTriple {
            city: nonneg(inputs.cities.iter().map(|c| c.net_rate).collect()),
            district_mean: nonneg(inputs.districts.iter().map(|d| d.net_rate).collect()),
            community_mean: nonneg(inputs.community.iter().map(|r| r.net_rate).collect()),
        },
    }
}

// ============================================================================
// Market insights
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallAssessment {
    pub total_projects: usize,
    pub avg_absorption_rate: f64,
    pub avg_cancellation_rate: f64,
    /// Share of rows with net rate ≥ 100
    pub completion_rate: f64,
    /// Share of rows with cumulative cancellation above 5%
    pub high_risk_project_ratio: f64,
    pub market_health_score: u32,
    pub market_health_grade: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyDemand {
    pub total_supply: u64,
    pub effective_demand: i64,
    pub absorption_ratio: f64,
    pub market_balance: MarketBalance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    /// Coefficient of variation of the seasonal mean net rates (%)
    pub volatility: f64,
    pub trend_stability: Stability,
    pub recent_trend: RecentTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionDensity {
    pub high_density_areas: usize,
    pub competition_level: Level,
    pub market_concentration: Concentration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInsights {
    pub overall: OverallAssessment,
    pub key_findings: Vec<String>,
    pub risk_warnings: Vec<String>,
    pub opportunities: Vec<String>,
    pub supply_demand: Option<SupplyDemand>,
    pub seasonality: Option<Seasonality>,
    pub competition: Option<CompetitionDensity>,
    pub recommendations: Vec<String>,
}

/// Weighted health score: absorption 40, cancellation 30, completion 20, risk 10.
pub fn market_health_score(avg_absorption: f64, avg_cancellation: f64, completion: f64, high_risk_ratio: f64) -> u32 {
    let absorption = match avg_absorption {
        a if a >= 60.0 => 40,
        a if a >= 40.0 => 30,
        a if a >= 20.0 => 20,
        _ => 10,
    };
    let cancellation = match avg_cancellation {
        c if c < 1.0 => 30,
        c if c < 2.0 => 25,
        c if c < 3.0 => 15,
        _ => 5,
    };
    let completed = match completion {
        c if c >= 20.0 => 20,
        c if c >= 10.0 => 15,
        c if c >= 5.0 => 10,
        _ => 5,
    };
    let risk = match high_risk_ratio {
        r if r < 5.0 => 10,
        r if r < 10.0 => 8,
        r if r < 15.0 => 5,
        _ => 2,
    };
    absorption + cancellation + completed + risk
}

pub fn market_health_grade(score: u32) -> &'static str {
    match score {
        s if s >= 85 => "🏆 優秀",
        s if s >= 70 => "🥇 良好",
        s if s >= 55 => "🥈 普通",
        _ => "⚠️ 需改善",
    }
}

fn overall_assessment(community: &[CommunityReportRow]) -> OverallAssessment {
    let refs: Vec<&CommunityReportRow> = community.iter().collect();
    let avg_absorption_rate = mean(&column(&refs, |r| r.net_rate));
    let avg_cancellation_rate = mean(&column(&refs, |r| r.cumulative_cancellation_rate));
    let completion = completion_rate(&refs);
    let high_risk_project_ratio = pct(
        community.iter().filter(|r| is_high_cancellation(r)).count() as f64,
        community.len() as f64,
    );
    let score = market_health_score(avg_absorption_rate, avg_cancellation_rate, completion, high_risk_project_ratio);
    OverallAssessment {
        total_projects: community.len(),
        avg_absorption_rate,
        avg_cancellation_rate,
        completion_rate: completion,
        high_risk_project_ratio,
        market_health_score: score,
        market_health_grade: market_health_grade(score).to_string(),
    }
}

fn key_findings(inputs: &InsightInputs<'_>, overall: &OverallAssessment) -> Vec<String> {
    let mut findings = Vec::new();
    let a = overall.avg_absorption_rate;
    findings.push(if a > 50.0 {
        format!("市場整體去化表現良好，平均去化率達{:.1}%", a)
    } else if a > 30.0 {
        format!("市場去化表現中等，平均去化率為{:.1}%，仍有提升空間", a)
    } else {
        format!("市場去化表現偏弱，平均去化率僅{:.1}%，需關注去化壓力", a)
    });

    let c = overall.avg_cancellation_rate;
    findings.push(if c < 1.0 {
        format!("解約風險控制良好，平均解約率僅{:.2}%", c)
    } else if c < 3.0 {
        format!("解約風險處於可控範圍，平均解約率為{:.2}%", c)
    } else {
        format!("解約風險偏高，平均解約率達{:.2}%，需加強風險管控", c)
    });

    let done = overall.completion_rate;
    findings.push(if done > 15.0 {
        format!("完售表現優異，{:.1}%的建案已完售", done)
    } else if done > 8.0 {
        format!("完售表現中等，{:.1}%的建案已完售", done)
    } else {
        format!("完售表現偏低，僅{:.1}%的建案完售，需關注銷售策略", done)
    });

    if inputs.cities.len() > 1 {
        let spread = std_dev(&inputs.cities.iter().map(|c| c.net_rate).collect::<Vec<_>>());
        findings.push(
            if spread > 20.0 {
                "各縣市去化表現差異顯著，存在明顯的區域分化現象"
            } else if spread > 10.0 {
                "各縣市去化表現存在一定差異，建議關注表現較弱的區域"
            } else {
                "各縣市去化表現相對均衡，整體市場發展穩定"
            }
            .to_string(),
        );
    }

    if !inputs.districts.is_empty() {
        let mut top: Vec<&DistrictReportRow> = inputs.districts.iter().collect();
        top.sort_by(|a, b| b.net_rate.total_cmp(&a.net_rate));
        let hot = unique_in_order(top.iter().take(5).map(|d| d.county.as_str()));
        findings.push(if hot.len() <= 2 {
            format!("市場熱點主要集中在{}等少數縣市", hot.join(", "))
        } else {
            format!("市場熱點分布較為分散，涵蓋{}等多個縣市", hot[..3].join(", "))
        });
    }
    findings
}

fn risk_warnings(inputs: &InsightInputs<'_>, cancellation: &CancellationTrend) -> Vec<String> {
    let mut warnings = Vec::new();

    let severe = inputs.community.iter().filter(|r| r.cumulative_cancellation_rate > 10.0).count();
    if severe > 0 {
        warnings.push(format!("發現{}個建案解約率超過10%，需密切監控", severe));
    }

    let stagnant = inputs.cities.iter().filter(|c| c.stagnant_share > 20.0).count();
    if stagnant > 0 {
        warnings.push(format!("{}個縣市長期滯銷建案占比超過20%，去化壓力較大", stagnant));
    }

    if let Some((county, count)) = cancellation.risk_concentration.iter().max_by_key(|(_, n)| *n) {
        if *count > 10 {
            warnings.push(format!("{}解約風險建案集中，共{}個，需特別關注", county, count));
        }
    }

    if let (Some(first), Some(last)) = (cancellation.seasons.first(), cancellation.seasons.last()) {
        if cancellation.seasons.len() >= 2 && last.high_risk_ratio > first.high_risk_ratio * 1.5 {
            warnings.push("高風險建案比例呈現上升趨勢，市場風險增加".to_string());
        }
    }

    if inputs.cities.len() > 2 {
        let rates: Vec<f64> = inputs.cities.iter().map(|c| c.net_rate).collect();
        let gap = rates.iter().copied().fold(f64::MIN, f64::max) - rates.iter().copied().fold(f64::MAX, f64::min);
        if gap > 40.0 {
            warnings.push(format!("縣市間去化表現差距達{:.1}%，市場分化嚴重", gap));
        }
    }

    if warnings.is_empty() {
        warnings.push("未發現重大市場風險，整體風險控制良好".to_string());
    }
    warnings
}

fn opportunities(inputs: &InsightInputs<'_>, speed: &SpeedAnalysis, efficiency: &EfficiencyRanking) -> Vec<String> {
    let mut out = Vec::new();

    let strong = unique_in_order(
        inputs
            .districts
            .iter()
            .filter(|d| d.net_rate > 70.0 && d.cancellation_rate < 2.0)
            .map(|d| d.county.as_str()),
    );
    if !strong.is_empty() {
        let shown: Vec<&str> = strong.iter().take(3).map(String::as_str).collect();
        out.push(format!("高表現區域投資機會：{}等地區表現優異", shown.join(", ")));
    }

    let priced: Vec<&CommunityReportRow> = inputs.community.iter().filter(|r| r.avg_unit_price > 0.0).collect();
    let prices = column(&priced, |r| r.avg_unit_price);
    let rates = column(&priced, |r| r.net_rate);
    if let (Some(price_q40), Some(rate_q60)) = (quantile(&prices, 0.4), quantile(&rates, 0.6)) {
        let value: Vec<String> = value_counts(
            priced
                .iter()
                .filter(|r| r.avg_unit_price <= price_q40 && r.net_rate >= rate_q60)
                .map(|r| r.county.as_str()),
        )
        .into_iter()
        .take(3)
        .map(|(county, _)| county)
        .collect();
        if !value.is_empty() {
            out.push(format!("價格窪地機會：{}等地區具有價格優勢且去化良好", value.join(", ")));
        }
    }

    let improvable: Vec<&str> = efficiency
        .improvement_opportunities
        .iter()
        .filter(|o| o.potential == Level::High)
        .map(|o| o.county.as_str())
        .take(2)
        .collect();
    if !improvable.is_empty() {
        out.push(format!("市場改善潛力：{}等地區具有較大改善空間", improvable.join(", ")));
    }

    if speed.trend_change.as_ref().is_some_and(|c| c.absorption_rate_change > 10.0) {
        out.push("整體市場呈現上升趨勢，適合進場時機".to_string());
    }

    if out.is_empty() {
        out.push("市場機會需要更詳細的分析，建議持續觀察市場動態".to_string());
    }
    out
}

fn supply_demand(community: &[CommunityReportRow]) -> Option<SupplyDemand> {
    let total_supply: u64 = community.iter().map(|r| u64::from(r.total_units)).sum();
    if total_supply == 0 {
        return None;
    }
    let sold: i64 = community.iter().map(|r| r.cumulative_transactions as i64).sum();
    let cancelled: i64 = community.iter().map(|r| r.cumulative_cancellations as i64).sum();
    let effective_demand = sold - cancelled;
    let ratio = effective_demand as f64 / total_supply as f64;
    Some(SupplyDemand {
        total_supply,
        effective_demand,
        absorption_ratio: ratio * 100.0,
        market_balance: if ratio < 0.3 {
            MarketBalance::Oversupply
        } else if ratio < 0.7 {
            MarketBalance::Balanced
        } else {
            MarketBalance::HighDemand
        },
    })
}

fn seasonality(speed: &SpeedAnalysis) -> Option<Seasonality> {
    let rates: Vec<f64> = speed.seasonal_trends.iter().map(|s| s.avg_absorption_rate).collect();
    if rates.len() < 4 {
        return None;
    }
    let avg = mean(&rates);
    if avg == 0.0 {
        return None;
    }
    let volatility = population_std(&rates) / avg * 100.0;
    let n = rates.len();
    Some(Seasonality {
        volatility,
        trend_stability: if volatility < 15.0 {
            Stability::Stable
        } else if volatility < 30.0 {
            Stability::Volatile
        } else {
            Stability::HighlyVolatile
        },
        recent_trend: if rates[n - 1] > rates[n - 2] {
            RecentTrend::Improving
        } else {
            RecentTrend::Declining
        },
    })
}

fn competition_density(districts: &[DistrictReportRow]) -> Option<CompetitionDensity> {
    if districts.is_empty() {
        return None;
    }
    let density: Vec<f64> = group_by(districts, |d| (d.county.clone(), d.district.clone()))
        .into_values()
        .map(|rows| rows.iter().map(|d| d.active_projects).sum::<usize>() as f64)
        .collect();
    let q80 = quantile(&density, 0.8)?;
    let high = density.iter().filter(|d| **d > q80).count();
    let areas = density.len() as f64;
    let counties = unique_in_order(districts.iter().map(|d| d.county.as_str())).len();
    Some(CompetitionDensity {
        high_density_areas: high,
        competition_level: if high as f64 > areas * 0.3 {
            Level::High
        } else if high as f64 > areas * 0.1 {
            Level::Medium
        } else {
            Level::Low
        },
        market_concentration: if counties > 8 { Concentration::Dispersed } else { Concentration::Concentrated },
    })
}

pub fn market_insights(
    inputs: &InsightInputs<'_>,
    cancellation: &CancellationTrend,
    speed: &SpeedAnalysis,
    efficiency: &EfficiencyRanking,
) -> MarketInsights {
    let overall = overall_assessment(inputs.community);
    let key_findings = key_findings(inputs, &overall);
    let risk_warnings = risk_warnings(inputs, cancellation);
    let opportunities = opportunities(inputs, speed, efficiency);
    let supply_demand = supply_demand(inputs.community);

    let mut recommendations = Vec::new();
    recommendations.push(
        match overall.market_health_score {
            s if s < 60 => "市場健康度偏低，建議：(1)加強風險監控 (2)優化產品定位 (3)調整推案節奏",
            s if s < 80 => "市場表現中等，建議：(1)持續關注市場變化 (2)差異化競爭策略 (3)提升去化效率",
            _ => "市場表現良好，建議：(1)把握市場機會 (2)適度擴大規模 (3)創新產品服務",
        }
        .to_string(),
    );
    if risk_warnings.iter().any(|w| w.contains("解約")) {
        recommendations.push("解約風險管控：(1)強化客戶信用審查 (2)優化付款條件 (3)建立預警機制".to_string());
    }
    if risk_warnings.iter().any(|w| w.contains("滯銷")) {
        recommendations.push("滯銷問題處理：(1)檢討產品定位 (2)調整價格策略 (3)加強行銷推廣".to_string());
    }
    if opportunities.len() > 1 {
        recommendations.push("機會把握策略：(1)重點布局高表現區域 (2)關注價格窪地機會 (3)加強市場研究".to_string());
    }
    match supply_demand.as_ref().map(|s| s.market_balance) {
        Some(MarketBalance::Oversupply) => {
            recommendations.push("供過於求對策：(1)控制新增供給 (2)加強去化力度 (3)考慮降價促銷".to_string())
        }
        Some(MarketBalance::HighDemand) => {
            recommendations.push("供不應求策略：(1)適度增加供給 (2)優化產品組合 (3)提高產品溢價".to_string())
        }
        _ => {}
    }
    recommendations.push("政策配套建議：(1)完善預售屋管理制度 (2)加強市場資訊透明度 (3)建立風險預警機制".to_string());

    MarketInsights {
        key_findings,
        risk_warnings,
        opportunities,
        supply_demand,
        seasonality: seasonality(speed),
        competition: competition_density(inputs.districts),
        recommendations,
        overall,
    }
}

// ============================================================================
// Policy recommendations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoadmapPhase {
    pub period: String,
    pub priorities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecommendations {
    pub regulatory_measures: Vec<String>,
    pub market_supervision: Vec<String>,
    pub risk_management: Vec<String>,
    pub industry_development: Vec<String>,
    pub roadmap: Vec<RoadmapPhase>,
}

const MARKET_SUPERVISION: [&str; 9] = [
    "建立預售屋市場資訊公開平台，定期發布市場統計數據",
    "要求建商公開更詳細的銷售進度和財務狀況",
    "建立消費者投訴處理和公開機制",
    "建立跨部門聯合監督機制，整合相關管理資源",
    "實施建案全生命週期監督，從審批到交屋全程管控",
    "建立第三方監督評估機制，提高監督效率",
    "建立預售屋市場大數據分析平台，提升監督精準度",
    "實施風險預警系統，及早識別問題建案",
    "建立市場健康度指標體系，定期評估市場狀況",
];

const RISK_MANAGEMENT: [&str; 9] = [
    "建立預售屋市場系統性風險監測機制",
    "制定市場異常波動應急預案",
    "建立建商信用評級和黑名單制度",
    "完善預售屋履約保證機制，保障消費者權益",
    "建立消費者教育宣導體系，提高風險意識",
    "設立預售屋糾紛調解機構，快速處理爭議",
    "加強預售屋貸款風險管控，防範金融風險",
    "建立建商資金池監管機制，確保專款專用",
    "實施預售屋保險制度，分散市場風險",
];

const INDUSTRY_DEVELOPMENT: [&str; 9] = [
    "鼓勵建商提升產品品質和服務水準",
    "推動預售屋產業數位化轉型",
    "支援中小型建商健康發展",
    "推動預售屋產品創新和服務模式創新",
    "建立優質建商認證和獎勵機制",
    "鼓勵綠建築和智慧建築發展",
    "完善預售屋相關法規體系",
    "提升行政審批效率和服務品質",
    "建立公平競爭的市場環境",
];

const ROADMAP: [(&str, [&str; 4]); 3] = [
    (
        "短期 (3-6個月)",
        ["建立預售屋市場監控Dashboard", "制定解約率預警機制", "啟動資訊公開平台建設", "完善現有法規執行"],
    ),
    (
        "中期 (6-18個月)",
        ["實施建商信用評級制度", "建立區域差異化監管政策", "推動預售屋數位化管理", "強化跨部門協調機制"],
    ),
    (
        "長期 (18個月以上)",
        ["建立完整的風險預警體系", "推動產業結構升級", "完善消費者保護機制", "建立國際先進管理標準"],
    ),
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn policy_recommendations(
    cities: &[CityReportRow],
    cancellation: &CancellationTrend,
    market: &MarketInsights,
) -> PolicyRecommendations {
    let mut regulatory = owned(match cancellation.overall_risk_level {
        Level::High => &[
            "建立預售屋解約率上限管制機制，超過門檻值需提交改善計畫",
            "強化建商財務狀況審查，確保履約能力",
            "實施預售屋買賣契約標準化，保護消費者權益",
        ][..],
        Level::Medium => &[
            "建立解約率定期監控機制，及時發現風險建案",
            "要求建商提供更詳細的工程進度資訊",
            "加強預售屋廣告內容真實性查核",
        ][..],
        Level::Low => &["維持現有監管框架，持續優化執行效率", "建立正向激勵機制，鼓勵優質建商發展"][..],
    });

    if market.overall.market_health_score < 60 {
        regulatory.extend(owned(&[
            "實施預售屋推案節奏管控，避免市場供過於求",
            "建立滯銷建案處理機制，防範爛尾樓風險",
            "加強預售屋價格合理性審查",
        ]));
    }

    if cities.len() > 1 && std_dev(&cities.iter().map(|c| c.net_rate).collect::<Vec<_>>()) > 20.0 {
        regulatory.push("建立區域差異化監管政策，因地制宜調整管理措施".to_string());
    }

    PolicyRecommendations {
        regulatory_measures: regulatory,
        market_supervision: owned(&MARKET_SUPERVISION),
        risk_management: owned(&RISK_MANAGEMENT),
        industry_development: owned(&INDUSTRY_DEVELOPMENT),
        roadmap: ROADMAP
            .iter()
            .map(|(period, priorities)| RoadmapPhase { period: period.to_string(), priorities: owned(priorities) })
            .collect(),
    }
}

// ============================================================================
// Full report
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub cancellation: CancellationTrend,
    pub speed: SpeedAnalysis,
    pub efficiency: EfficiencyRanking,
    pub dashboard: RiskDashboard,
    pub hotspots: HotspotAnalysis,
    pub three_level: ThreeLevelComparison,
    pub market: MarketInsights,
    pub policy: PolicyRecommendations,
}

pub fn generate_insights(inputs: &InsightInputs<'_>) -> InsightsReport {
    info!(
        community = inputs.community.len(),
        districts = inputs.districts.len(),
        cities = inputs.cities.len(),
        "Generating market insights"
    );

    let cancellation = cancellation_trend_analysis(inputs);
    debug!(level = ?cancellation.overall_risk_level, trend = ?cancellation.trend, "Cancellation trend");
    let speed = absorption_speed_analysis(inputs);
    debug!(health = ?speed.market_health, clusters = speed.clusters.len(), "Absorption speed");
    let efficiency = efficiency_ranking_analysis(inputs);
    let dashboard = risk_dashboard(inputs, &cancellation, &speed);
    let hotspots = hotspot_analysis(inputs);
    let three_level = three_level_comparison(inputs);
    let market = market_insights(inputs, &cancellation, &speed, &efficiency);
    let policy = policy_recommendations(inputs.cities, &cancellation, &market);

    info!(
        health_score = market.overall.market_health_score,
        grade = %market.overall.market_health_grade,
        hotspots = hotspots.hotspots.len(),
        warnings = market.risk_warnings.len(),
        "Market insights complete"
    );

    InsightsReport { cancellation, speed, efficiency, dashboard, hotspots, three_level, market, policy }
}
