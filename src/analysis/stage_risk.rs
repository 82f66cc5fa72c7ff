//! Sales Stage and Risk Assessment
//!
//! Places each project in its sales lifecycle, scores how it performs for
//! that stage, and combines cancellation, stagnation and efficiency signals
//! into a single 0..=100 risk score.
//!
//! ```text
//! 開盤初期 ──▶ 穩定銷售期 ──▶ 中後期調整 ──▶ 尾盤清售 ──▶ 完售
//!  ≤2 seasons    ≤6 seasons     >6 seasons     ≥90%         100%
//! ```
//!
//! The comprehensive score is four 0..=25 components:
//!
//! ```text
//! stage        = 25 - performance × 0.25
//! cancellation = cancellation score × 0.25
//! stagnation   = stagnation score × 0.25
//! efficiency   = 25 - efficiency × 0.25
//! ```

use crate::analysis::absorption::AbsorptionResult;
use crate::analysis::cancellation::parse_cancellation;
use crate::analysis::dynamics::DynamicsRecord;
use crate::analysis::records::TransactionRecord;
use crate::analysis::season::YearSeason;
use crate::analysis::stats::{mean, pct, round_to};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

// =============================================================================
// SALES STAGE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SalesStage {
    Opening,
    Stable,
    MidLateAdjustment,
    Closing,
    SoldOut,
}

impl SalesStage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Opening => "開盤初期",
            Self::Stable => "穩定銷售期",
            Self::MidLateAdjustment => "中後期調整",
            Self::Closing => "尾盤清售",
            Self::SoldOut => "完售",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Opening, Self::Stable, Self::MidLateAdjustment, Self::Closing, Self::SoldOut]
            .into_iter()
            .find(|s| s.label() == label)
    }
}

pub fn sales_stage(rate: f64, seasons: u32) -> SalesStage {
    if rate >= 100.0 {
        SalesStage::SoldOut
    } else if rate >= 90.0 {
        SalesStage::Closing
    } else if seasons <= 2 {
        SalesStage::Opening
    } else if seasons <= 6 && rate < 80.0 {
        SalesStage::Stable
    } else if seasons > 6 && rate < 90.0 {
        SalesStage::MidLateAdjustment
    } else if rate >= 80.0 {
        SalesStage::Closing
    } else {
        SalesStage::MidLateAdjustment
    }
}

// =============================================================================
// STAGE PERFORMANCE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformanceLevel {
    Good,
    Normal,
    Poor,
}

impl PerformanceLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Good => "🟢",
            Self::Normal => "🟡",
            Self::Poor => "🔴",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Normal => "normal",
            Self::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePerformance {
    pub stage: SalesStage,
    pub level: PerformanceLevel,
    pub score: f64,
    pub benchmark: String,
}

impl StagePerformance {
    /// "emoji level", as written into reports.
    pub fn display(&self) -> String {
        format!("{} {}", self.level.emoji(), self.level.label())
    }
}

pub fn stage_performance(stage: SalesStage, rate: f64, speed: f64, seasons: u32) -> StagePerformance {
    use PerformanceLevel::*;

    let (level, score) = match stage {
        SalesStage::Opening => {
            if rate >= 30.0 && speed >= 3.0 {
                (Good, 85.0)
            } else if rate >= 20.0 && speed >= 2.0 {
                (Normal, 65.0)
            } else {
                (Poor, 35.0)
            }
        }
        SalesStage::Stable => {
            let expected = seasons as f64 * 12.0;
            if rate >= expected && speed >= 2.0 {
                (Good, 80.0)
            } else if rate >= expected * 0.8 && speed >= 1.0 {
                (Normal, 60.0)
            } else {
                (Poor, 40.0)
            }
        }
        SalesStage::MidLateAdjustment => {
            if rate >= 70.0 && speed >= 1.5 {
                (Good, 75.0)
            } else if rate >= 50.0 && speed >= 1.0 {
                (Normal, 55.0)
            } else {
                (Poor, 30.0)
            }
        }
        SalesStage::Closing => {
            if speed >= 2.0 {
                (Good, 90.0)
            } else if speed >= 1.0 {
                (Normal, 70.0)
            } else {
                (Poor, 50.0)
            }
        }
        SalesStage::SoldOut => {
            if seasons <= 8 {
                (Good, 95.0)
            } else if seasons <= 12 {
                (Normal, 80.0)
            } else {
                (Poor, 60.0)
            }
        }
    };

    let benchmark = if score >= 80.0 {
        "優於市場平均"
    } else if score >= 60.0 {
        "符合市場預期"
    } else {
        "低於市場標準"
    };

    StagePerformance { stage, level, score, benchmark: benchmark.to_string() }
}

// =============================================================================
// CANCELLATION RISK
// =============================================================================

/// Cancellation counts of one project up to a target season.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancellationMetrics {
    pub cumulative_records: usize,
    pub cumulative_count: usize,
    pub cumulative_rate: f64,
    pub season_records: usize,
    pub season_count: usize,
    pub season_rate: f64,
    pub latest_cancellation_season: Option<YearSeason>,
    pub consecutive_no_cancellation_seasons: u32,
}

/// Collect cancellation metrics from a project's clean records.
///
/// The latest cancellation season is the latest season among the parsed
/// cancellation dates at or before `target`; a cancelled record without a
/// parseable date contributes its transaction season instead.
pub fn cancellation_metrics(
    records: &[&TransactionRecord],
    target: YearSeason,
    sales_seasons: u32,
) -> CancellationMetrics {
    let mut m = CancellationMetrics::default();
    for rec in records.iter().filter(|r| r.season <= target) {
        m.cumulative_records += 1;
        let in_season = rec.season == target;
        if in_season {
            m.season_records += 1;
        }
        if !rec.is_cancelled() {
            continue;
        }
        m.cumulative_count += 1;
        if in_season {
            m.season_count += 1;
        }

        let info = parse_cancellation(&rec.cancellation_text);
        let season = info
            .seasons
            .iter()
            .copied()
            .filter(|s| *s <= target)
            .max()
            .unwrap_or(rec.season);
        m.latest_cancellation_season = m.latest_cancellation_season.max(Some(season));
    }

    m.cumulative_rate = pct(m.cumulative_count as f64, m.cumulative_records as f64);
    m.season_rate = pct(m.season_count as f64, m.season_records as f64);
    m.consecutive_no_cancellation_seasons = match m.latest_cancellation_season {
        Some(latest) => (latest.seasons_between(&target) - 1).max(0) as u32,
        None => sales_seasons,
    };
    m
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::High => "🔴",
            Self::Medium => "🟡",
            Self::Low => "🟢",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "高風險",
            Self::Medium => "中風險",
            Self::Low => "低風險",
        }
    }

    /// "emoji label", as written into reports.
    pub fn display(&self) -> String {
        format!("{} {}", self.emoji(), self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRisk {
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<String>,
    pub metrics: CancellationMetrics,
}

pub fn cancellation_risk(metrics: &CancellationMetrics) -> CancellationRisk {
    if metrics.cumulative_count == 0 {
        return CancellationRisk {
            level: RiskLevel::Low,
            score: 10.0,
            factors: vec!["無解約記錄".to_string()],
            metrics: metrics.clone(),
        };
    }

    let mut score = 0.0;
    let mut factors = Vec::new();
    let cum = metrics.cumulative_rate;
    if cum > 10.0 {
        score += 40.0;
        factors.push(format!("累積解約率{:.1}%過高", cum));
    } else if cum > 5.0 {
        score += 25.0;
        factors.push(format!("累積解約率{:.1}%偏高", cum));
    } else if cum > 2.0 {
        score += 10.0;
        factors.push(format!("累積解約率{:.1}%略高", cum));
    }

    let q = metrics.season_rate;
    if q > 20.0 {
        score += 30.0;
        factors.push(format!("本季解約率{:.1}%嚴重", q));
    } else if q > 10.0 {
        score += 20.0;
        factors.push(format!("本季解約率{:.1}%偏高", q));
    } else if q > 5.0 {
        score += 10.0;
        factors.push(format!("本季解約率{:.1}%需關注", q));
    }

    if metrics.cumulative_count >= 10 {
        score += 20.0;
        factors.push(format!("累積解約{}筆頻繁", metrics.cumulative_count));
    } else if metrics.cumulative_count >= 5 {
        score += 10.0;
        factors.push(format!("累積解約{}筆需關注", metrics.cumulative_count));
    }

    if metrics.consecutive_no_cancellation_seasons == 0 && metrics.season_count > 0 {
        score += 10.0;
        factors.push("本季有新解約案例".to_string());
    } else if metrics.consecutive_no_cancellation_seasons <= 1 {
        score += 5.0;
        factors.push("近期仍有解約情況".to_string());
    }

    let score: f64 = f64::min(score, 100.0);
    let level = if score >= 60.0 {
        RiskLevel::High
    } else if score >= 30.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };
    CancellationRisk { level, score, factors, metrics: metrics.clone() }
}

// =============================================================================
// STAGNATION RISK
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StagnationRiskLevel {
    High,
    Medium,
    Low,
    Normal,
}

impl StagnationRiskLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "高滯銷風險",
            Self::Medium => "中滯銷風險",
            Self::Low => "低滯銷風險",
            Self::Normal => "正常銷售",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionUrgency {
    Immediate,
    Moderate,
    Monitor,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagnationRisk {
    pub score: f64,
    pub level: StagnationRiskLevel,
    pub urgency: InterventionUrgency,
    pub is_long_term: bool,
    pub average_speed: f64,
    /// Seasons with speed below 0.5
    pub slow_seasons: usize,
    pub factors: Vec<String>,
}

/// Score stagnation from sales duration, net rate and the speed history.
pub fn stagnation_risk(seasons: u32, rate: f64, speeds: &[f64]) -> StagnationRisk {
    let average_speed = mean(speeds);
    let slow_seasons = speeds.iter().filter(|s| **s < 0.5).count();
    let mut score = 0.0;
    let mut factors = Vec::new();

    if seasons > 16 {
        score += 30.0;
        factors.push(format!("銷售期間{}季過長", seasons));
    } else if seasons > 12 {
        score += 20.0;
        factors.push(format!("銷售期間{}季偏長", seasons));
    } else if seasons > 8 {
        score += 10.0;
        factors.push(format!("銷售期間{}季需關注", seasons));
    }

    if rate < 50.0 {
        score += 25.0;
        factors.push(format!("去化率{:.1}%嚴重偏低", rate));
    } else if rate < 70.0 {
        score += 15.0;
        factors.push(format!("去化率{:.1}%偏低", rate));
    } else if rate < 80.0 {
        score += 5.0;
        factors.push(format!("去化率{:.1}%需努力", rate));
    }

    if average_speed < 0.3 {
        score += 25.0;
        factors.push(format!("平均速度{:.2}戶/季極慢", average_speed));
    } else if average_speed < 0.5 {
        score += 20.0;
        factors.push(format!("平均速度{:.2}戶/季很慢", average_speed));
    } else if average_speed < 1.0 {
        score += 10.0;
        factors.push(format!("平均速度{:.2}戶/季偏慢", average_speed));
    }

    let slow_points = match slow_seasons {
        6.. => 20.0,
        4..=5 => 15.0,
        2..=3 => 10.0,
        _ => 0.0,
    };
    if slow_points > 0.0 {
        score += slow_points;
        factors.push(format!("連續{}季去化緩慢", slow_seasons));
    }

    let score: f64 = f64::min(score, 100.0);
    let is_long_term = seasons > 12 && rate < 70.0 && average_speed < 0.5;
    let (level, urgency) = if is_long_term || score >= 70.0 {
        (StagnationRiskLevel::High, InterventionUrgency::Immediate)
    } else if score >= 50.0 {
        (StagnationRiskLevel::Medium, InterventionUrgency::Moderate)
    } else if score >= 30.0 {
        (StagnationRiskLevel::Low, InterventionUrgency::Monitor)
    } else {
        (StagnationRiskLevel::Normal, InterventionUrgency::None)
    };

    StagnationRisk { score, level, urgency, is_long_term, average_speed, slow_seasons, factors }
}

// =============================================================================
// COMPREHENSIVE RISK
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComprehensiveLevel {
    Critical,
    High,
    Moderate,
    Low,
    Monitor,
}

impl ComprehensiveLevel {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "極高風險",
            Self::High => "高風險",
            Self::Moderate => "中風險",
            Self::Low => "低風險",
            Self::Monitor => "極低風險",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensiveRisk {
    pub score: f64,
    pub stage_component: f64,
    pub cancellation_component: f64,
    pub stagnation_component: f64,
    pub efficiency_component: f64,
    pub level: ComprehensiveLevel,
    pub factors: Vec<String>,
}

/// Combine the four risk dimensions. Missing inputs use neutral defaults.
pub fn comprehensive_risk(
    performance_score: Option<f64>,
    cancellation_score: Option<f64>,
    stagnation_score: Option<f64>,
    efficiency_score: Option<f64>,
) -> ComprehensiveRisk {
    let stage = performance_score.map_or(15.0, |p| (25.0 - p / 100.0 * 25.0).max(0.0));
    let cancellation = cancellation_score.map_or(5.0, |s| s / 100.0 * 25.0);
    let stagnation = stagnation_score.map_or(5.0, |s| s / 100.0 * 25.0);
    let efficiency = efficiency_score.map_or(10.0, |e| (25.0 - e / 100.0 * 25.0).max(0.0));

    let mut factors: Vec<String> = [
        (stage, "階段表現不佳"),
        (cancellation, "解約風險高"),
        (stagnation, "滯銷風險高"),
        (efficiency, "去化效率低"),
    ]
    .iter()
    .filter(|(value, _)| *value > 15.0)
    .map(|(_, label)| label.to_string())
    .collect();
    if factors.is_empty() {
        factors.push("風險控制良好".to_string());
    }

    let score = stage + cancellation + stagnation + efficiency;
    let level = if score >= 70.0 {
        ComprehensiveLevel::Critical
    } else if score >= 55.0 {
        ComprehensiveLevel::High
    } else if score >= 40.0 {
        ComprehensiveLevel::Moderate
    } else if score >= 25.0 {
        ComprehensiveLevel::Low
    } else {
        ComprehensiveLevel::Monitor
    };

    ComprehensiveRisk {
        score: round_to(score, 2),
        stage_component: stage,
        cancellation_component: cancellation,
        stagnation_component: stagnation,
        efficiency_component: efficiency,
        level,
        factors,
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Stage and risk of one project at one season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRiskRecord {
    pub code: String,
    pub target: YearSeason,
    pub stage: SalesStage,
    pub performance: StagePerformance,
    pub cancellation: CancellationRisk,
    pub stagnation: StagnationRisk,
    pub comprehensive: ComprehensiveRisk,
}

/// Assess every absorption result. Dynamics are matched by (code, season).
pub fn assess_all(
    results: &[AbsorptionResult],
    dynamics: &[DynamicsRecord],
    clean: &[TransactionRecord],
) -> Vec<StageRiskRecord> {
    let mut by_code: HashMap<&str, Vec<&TransactionRecord>> = HashMap::new();
    for rec in clean {
        by_code.entry(rec.project_code.as_str()).or_default().push(rec);
    }
    let mut speed_history: BTreeMap<&str, Vec<&DynamicsRecord>> = BTreeMap::new();
    for d in dynamics {
        speed_history.entry(d.code.as_str()).or_default().push(d);
    }
    for history in speed_history.values_mut() {
        history.sort_by_key(|d| d.target);
    }

    let mut out = Vec::with_capacity(results.len());
    for r in results {
        let history = speed_history.get(r.code.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let current = history.iter().find(|d| d.target == r.target);
        let speeds: Vec<f64> = history.iter().filter(|d| d.target <= r.target).map(|d| d.speed).collect();
        let speed = current.map_or(0.0, |d| d.speed);

        let stage = sales_stage(r.net_rate, r.sales_seasons);
        let performance = stage_performance(stage, r.net_rate, speed, r.sales_seasons);
        let records = by_code.get(r.code.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        let metrics = cancellation_metrics(records, r.target, r.sales_seasons);
        let cancellation = cancellation_risk(&metrics);
        let stagnation = stagnation_risk(r.sales_seasons, r.net_rate, &speeds);
        let comprehensive = comprehensive_risk(
            Some(performance.score),
            Some(cancellation.score),
            Some(stagnation.score),
            current.map(|d| d.efficiency.total),
        );

        out.push(StageRiskRecord {
            code: r.code.clone(),
            target: r.target,
            stage,
            performance,
            cancellation,
            stagnation,
            comprehensive,
        });
    }

    info!(
        assessed = out.len(),
        high_cancellation_risk = out.iter().filter(|s| s.cancellation.level == RiskLevel::High).count(),
        long_term_stagnant = out.iter().filter(|s| s.stagnation.is_long_term).count(),
        "Stage and risk assessment complete"
    );
    out
}
