//! Absorption Dynamics
//!
//! Turns each project's season-by-season absorption into speed,
//! acceleration, a completion forecast and a 0..=100 efficiency score.
//!
//! ```text
//! speed(s)        = net units(s) - net units(s-1)     (or units / seasons)
//! acceleration(s) = (speed(s) - speed(s-1)) / speed(s-1) × 100
//! forecast        = ⌈remaining units / speed⌉ seasons
//! ```

use crate::analysis::absorption::AbsorptionResult;
use crate::analysis::season::YearSeason;
use crate::analysis::stats::{mean, round_to};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Forecast horizon used when completion cannot be predicted.
pub const UNPREDICTABLE_SEASONS: u32 = 999;

/// Acceleration reported when sales restart after a zero-speed season.
pub const RESTART_ACCELERATION: f64 = 999.0;

// =============================================================================
// SPEED
// =============================================================================

/// Units absorbed per season at `current`.
///
/// With the previous season available, speed is the net-unit increase
/// (floored at zero); otherwise it is the cumulative net units spread over
/// the sales seasons.
pub fn absorption_speed(current: &AbsorptionResult, previous: Option<&AbsorptionResult>) -> f64 {
    let cur_units = current.net_units();
    let speed = match previous {
        Some(prev) => (cur_units - prev.net_units()).max(0.0),
        None => cur_units / current.sales_seasons.max(1) as f64,
    };
    round_to(speed, 2)
}

// =============================================================================
// ACCELERATION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelerationStatus {
    Initial,
    Restart,
    Stagnant,
    StrongAcceleration,
    Acceleration,
    Stable,
    Deceleration,
    StrongDeceleration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    /// Percent change of speed
    pub value: f64,
    pub status: AccelerationStatus,
}

pub fn acceleration(current: f64, previous: Option<f64>) -> Acceleration {
    let Some(prev) = previous else {
        return Acceleration { value: 0.0, status: AccelerationStatus::Initial };
    };
    if prev <= 0.0 {
        return if current > 0.0 {
            Acceleration { value: RESTART_ACCELERATION, status: AccelerationStatus::Restart }
        } else {
            Acceleration { value: 0.0, status: AccelerationStatus::Stagnant }
        };
    }

    let value = (current - prev) / prev * 100.0;
    let status = if value > 20.0 {
        AccelerationStatus::StrongAcceleration
    } else if value > 5.0 {
        AccelerationStatus::Acceleration
    } else if value > -5.0 {
        AccelerationStatus::Stable
    } else if value > -20.0 {
        AccelerationStatus::Deceleration
    } else {
        AccelerationStatus::StrongDeceleration
    };
    Acceleration { value: round_to(value, 2), status }
}

// =============================================================================
// COMPLETION FORECAST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Completed,
    CurrentSpeed,
    AverageSpeed,
    TrendBased,
    Unpredictable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastConfidence {
    High,
    Medium,
    Low,
    VeryLow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    FastCompletion,
    NormalCompletion,
    SlowCompletion,
    LongTermSales,
    Unpredictable,
}

impl CompletionStatus {
    fn from_seasons(seasons: u32) -> Self {
        match seasons {
            0..=4 => Self::FastCompletion,
            5..=8 => Self::NormalCompletion,
            9..=16 => Self::SlowCompletion,
            _ => Self::LongTermSales,
        }
    }
}

/// Estimate of one forecast method, computed independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodEstimate {
    pub method: ForecastMethod,
    /// 999 when this method cannot predict completion
    pub seasons: u32,
    pub confidence: ForecastConfidence,
}

impl MethodEstimate {
    fn unpredictable(method: ForecastMethod) -> Self {
        Self { method, seasons: UNPREDICTABLE_SEASONS, confidence: ForecastConfidence::VeryLow }
    }

    pub fn is_predictable(&self) -> bool {
        self.seasons < UNPREDICTABLE_SEASONS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionForecast {
    /// Seasons until sold out, 999 when unpredictable
    pub seasons: u32,
    pub estimated_season: Option<YearSeason>,
    pub method: ForecastMethod,
    pub confidence: ForecastConfidence,
    pub status: CompletionStatus,
    /// Estimate of the current-speed method alone, used for scoring
    pub current_speed_seasons: u32,
    /// current_speed, average_speed and trend_based, in that order
    pub estimates: Vec<MethodEstimate>,
}

fn seasons_needed(remaining: f64, speed: f64) -> u32 {
    // Rounded first so float noise cannot add a season.
    (round_to(remaining / speed, 6).ceil() as u32).min(UNPREDICTABLE_SEASONS)
}

fn current_speed_estimate(remaining: f64, speeds: &[f64]) -> MethodEstimate {
    match speeds.last().copied() {
        Some(current) if current > 0.0 => MethodEstimate {
            method: ForecastMethod::CurrentSpeed,
            seasons: seasons_needed(remaining, current),
            confidence: if current >= 1.0 { ForecastConfidence::Medium } else { ForecastConfidence::Low },
        },
        _ => MethodEstimate::unpredictable(ForecastMethod::CurrentSpeed),
    }
}

fn average_speed_estimate(remaining: f64, speeds: &[f64]) -> MethodEstimate {
    let average = mean(speeds);
    if average > 0.0 {
        MethodEstimate {
            method: ForecastMethod::AverageSpeed,
            seasons: seasons_needed(remaining, average),
            confidence: if speeds.len() >= 3 { ForecastConfidence::High } else { ForecastConfidence::Medium },
        }
    } else {
        MethodEstimate::unpredictable(ForecastMethod::AverageSpeed)
    }
}

/// Extrapolates the last two speeds. With a single season it falls back to
/// the current speed.
fn trend_estimate(remaining: f64, speeds: &[f64]) -> MethodEstimate {
    match speeds {
        [.., s1, s2] if *s1 > 0.0 => {
            let trend = (s2 + (s2 - s1)).max(0.1);
            MethodEstimate {
                method: ForecastMethod::TrendBased,
                seasons: seasons_needed(remaining, trend),
                confidence: ForecastConfidence::Medium,
            }
        }
        [_, _, ..] => MethodEstimate::unpredictable(ForecastMethod::TrendBased),
        _ => MethodEstimate { method: ForecastMethod::TrendBased, ..current_speed_estimate(remaining, speeds) },
    }
}

/// Forecast completion from `speeds`, the project's speed history up to and
/// including `target` in season order.
pub fn forecast_completion(rate: f64, units: u32, speeds: &[f64], target: YearSeason) -> CompletionForecast {
    if rate >= 100.0 {
        return CompletionForecast {
            seasons: 0,
            estimated_season: Some(target),
            method: ForecastMethod::Completed,
            confidence: ForecastConfidence::High,
            status: CompletionStatus::Completed,
            current_speed_seasons: 0,
            estimates: Vec::new(),
        };
    }

    let remaining = (100.0 - rate).max(0.0) / 100.0 * units as f64;
    let estimates = vec![
        current_speed_estimate(remaining, speeds),
        average_speed_estimate(remaining, speeds),
        trend_estimate(remaining, speeds),
    ];
    let current_speed_seasons = estimates[0].seasons;

    match estimates.iter().find(|e| e.is_predictable()).copied() {
        Some(chosen) => CompletionForecast {
            seasons: chosen.seasons,
            estimated_season: Some(target.offset(chosen.seasons as i32)),
            method: chosen.method,
            confidence: chosen.confidence,
            status: CompletionStatus::from_seasons(chosen.seasons),
            current_speed_seasons,
            estimates,
        },
        None => CompletionForecast {
            seasons: UNPREDICTABLE_SEASONS,
            estimated_season: None,
            method: ForecastMethod::Unpredictable,
            confidence: ForecastConfidence::VeryLow,
            status: CompletionStatus::Unpredictable,
            current_speed_seasons,
            estimates,
        },
    }
}

// =============================================================================
// EFFICIENCY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EfficiencyGrade {
    Excellent,
    Good,
    Average,
    Poor,
}

impl EfficiencyGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Self::Excellent
        } else if score >= 70.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Average
        } else {
            Self::Poor
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Excellent => "🚀",
            Self::Good => "⭐",
            Self::Average => "⚠️",
            Self::Poor => "🐌",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "高效去化",
            Self::Good => "正常去化",
            Self::Average => "緩慢去化",
            Self::Poor => "滯銷狀態",
        }
    }

    /// "emoji description", as written into reports.
    pub fn display(&self) -> String {
        format!("{} {}", self.emoji(), self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyScore {
    pub total: f64,
    pub absorption: f64,
    pub speed: f64,
    pub completion: f64,
    pub time: f64,
    pub grade: EfficiencyGrade,
}

pub fn efficiency_score(net_rate: f64, speed: f64, estimated_seasons: u32, sales_seasons: u32) -> EfficiencyScore {
    let sold_out = net_rate >= 100.0;
    let seasons = sales_seasons.max(1);

    let absorption = if sold_out {
        30.0
    } else if net_rate >= 80.0 {
        25.0
    } else if net_rate >= 60.0 {
        20.0
    } else if net_rate >= 40.0 {
        15.0
    } else if net_rate >= 20.0 {
        10.0
    } else {
        (net_rate / 20.0 * 10.0).max(0.0)
    };

    let speed_part = if speed >= 5.0 {
        25.0
    } else if speed >= 3.0 {
        20.0
    } else if speed >= 2.0 {
        15.0
    } else if speed >= 1.0 {
        10.0
    } else if speed >= 0.5 {
        5.0
    } else {
        0.0
    };

    let completion = if sold_out {
        25.0
    } else {
        match estimated_seasons {
            0..=4 => 25.0,
            5..=8 => 20.0,
            9..=12 => 15.0,
            13..=20 => 10.0,
            s if s < UNPREDICTABLE_SEASONS => 5.0,
            _ => 0.0,
        }
    };

    let time = if sold_out {
        match seasons {
            0..=4 => 20.0,
            5..=8 => 15.0,
            9..=12 => 10.0,
            _ => 5.0,
        }
    } else if seasons <= 4 {
        let expected = net_rate / seasons as f64 * 4.0;
        (expected / 50.0 * 20.0).clamp(0.0, 20.0)
    } else {
        (20.0 - (seasons as f64 - 4.0) * 2.0).max(0.0)
    };

    let total = absorption + speed_part + completion + time;
    EfficiencyScore {
        total: round_to(total, 1),
        absorption: round_to(absorption, 1),
        speed: speed_part,
        completion,
        time: round_to(time, 1),
        grade: EfficiencyGrade::from_score(total),
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Dynamics of one project at one season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsRecord {
    pub code: String,
    pub target: YearSeason,
    pub speed: f64,
    pub acceleration: Acceleration,
    pub forecast: CompletionForecast,
    pub efficiency: EfficiencyScore,
}

/// Run speed, acceleration, forecast and efficiency over every project's
/// season series. `results` need not be sorted.
pub fn analyze_dynamics(results: &[AbsorptionResult]) -> Vec<DynamicsRecord> {
    let mut series: BTreeMap<&str, Vec<&AbsorptionResult>> = BTreeMap::new();
    for r in results {
        series.entry(r.code.as_str()).or_default().push(r);
    }

    let mut out = Vec::with_capacity(results.len());
    for (code, mut rows) in series {
        rows.sort_by_key(|r| r.target);
        let mut speeds: Vec<f64> = Vec::with_capacity(rows.len());
        let mut previous: Option<&AbsorptionResult> = None;

        for row in rows {
            // Only the immediately preceding season counts as "previous".
            let prev = previous.filter(|p| p.target == row.target.prev());
            let speed = absorption_speed(row, prev);
            let prev_speed = prev.and_then(|_| speeds.last().copied());
            speeds.push(speed);

            let forecast = forecast_completion(row.net_rate, row.total_units, &speeds, row.target);
            out.push(DynamicsRecord {
                code: code.to_string(),
                target: row.target,
                speed,
                acceleration: acceleration(speed, prev_speed),
                efficiency: efficiency_score(row.net_rate, speed, forecast.current_speed_seasons, row.sales_seasons),
                forecast,
            });
            previous = Some(row);
        }
    }

    info!(
        records = out.len(),
        excellent = out.iter().filter(|d| d.efficiency.grade == EfficiencyGrade::Excellent).count(),
        "Absorption dynamics complete"
    );
    out
}

/// Index dynamics by (code, season).
pub fn index_dynamics(records: &[DynamicsRecord]) -> BTreeMap<(String, YearSeason), &DynamicsRecord> {
    records.iter().map(|d| ((d.code.clone(), d.target), d)).collect()
}
