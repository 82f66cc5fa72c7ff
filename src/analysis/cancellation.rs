//! Cancellation Record Analysis
//!
//! Parses the free-text 解約情形 column into structured cancellation events,
//! tabulates cancellation rates along geographic, temporal and scale axes,
//! and scores each transaction's cancellation risk.
//!
//! # Cancellation Text
//!
//! ```text
//! ""                          -> Normal
//! "1130401全部解約"            -> Full,    dates = [2024-04-01]
//! "部分解約 1130115;1130320"   -> Partial, dates = [2024-01-15, 2024-03-20]
//! "已解約"                     -> Other,   dates = []
//! ```
//!
//! Dates are digit runs of length 6..=8: 8 digits are AD `YYYYMMDD`, 7 digits
//! ROC `YYYMMDD`, 6 digits ROC `YYMMDD`. Fullwidth digits are read as ASCII
//! first; longer or shorter runs are not dates.

use crate::analysis::records::{compact_date, TransactionRecord};
use crate::analysis::season::YearSeason;
use crate::analysis::stats::{pct, Describe};
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

lazy_static! {
    static ref DATE_RUN: Regex = Regex::new(r"[0-9]+").expect("valid date regex");
}

/// Earliest AD year accepted in cancellation text.
const MIN_CANCELLATION_YEAR: i32 = 2000;
/// Latest AD year accepted in cancellation text.
const MAX_CANCELLATION_YEAR: i32 = 2030;
/// Transaction-to-cancellation intervals beyond this are data errors.
const MAX_INTERVAL_DAYS: i64 = 1000;

// =============================================================================
// PARSING
// =============================================================================

/// Kind of cancellation registered against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CancellationKind {
    Normal,
    Full,
    Partial,
    Other,
}

impl CancellationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "正常交易",
            Self::Full => "全部解約",
            Self::Partial => "部分解約",
            Self::Other => "其他解約",
        }
    }
}

/// Structured view of one 解約情形 value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    pub kind: CancellationKind,
    /// Valid dates, ascending.
    pub dates: Vec<NaiveDate>,
    /// Distinct seasons of `dates`, ascending.
    pub seasons: Vec<YearSeason>,
}

impl CancellationInfo {
    pub fn count(&self) -> usize {
        self.dates.len()
    }

    pub fn earliest(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn latest(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind != CancellationKind::Normal
    }
}

/// Map fullwidth digits (０..９) to ASCII.
fn ascii_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            _ => c,
        })
        .collect()
}

fn digits_to_date(digits: &str) -> Option<NaiveDate> {
    compact_date(digits)
        .filter(|d| (MIN_CANCELLATION_YEAR..=MAX_CANCELLATION_YEAR).contains(&d.year()))
}

/// Parse a 解約情形 value.
pub fn parse_cancellation(text: &str) -> CancellationInfo {
    let text = text.trim();
    if text.is_empty() {
        return CancellationInfo { kind: CancellationKind::Normal, dates: Vec::new(), seasons: Vec::new() };
    }

    let kind = if text.contains("全部解約") {
        CancellationKind::Full
    } else if text.contains("部分解約") {
        CancellationKind::Partial
    } else {
        CancellationKind::Other
    };

    let mut dates: Vec<NaiveDate> = DATE_RUN
        .find_iter(&ascii_digits(text))
        .filter_map(|m| digits_to_date(m.as_str()))
        .collect();
    dates.sort();

    let seasons: BTreeSet<YearSeason> = dates.iter().filter_map(|d| YearSeason::from_date(*d)).collect();

    CancellationInfo { kind, dates, seasons: seasons.into_iter().collect() }
}

// =============================================================================
// RATE TABLES
// =============================================================================

/// Cancellation count for one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RateRow {
    pub key: String,
    pub total: usize,
    pub cancelled: usize,
    pub rate: f64,
}

#[derive(Default)]
struct RateAccumulator {
    buckets: BTreeMap<String, (usize, usize)>,
}

impl RateAccumulator {
    fn add(&mut self, key: impl Into<String>, cancelled: bool) {
        let entry = self.buckets.entry(key.into()).or_insert((0, 0));
        entry.0 += 1;
        if cancelled {
            entry.1 += 1;
        }
    }

    fn finish(self) -> Vec<RateRow> {
        self.buckets
            .into_iter()
            .map(|(key, (total, cancelled))| RateRow {
                key,
                total,
                cancelled,
                rate: pct(cancelled as f64, total as f64),
            })
            .collect()
    }
}

/// Project scale bucket by unit count.
pub fn units_bucket(units: u32) -> &'static str {
    match units {
        0..=50 => "小型(≤50戶)",
        51..=100 => "中型(51-100戶)",
        101..=200 => "大型(101-200戶)",
        201..=500 => "特大型(201-500戶)",
        _ => "超大型(>500戶)",
    }
}

/// Total price bucket (萬).
pub fn total_price_bucket(price: f64) -> &'static str {
    if price <= 1000.0 {
        "≤1000萬"
    } else if price <= 2000.0 {
        "1000-2000萬"
    } else if price <= 3000.0 {
        "2000-3000萬"
    } else if price <= 5000.0 {
        "3000-5000萬"
    } else if price <= 10000.0 {
        "5000萬-1億"
    } else {
        ">1億"
    }
}

/// Unit price bucket (萬/坪).
pub fn unit_price_bucket(price: f64) -> &'static str {
    if price <= 30.0 {
        "≤30萬"
    } else if price <= 50.0 {
        "30-50萬"
    } else if price <= 70.0 {
        "50-70萬"
    } else if price <= 100.0 {
        "70-100萬"
    } else if price <= 150.0 {
        "100-150萬"
    } else {
        ">150萬"
    }
}

/// Cancellation rates along every axis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancellationRates {
    pub by_county: Vec<RateRow>,
    pub by_district: Vec<RateRow>,
    pub by_season: Vec<RateRow>,
    pub by_units: Vec<RateRow>,
    pub by_total_price: Vec<RateRow>,
    pub by_unit_price: Vec<RateRow>,
}

/// Tabulate cancellation rates. `units_by_code` maps project code to unit
/// count; transactions of unknown projects are left out of the scale table.
pub fn cancellation_rates(
    records: &[TransactionRecord],
    units_by_code: &HashMap<String, u32>,
) -> CancellationRates {
    let mut county = RateAccumulator::default();
    let mut district = RateAccumulator::default();
    let mut season = RateAccumulator::default();
    let mut units = RateAccumulator::default();
    let mut total_price = RateAccumulator::default();
    let mut unit_price = RateAccumulator::default();

    for rec in records {
        let cancelled = rec.is_cancelled();
        county.add(rec.county.as_str(), cancelled);
        district.add(format!("{}{}", rec.county, rec.district), cancelled);
        season.add(rec.season.to_string(), cancelled);
        if let Some(u) = units_by_code.get(&rec.project_code) {
            units.add(units_bucket(*u), cancelled);
        }
        if let Some(p) = rec.total_price.filter(|p| *p > 0.0) {
            total_price.add(total_price_bucket(p), cancelled);
        }
        if let Some(p) = rec.unit_price.filter(|p| *p > 0.0) {
            unit_price.add(unit_price_bucket(p), cancelled);
        }
    }

    CancellationRates {
        by_county: county.finish(),
        by_district: district.finish(),
        by_season: season.finish(),
        by_units: units.finish(),
        by_total_price: total_price.finish(),
        by_unit_price: unit_price.finish(),
    }
}

// =============================================================================
// INTERVALS
// =============================================================================

/// Timing between transaction and cancellation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancellationIntervals {
    /// Days from transaction to first cancellation, within 0..=1000
    pub transaction_to_cancellation: Describe,
    /// Days between first and last date of multi-date cancellations
    pub multi_cancellation_span: Describe,
    pub discarded: usize,
}

pub fn cancellation_intervals(
    records: &[TransactionRecord],
    parsed: &[CancellationInfo],
) -> CancellationIntervals {
    let mut intervals = Vec::new();
    let mut spans = Vec::new();
    let mut discarded = 0;

    for (rec, info) in records.iter().zip(parsed) {
        if let (Some(txn_date), Some(first)) = (rec.transaction_date, info.earliest()) {
            let days = (first - txn_date).num_days();
            if (0..=MAX_INTERVAL_DAYS).contains(&days) {
                intervals.push(days as f64);
            } else {
                discarded += 1;
            }
        }
        if info.count() > 1 {
            if let (Some(first), Some(last)) = (info.earliest(), info.latest()) {
                spans.push((last - first).num_days() as f64);
            }
        }
    }

    CancellationIntervals {
        transaction_to_cancellation: Describe::of(&intervals),
        multi_cancellation_span: Describe::of(&spans),
        discarded,
    }
}

// =============================================================================
// TRANSACTION RISK SCORE
// =============================================================================

/// Five-level transaction risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionRiskLevel {
    VeryHigh,
    High,
    Medium,
    Low,
    VeryLow,
}

impl TransactionRiskLevel {
    pub fn from_score(score: u32) -> Self {
        match score {
            80.. => Self::VeryHigh,
            65..=79 => Self::High,
            50..=64 => Self::Medium,
            35..=49 => Self::Low,
            _ => Self::VeryLow,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::VeryHigh => "極高風險",
            Self::High => "高風險",
            Self::Medium => "中風險",
            Self::Low => "低風險",
            Self::VeryLow => "極低風險",
        }
    }
}

/// Risk score, capped at 100.
pub fn transaction_risk_score(rec: &TransactionRecord) -> u32 {
    let total = rec.total_price.unwrap_or(0.0);
    let price_score = if total > 8000.0 {
        25
    } else if total > 5000.0 {
        20
    } else if total > 3000.0 {
        15
    } else if total > 1000.0 {
        10
    } else {
        5
    };

    let unit = rec.unit_price.unwrap_or(0.0);
    let unit_score = if unit > 150.0 {
        25
    } else if unit > 100.0 {
        20
    } else if unit > 70.0 {
        15
    } else if unit > 50.0 {
        10
    } else {
        5
    };

    let county_score = match rec.county.as_str() {
        "台北市" | "臺北市" | "新北市" => 20,
        "桃園市" | "台中市" | "臺中市" => 15,
        "高雄市" | "台南市" | "臺南市" => 10,
        _ => 5,
    };

    let season_score = match rec.season.ordinal() {
        1121.. => 15,
        1111..=1120 => 10,
        _ => 5,
    };

    let usage_score = if rec.usage.contains("住宅") { 10 } else { 5 };

    (price_score + unit_score + county_score + season_score + usage_score).min(100)
}

/// Cancellation rate per risk level, and whether the score separates risk.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RiskModelValidation {
    pub by_level: Vec<RateRow>,
    pub high_risk_rate: f64,
    pub low_risk_rate: f64,
    pub model_effective: bool,
}

pub fn validate_risk_model(records: &[TransactionRecord]) -> RiskModelValidation {
    let mut by_level: BTreeMap<TransactionRiskLevel, (usize, usize)> = BTreeMap::new();
    for rec in records {
        let level = TransactionRiskLevel::from_score(transaction_risk_score(rec));
        let entry = by_level.entry(level).or_insert((0, 0));
        entry.0 += 1;
        if rec.is_cancelled() {
            entry.1 += 1;
        }
    }

    let combined = |levels: &[TransactionRiskLevel]| {
        let (t, c) = levels
            .iter()
            .filter_map(|l| by_level.get(l))
            .fold((0usize, 0usize), |acc, (t, c)| (acc.0 + t, acc.1 + c));
        pct(c as f64, t as f64)
    };
    let high_risk_rate = combined(&[TransactionRiskLevel::VeryHigh, TransactionRiskLevel::High]);
    let low_risk_rate = combined(&[TransactionRiskLevel::Low, TransactionRiskLevel::VeryLow]);

    RiskModelValidation {
        by_level: by_level
            .iter()
            .map(|(level, (total, cancelled))| RateRow {
                key: level.label().to_string(),
                total: *total,
                cancelled: *cancelled,
                rate: pct(*cancelled as f64, *total as f64),
            })
            .collect(),
        high_risk_rate,
        low_risk_rate,
        model_effective: high_risk_rate > low_risk_rate,
    }
}

// =============================================================================
// STAGE ENTRY POINT
// =============================================================================

/// Stage 02 output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancellationAnalysis {
    pub total_transactions: usize,
    pub cancelled_transactions: usize,
    pub cancellation_rate: f64,
    pub kind_counts: BTreeMap<String, usize>,
    pub rates: CancellationRates,
    pub intervals: CancellationIntervals,
    pub risk_model: RiskModelValidation,
    /// Cancelled transactions per cancellation season
    pub by_cancellation_season: BTreeMap<String, usize>,
}

/// Parse every record's cancellation text (index-aligned with `records`).
pub fn parse_all(records: &[TransactionRecord]) -> Vec<CancellationInfo> {
    records.iter().map(|r| parse_cancellation(&r.cancellation_text)).collect()
}

pub fn analyze_cancellations(
    records: &[TransactionRecord],
    parsed: &[CancellationInfo],
    units_by_code: &HashMap<String, u32>,
) -> CancellationAnalysis {
    let mut kind_counts = BTreeMap::new();
    let mut by_cancellation_season = BTreeMap::new();
    for info in parsed {
        *kind_counts.entry(info.kind.label().to_string()).or_insert(0) += 1;
        for season in &info.seasons {
            *by_cancellation_season.entry(season.to_string()).or_insert(0) += 1;
        }
    }
    let cancelled = records.iter().filter(|r| r.is_cancelled()).count();

    let analysis = CancellationAnalysis {
        total_transactions: records.len(),
        cancelled_transactions: cancelled,
        cancellation_rate: pct(cancelled as f64, records.len() as f64),
        kind_counts,
        rates: cancellation_rates(records, units_by_code),
        intervals: cancellation_intervals(records, parsed),
        risk_model: validate_risk_model(records),
        by_cancellation_season,
    };

    info!(
        total = analysis.total_transactions,
        cancelled = analysis.cancelled_transactions,
        rate = analysis.cancellation_rate,
        model_effective = analysis.risk_model.model_effective,
        "Cancellation analysis complete"
    );
    analysis
}

/// Latest AD date among all parsed cancellations, used for reporting.
pub fn latest_cancellation_year(parsed: &[CancellationInfo]) -> Option<i32> {
    parsed.iter().filter_map(|p| p.latest()).max().map(|d| d.year())
}
