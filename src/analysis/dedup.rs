//! Duplicate Transaction Resolution
//!
//! The registry records a unit once per filing, so a unit that was sold,
//! cancelled and resold appears several times. Records are grouped by a
//! property id and exactly one record per group is kept as the valid sale.
//!
//! ```text
//! group (sorted by date)        outcome
//! ─────────────────────────     ──────────────────────────────────────────
//! [normal]                      valid
//! [cancel, normal, normal]      normal#1 valid, rest 重複交易-非最早有效交易
//! [cancel, cancel]              cancel#1 kept but invalid (全部解約),
//!                               cancel#2 重複交易-非最早有效交易
//! ```

use crate::analysis::records::TransactionRecord;
use crate::analysis::stats::{mean, pct, quantile};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"\W").expect("valid non-word regex");
}

/// Tolerated relative gap between total price and unit price × area.
const PRICE_MISMATCH_TOLERANCE: f64 = 0.05;
const MIN_AREA: f64 = 5.0;
const MAX_AREA: f64 = 200.0;
const MIN_UNIT_PRICE: f64 = 5.0;
const MAX_UNIT_PRICE: f64 = 300.0;

// =============================================================================
// PROPERTY IDENTITY
// =============================================================================

/// `{code}_{street}_{floor}` with every non-word character replaced by `_`.
pub fn property_id(rec: &TransactionRecord) -> String {
    let raw = format!("{}_{}_{}", rec.project_code, rec.street, rec.floor);
    NON_WORD.replace_all(&raw, "_").into_owned()
}

/// Why a record does not count as a valid sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InvalidReason {
    /// Every record of the property was cancelled; this is the earliest.
    FullyCancelled,
    /// A different record of the same property is the valid one.
    SupersededDuplicate,
}

impl InvalidReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::FullyCancelled => "全部解約",
            Self::SupersededDuplicate => "重複交易-非最早有效交易",
        }
    }
}

/// Per-record duplicate flags, index-aligned with the input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupFlags {
    pub property_id: String,
    pub is_duplicate: bool,
    pub is_valid: bool,
    pub invalid_reason: Option<InvalidReason>,
    /// Records sharing the property id
    pub duplicate_count: usize,
}

/// Before/after accounting of the resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupSummary {
    pub original_count: usize,
    pub unique_properties: usize,
    pub duplicate_properties: usize,
    /// Records belonging to a group of two or more
    pub duplicate_transactions: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub retention_rate: f64,
    pub cancellation_rate_before: f64,
    pub cancellation_rate_after: f64,
    /// Mean (last - first) total price inside duplicate groups, 萬
    pub mean_price_change: f64,
    /// Mean relative change inside duplicate groups, %
    pub mean_price_change_pct: f64,
    pub invalid_reasons: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupOutcome {
    pub flags: Vec<DedupFlags>,
    pub summary: DedupSummary,
}

// =============================================================================
// RESOLUTION
// =============================================================================

pub fn resolve_duplicates(records: &[TransactionRecord]) -> DedupOutcome {
    let ids: Vec<String> = records.iter().map(property_id).collect();

    let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, id) in ids.iter().enumerate() {
        groups.entry(id.as_str()).or_default().push(idx);
    }

    let mut flags: Vec<DedupFlags> = ids
        .iter()
        .map(|id| DedupFlags {
            property_id: id.clone(),
            is_duplicate: false,
            is_valid: true,
            invalid_reason: None,
            duplicate_count: 1,
        })
        .collect();

    let mut price_changes = Vec::new();
    let mut price_changes_pct = Vec::new();
    let mut duplicate_properties = 0;
    let mut duplicate_transactions = 0;

    for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        duplicate_properties += 1;
        duplicate_transactions += members.len();

        let mut ordered = members.clone();
        // Undated records sort last; ties keep file order.
        ordered.sort_by_key(|&i| (records[i].transaction_date.is_none(), records[i].transaction_date, i));

        let keeper = ordered.iter().copied().find(|&i| records[i].is_normal());
        let representative = keeper.unwrap_or(ordered[0]);

        for &i in &ordered {
            let flag = &mut flags[i];
            flag.is_duplicate = true;
            flag.duplicate_count = members.len();
            if i == representative {
                if keeper.is_none() {
                    flag.is_valid = false;
                    flag.invalid_reason = Some(InvalidReason::FullyCancelled);
                }
            } else {
                flag.is_valid = false;
                flag.invalid_reason = Some(InvalidReason::SupersededDuplicate);
            }
        }

        let first = ordered.first().and_then(|&i| records[i].total_price);
        let last = ordered.last().and_then(|&i| records[i].total_price);
        if let (Some(first), Some(last)) = (first, last) {
            price_changes.push(last - first);
            if first > 0.0 {
                price_changes_pct.push((last - first) / first * 100.0);
            }
        }
    }

    let valid_count = flags.iter().filter(|f| f.is_valid).count();
    let cancelled_before = records.iter().filter(|r| r.is_cancelled()).count();
    let cancelled_after = records
        .iter()
        .zip(&flags)
        .filter(|(r, f)| f.is_valid && r.is_cancelled())
        .count();

    let mut invalid_reasons = HashMap::new();
    for reason in flags.iter().filter_map(|f| f.invalid_reason) {
        *invalid_reasons.entry(reason.label().to_string()).or_insert(0) += 1;
    }

    let summary = DedupSummary {
        original_count: records.len(),
        unique_properties: groups.len(),
        duplicate_properties,
        duplicate_transactions,
        valid_count,
        invalid_count: records.len() - valid_count,
        retention_rate: pct(valid_count as f64, records.len() as f64),
        cancellation_rate_before: pct(cancelled_before as f64, records.len() as f64),
        cancellation_rate_after: pct(cancelled_after as f64, valid_count as f64),
        mean_price_change: mean(&price_changes),
        mean_price_change_pct: mean(&price_changes_pct),
        invalid_reasons,
    };

    info!(
        original = summary.original_count,
        unique = summary.unique_properties,
        duplicates = summary.duplicate_properties,
        valid = summary.valid_count,
        retention = summary.retention_rate,
        "Duplicate resolution complete"
    );
    DedupOutcome { flags, summary }
}

/// Valid records only, in input order.
pub fn clean_transactions(records: &[TransactionRecord], outcome: &DedupOutcome) -> Vec<TransactionRecord> {
    records
        .iter()
        .zip(&outcome.flags)
        .filter(|(_, f)| f.is_valid)
        .map(|(r, _)| r.clone())
        .collect()
}

// =============================================================================
// QUALITY CHECKS
// =============================================================================

/// Tukey fences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Fence {
    pub lower: f64,
    pub upper: f64,
}

impl Fence {
    /// 1.5 × IQR fences, `None` for an empty sample.
    pub fn iqr(values: &[f64]) -> Option<Self> {
        let q1 = quantile(values, 0.25)?;
        let q3 = quantile(values, 0.75)?;
        let iqr = q3 - q1;
        Some(Self { lower: q1 - 1.5 * iqr, upper: q3 + 1.5 * iqr })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PriceOutliers {
    pub unit_price_fence: Option<Fence>,
    pub total_price_fence: Option<Fence>,
    /// Indices into the input
    pub unit_price_outliers: Vec<usize>,
    pub total_price_outliers: Vec<usize>,
}

fn outliers_of(records: &[TransactionRecord], get: fn(&TransactionRecord) -> Option<f64>) -> (Option<Fence>, Vec<usize>) {
    let values: Vec<f64> = records.iter().filter_map(get).collect();
    let Some(fence) = Fence::iqr(&values) else {
        return (None, Vec::new());
    };
    let idx = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| get(r).filter(|v| !fence.contains(*v)).map(|_| i))
        .collect();
    (Some(fence), idx)
}

pub fn detect_price_outliers(records: &[TransactionRecord]) -> PriceOutliers {
    let (unit_price_fence, unit_price_outliers) = outliers_of(records, |r| r.unit_price);
    let (total_price_fence, total_price_outliers) = outliers_of(records, |r| r.total_price);
    debug!(
        unit = unit_price_outliers.len(),
        total = total_price_outliers.len(),
        "Price outliers detected"
    );
    PriceOutliers { unit_price_fence, total_price_fence, unit_price_outliers, total_price_outliers }
}

/// Records whose fields disagree with each other or with plausible ranges.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyIssues {
    /// |total - unit × area| / total above 5%
    pub price_mismatch: Vec<usize>,
    pub area_out_of_range: Vec<usize>,
    pub unit_price_out_of_range: Vec<usize>,
}

impl ConsistencyIssues {
    pub fn total(&self) -> usize {
        self.price_mismatch.len() + self.area_out_of_range.len() + self.unit_price_out_of_range.len()
    }
}

pub fn check_consistency(records: &[TransactionRecord]) -> ConsistencyIssues {
    let mut issues = ConsistencyIssues::default();
    for (i, rec) in records.iter().enumerate() {
        if let (Some(total), Some(unit), Some(area)) = (rec.total_price, rec.unit_price, rec.area) {
            if total > 0.0 && ((total - unit * area).abs() / total) > PRICE_MISMATCH_TOLERANCE {
                issues.price_mismatch.push(i);
            }
        }
        if let Some(area) = rec.area {
            if !(MIN_AREA..=MAX_AREA).contains(&area) {
                issues.area_out_of_range.push(i);
            }
        }
        if let Some(unit) = rec.unit_price {
            if !(MIN_UNIT_PRICE..=MAX_UNIT_PRICE).contains(&unit) {
                issues.unit_price_out_of_range.push(i);
            }
        }
    }
    issues
}
