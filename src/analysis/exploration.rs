//! Data Exploration and Validation
//!
//! First look at the two registry exports: key-field completeness, how well
//! project codes line up between the files, cancellation prevalence and the
//! spread of prices and areas.

use crate::analysis::records::{
    clean_text, parse_number, RawProjectRow, RawTransactionRow,
};
use crate::analysis::stats::{pct, Describe};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Null counts for one export's key fields.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompletenessReport {
    pub rows: usize,
    /// Field -> null count
    pub null_counts: BTreeMap<String, usize>,
    /// 1 - nulls / (rows * fields)
    pub completeness: f64,
}

impl CompletenessReport {
    fn build(rows: usize, fields: &[(&str, usize)]) -> Self {
        let total_nulls: usize = fields.iter().map(|(_, n)| n).sum();
        let cells = rows * fields.len();
        let completeness = if cells == 0 { 0.0 } else { 1.0 - total_nulls as f64 / cells as f64 };
        Self {
            rows,
            null_counts: fields.iter().map(|(f, n)| (f.to_string(), *n)).collect(),
            completeness,
        }
    }

    /// Null rate of one field in percent.
    pub fn null_pct(&self, field: &str) -> f64 {
        let nulls = self.null_counts.get(field).copied().unwrap_or(0);
        pct(nulls as f64, self.rows as f64)
    }
}

/// Overlap between the two exports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CodeMatch {
    pub project_codes: usize,
    pub transaction_codes: usize,
    pub matched: usize,
    pub only_in_projects: usize,
    pub only_in_transactions: usize,
    /// matched / max(project_codes, transaction_codes) * 100
    pub match_rate: f64,
    /// Same ratio over (county, district) pairs
    pub spatial_match_rate: f64,
}

/// Stage 01 output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExplorationReport {
    pub projects: CompletenessReport,
    pub transactions: CompletenessReport,
    pub code_match: CodeMatch,
    pub cancellation_rate: f64,
    pub counties: Vec<String>,
    pub district_count: usize,
    pub by_county: BTreeMap<String, usize>,
    pub by_district: BTreeMap<String, usize>,
    pub by_season: BTreeMap<String, usize>,
    pub total_price: Describe,
    pub unit_price: Describe,
    pub area: Describe,
    pub passes: bool,
    pub issues: Vec<String>,
}

fn count_missing<R>(rows: &[R], get: impl Fn(&R) -> &Option<String>) -> usize {
    rows.iter().filter(|r| clean_text(get(r)).is_none()).count()
}

fn ratio_of_overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> (usize, f64) {
    let matched = a.intersection(b).count();
    let denom = a.len().max(b.len());
    (matched, pct(matched as f64, denom as f64))
}

/// Explore both exports and judge them against `min_completeness`.
pub fn explore(
    transactions: &[RawTransactionRow],
    projects: &[RawProjectRow],
    min_completeness: f64,
) -> ExplorationReport {
    let project_fields = [
        ("編號", count_missing(projects, |r| &r.code)),
        ("社區名稱", count_missing(projects, |r| &r.name)),
        ("縣市", count_missing(projects, |r| &r.county)),
        ("行政區", count_missing(projects, |r| &r.district)),
        ("戶數", count_missing(projects, |r| &r.total_units)),
        ("銷售起始年季", count_missing(projects, |r| &r.sales_start_season)),
    ];
    let transaction_fields = [
        ("備查編號", count_missing(transactions, |r| &r.project_code)),
        ("縣市", count_missing(transactions, |r| &r.county)),
        ("行政區", count_missing(transactions, |r| &r.district)),
        ("交易日期", count_missing(transactions, |r| &r.transaction_date)),
        ("交易年季", count_missing(transactions, |r| &r.season)),
        ("交易總價", count_missing(transactions, |r| &r.total_price)),
        ("建物單價", count_missing(transactions, |r| &r.unit_price)),
    ];
    let project_report = CompletenessReport::build(projects.len(), &project_fields);
    let transaction_report = CompletenessReport::build(transactions.len(), &transaction_fields);

    // Code overlap
    let project_codes: BTreeSet<String> = projects.iter().filter_map(|r| clean_text(&r.code)).collect();
    let transaction_codes: BTreeSet<String> =
        transactions.iter().filter_map(|r| clean_text(&r.project_code)).collect();
    let (matched, match_rate) = ratio_of_overlap(&project_codes, &transaction_codes);

    let area_key = |county: &Option<String>, district: &Option<String>| {
        Some(format!("{}|{}", clean_text(county)?, clean_text(district)?))
    };
    let project_areas: BTreeSet<String> =
        projects.iter().filter_map(|r| area_key(&r.county, &r.district)).collect();
    let transaction_areas: BTreeSet<String> =
        transactions.iter().filter_map(|r| area_key(&r.county, &r.district)).collect();
    let (_, spatial_match_rate) = ratio_of_overlap(&project_areas, &transaction_areas);

    let code_match = CodeMatch {
        project_codes: project_codes.len(),
        transaction_codes: transaction_codes.len(),
        matched,
        only_in_projects: project_codes.difference(&transaction_codes).count(),
        only_in_transactions: transaction_codes.difference(&project_codes).count(),
        match_rate,
        spatial_match_rate,
    };

    // Distributions
    let mut by_county = BTreeMap::new();
    let mut by_district = BTreeMap::new();
    let mut by_season = BTreeMap::new();
    let mut cancelled = 0usize;
    for row in transactions {
        if let Some(county) = clean_text(&row.county) {
            *by_county.entry(county.clone()).or_insert(0) += 1;
            if let Some(district) = clean_text(&row.district) {
                *by_district.entry(format!("{}{}", county, district)).or_insert(0) += 1;
            }
        }
        if let Some(season) = clean_text(&row.season) {
            *by_season.entry(season).or_insert(0) += 1;
        }
        if clean_text(&row.cancellation).is_some() {
            cancelled += 1;
        }
    }

    let values = |get: fn(&RawTransactionRow) -> &Option<String>| -> Vec<f64> {
        transactions.iter().filter_map(|r| parse_number(get(r))).collect()
    };

    let mut issues = Vec::new();
    if project_report.completeness < min_completeness {
        issues.push(format!(
            "Project key-field completeness {:.2}% below {:.2}%",
            project_report.completeness * 100.0,
            min_completeness * 100.0
        ));
    }
    if transaction_report.completeness < min_completeness {
        issues.push(format!(
            "Transaction key-field completeness {:.2}% below {:.2}%",
            transaction_report.completeness * 100.0,
            min_completeness * 100.0
        ));
    }
    if code_match.matched == 0 && !project_codes.is_empty() && !transaction_codes.is_empty() {
        issues.push("No project code appears in both exports".to_string());
    }

    let report = ExplorationReport {
        cancellation_rate: pct(cancelled as f64, transactions.len() as f64),
        counties: by_county.keys().cloned().collect(),
        district_count: by_district.len(),
        by_county,
        by_district,
        by_season,
        total_price: Describe::of(&values(|r| &r.total_price)),
        unit_price: Describe::of(&values(|r| &r.unit_price)),
        area: Describe::of(&values(|r| &r.area)),
        passes: issues.is_empty(),
        issues,
        projects: project_report,
        transactions: transaction_report,
        code_match,
    };

    info!(
        projects = report.projects.rows,
        transactions = report.transactions.rows,
        match_rate = report.code_match.match_rate,
        cancellation_rate = report.cancellation_rate,
        "Exploration complete"
    );
    for issue in &report.issues {
        warn!("{}", issue);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(code: &str, county: &str, district: &str, season: &str, cancel: &str) -> RawTransactionRow {
        let opt = |v: &str| if v.is_empty() { None } else { Some(v.to_string()) };
        RawTransactionRow {
            project_code: opt(code),
            county: opt(county),
            district: opt(district),
            transaction_date: Some("20240101".into()),
            season: opt(season),
            total_price: Some("1000".into()),
            unit_price: Some("50".into()),
            area: Some("20".into()),
            cancellation: opt(cancel),
            ..Default::default()
        }
    }

    fn project(code: &str, county: &str, district: &str) -> RawProjectRow {
        RawProjectRow {
            code: Some(code.into()),
            name: Some(format!("{} 社區", code)),
            county: Some(county.into()),
            district: Some(district.into()),
            total_units: Some("100".into()),
            sales_start_season: Some("112Y1S".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_match_rate_uses_larger_side() {
        let txns = vec![
            txn("A", "台北市", "大安區", "113Y1S", ""),
            txn("B", "台北市", "大安區", "113Y1S", "全部解約"),
            txn("C", "新北市", "板橋區", "113Y2S", ""),
        ];
        let projects = vec![project("A", "台北市", "大安區"), project("B", "台北市", "大安區")];
        let report = explore(&txns, &projects, 0.95);

        assert_eq!(report.code_match.matched, 2);
        assert!((report.code_match.match_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.code_match.only_in_transactions, 1);
        assert!((report.code_match.spatial_match_rate - 50.0).abs() < 1e-9);
        assert!((report.cancellation_rate - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.counties, vec!["台北市", "新北市"]);
        assert_eq!(report.by_season.get("113Y1S"), Some(&2));
    }

    #[test]
    fn test_completeness_flags_missing_fields() {
        let txns = vec![txn("A", "台北市", "", "", ""), txn("A", "台北市", "大安區", "113Y1S", "")];
        let projects = vec![project("A", "台北市", "大安區")];
        let report = explore(&txns, &projects, 0.95);

        // 2 nulls over 2 rows * 7 fields
        assert!((report.transactions.completeness - (1.0 - 2.0 / 14.0)).abs() < 1e-9);
        assert!((report.transactions.null_pct("行政區") - 50.0).abs() < 1e-9);
        assert!(!report.passes);
        assert_eq!(report.issues.len(), 1);
        assert!((report.projects.completeness - 1.0).abs() < 1e-9);
    }
}
