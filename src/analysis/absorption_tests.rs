use super::absorption::*;
use super::fixtures::{cancelled, date, project, season, txn};
use super::matching::build_project_index;
use crate::analysis::records::TransactionRecord;

fn records(normal: usize, cancel: usize, season_text: &str) -> Vec<TransactionRecord> {
    let mut out: Vec<TransactionRecord> = (0..normal).map(|_| txn("A", season_text)).collect();
    out.extend((0..cancel).map(|_| cancelled("A", season_text)));
    out
}

fn result_for(units: u32, clean: &[TransactionRecord], target: &str, analysis: (i32, u32, u32)) -> AbsorptionResult {
    let index = build_project_index(&[project("A", units, "112Y1S")], &[], clean);
    let refs: Vec<&TransactionRecord> = clean.iter().collect();
    calculate_absorption(&index["A"], &refs, season(target), date(analysis.0, analysis.1, analysis.2)).unwrap()
}

#[test]
fn test_gross_net_and_cancellation() {
    let clean = records(30, 5, "113Y1S");
    let r = result_for(100, &clean, "113Y1S", (2024, 12, 31));
    assert_eq!(r.cumulative_transactions, 35);
    assert_eq!(r.gross_rate, 30.0);
    assert_eq!(r.net_rate, 25.0);
    assert!((r.cancellation_rate - 16.67).abs() < 1e-9);
    assert!(r.season_complete);
    assert_eq!(r.adjustment_factor, 1.0);
    assert_eq!(r.adjusted_rate, 25.0);
    assert_eq!(r.sales_seasons, 5);
}

#[test]
fn test_records_after_target_are_ignored() {
    let mut clean = records(10, 0, "113Y1S");
    clean.extend(records(10, 0, "113Y3S"));
    let r = result_for(100, &clean, "113Y2S", (2024, 12, 31));
    assert_eq!(r.cumulative_transactions, 10);
    assert_eq!(r.season_transactions, 0);
    assert_eq!(r.gross_rate, 10.0);
}

#[test]
fn test_net_floors_at_zero() {
    let clean = records(2, 5, "113Y1S");
    let r = result_for(100, &clean, "113Y1S", (2024, 12, 31));
    assert_eq!(r.net_rate, 0.0);
    let v = validate_rates(&r);
    assert!(!v.is_valid());
    assert!(v.errors[0].contains("cancelled 5 > normal 2"));
}

#[test]
fn test_incomplete_season_is_adjusted() {
    // 113Y4S is 92 days, 2024-11-15 is day 46
    let clean = records(20, 0, "113Y4S");
    let r = result_for(100, &clean, "113Y4S", (2024, 11, 15));
    assert!(!r.season_complete);
    assert_eq!(r.sales_days, 46);
    assert_eq!(r.adjustment_factor, 2.0);
    assert_eq!(r.adjusted_rate, 40.0);
}

#[test]
fn test_last_day_of_season_counts_as_full_length() {
    let clean = records(20, 0, "113Y4S");
    let r = result_for(100, &clean, "113Y4S", (2024, 12, 31));
    assert!(!r.season_complete);
    assert_eq!(r.sales_days, 92);
    assert_eq!(r.adjustment_factor, 1.0);
}

#[test]
fn test_calculate_all_reports_errors_and_sorts() {
    let mut clean = records(10, 0, "113Y1S");
    clean.push(txn("Z", "113Y1S"));
    let index = build_project_index(&[project("A", 100, "112Y1S"), project("Z", 0, "112Y1S")], &[], &clean);
    let requests = vec![
        ("A".to_string(), season("113Y2S")),
        ("MISSING".to_string(), season("113Y1S")),
        ("A".to_string(), season("113Y1S")),
        ("Z".to_string(), season("113Y1S")),
    ];
    let run = calculate_all(&index, &clean, &requests, date(2024, 12, 31));

    assert_eq!(run.results.len(), 2);
    assert_eq!(run.results[0].target, season("113Y1S"));
    assert_eq!(run.errors.len(), 2);
    assert!(matches!(run.errors[0].2, AbsorptionError::ProjectNotFound { .. }));
    assert!(matches!(run.errors[1].2, AbsorptionError::InvalidUnits { units: 0, .. }));
    assert!(run.get("A", season("113Y2S")).is_some());
    assert!(run.get("A", season("113Y3S")).is_none());
}

#[test]
fn test_anomalies() {
    let clean = records(3, 1, "113Y1S");
    let single = result_for(1, &clean, "113Y1S", (2024, 12, 31));
    let kinds: Vec<AnomalyKind> = detect_anomalies(&[single]).into_iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AnomalyKind::SingleUnitMultipleSales));
    assert!(kinds.contains(&AnomalyKind::AdjustedAbove150));
    assert!(kinds.contains(&AnomalyKind::HighCancellation));
}

#[test]
fn test_benchmarks_and_grades() {
    let results: Vec<AbsorptionResult> = [(10, 50), (20, 100), (30, 150), (40, 200), (50, 250)]
        .iter()
        .map(|&(normal, units)| result_for(units, &records(normal, 0, "113Y1S"), "113Y1S", (2024, 12, 31)))
        .collect();
    let b = establish_benchmarks(&results);
    // every net rate is 20%
    assert_eq!(b.net_q50, 20.0);
    assert_eq!(b.cancellation_q95, 0.0);
    assert!((b.units_q33 - 116.0).abs() < 1e-9);

    let g = grade(&results[0], &b);
    assert_eq!(g.absorption, AbsorptionGrade::High);
    assert_eq!(g.cancellation, CancellationGrade::Extreme);
    assert_eq!(g.scale, ScaleGrade::Small);
    assert_eq!(grade(&results[4], &b).scale, ScaleGrade::Large);
}
