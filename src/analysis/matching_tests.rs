use super::fixtures::{project, season, txn};
use super::matching::*;
use crate::analysis::records::TransactionRecord;

fn many(code: &str, season_text: &str, n: usize) -> Vec<TransactionRecord> {
    (0..n)
        .map(|i| {
            let mut r = txn(code, season_text);
            r.floor = format!("{}F", i + 1);
            r
        })
        .collect()
}

#[test]
fn test_street_similarity() {
    assert_eq!(street_similarity("復興南路", "復興南路"), 1.0);
    assert_eq!(street_similarity("", ""), 1.0);
    // 2 * 3 / 7
    assert!((street_similarity("復興南路", "復興路") - 6.0 / 7.0).abs() < 1e-6);
    assert!(street_similarity("文化路", "中山北路") < 0.6);
}

#[test]
fn test_match_projects_partitions_codes() {
    let projects = vec![project("A", 100, "112Y1S"), project("C", 100, "112Y1S")];
    let mut clean = many("A", "113Y1S", 2);
    clean.extend(many("B", "113Y1S", 3));

    let outcome = match_projects(&projects, &clean);
    assert_eq!(outcome.matched_codes, vec!["A"]);
    assert_eq!(outcome.unmatched_transaction_codes, vec!["B"]);
    assert_eq!(outcome.projects_without_transactions, vec!["C"]);
    assert!((outcome.county_match_rates["台北市"] - 50.0).abs() < 1e-9);
    assert_eq!(outcome.geo_checks.len(), 1);
    assert!(outcome.geo_checks[0].consistent);
    assert_eq!(outcome.geo_consistency_rate, 100.0);
}

#[test]
fn test_geo_check_flags_other_district() {
    let mut p = project("A", 100, "112Y1S");
    p.district = "信義區".to_string();
    let outcome = match_projects(&[p], &many("A", "113Y1S", 2));
    assert!(!outcome.geo_checks[0].district_match);
    assert!(!outcome.geo_checks[0].consistent);
    assert_eq!(outcome.geo_consistency_rate, 0.0);
}

#[test]
fn test_estimate_units_and_confidence() {
    let mut clean = many("B", "113Y1S", 9);
    clean.extend(many("B", "113Y2S", 1));
    let outcome = match_projects(&[], &clean);
    let estimates = estimate_missing_projects(&outcome, &clean);

    assert_eq!(estimates.len(), 1);
    let est = &estimates[0];
    // floor(10 / 0.45) = 22 > 10 + 10
    assert_eq!(est.estimated_units, 22);
    assert_eq!(est.name, "B社區");
    assert_eq!(est.sales_start_season, season("113Y1S"));
    // 0.3 size + 0.3 location + 0.4 time
    assert!((est.confidence - 1.0).abs() < 1e-9);
    assert_eq!(est.band, ConfidenceBand::High);

    let small = many("S", "113Y1S", 2);
    let outcome = match_projects(&[], &small);
    let est = &estimate_missing_projects(&outcome, &small)[0];
    assert_eq!(est.estimated_units, 12);
    assert!((est.confidence - 0.8).abs() < 1e-9);
}

#[test]
fn test_index_merges_registry_and_estimates() {
    let mut no_units = project("A", 0, "112Y1S");
    no_units.total_units = None;
    let mut no_start = project("N", 80, "112Y1S");
    no_start.sales_start_season = None;
    let mut orphan = project("O", 80, "112Y1S");
    orphan.sales_start_season = None;

    let clean = many("N", "113Y2S", 1);
    let index = build_project_index(&[no_units, no_start, orphan], &[], &clean);

    assert_eq!(index["A"].total_units, DEFAULT_UNITS);
    assert!(!index["A"].has_complete_info);
    assert_eq!(index["N"].sales_start_season, season("113Y2S"));
    assert!(!index.contains_key("O"));
    assert_eq!(index["A"].source, ProjectSource::Registry);
}

#[test]
fn test_screen_active_excludes_sold_out_and_future() {
    let projects = vec![
        project("A", 10, "112Y1S"),
        project("F", 10, "114Y1S"),
        project("S", 2, "112Y1S"),
    ];
    let mut clean = many("A", "113Y1S", 3);
    clean.extend(many("S", "113Y1S", 2));
    let index = build_project_index(&projects, &[], &clean);

    let active = screen_active(&index, &clean, season("113Y2S"), 12);
    assert_eq!(active.len(), 1);
    let a = &active[0];
    assert_eq!(a.code, "A");
    assert!((a.gross_rate - 30.0).abs() < 1e-9);
    assert_eq!(a.sales_seasons, 6);
    assert_eq!(a.no_txn_seasons, 1);
    // rate 30 -> +1
    assert_eq!(a.stagnation_points, 1);
    assert_eq!(a.stagnation_level, StagnationLevel::Low);
}

#[test]
fn test_long_term_stagnation() {
    let projects = vec![project("Z", 100, "109Y1S")];
    let index = build_project_index(&projects, &[], &[]);
    let active = screen_active(&index, &[], season("113Y4S"), 12);

    let z = &active[0];
    assert_eq!(z.sales_seasons, 20);
    assert_eq!(z.no_txn_seasons, 12);
    assert!(z.is_long_term_stagnant);
    // sales > 12, > 16, no_txn >= 8, >= 12, rate < 30
    assert_eq!(z.stagnation_points, 6);
    assert_eq!(z.stagnation_level, StagnationLevel::High);
}

#[test]
fn test_validate_matching_reports_issues() {
    let projects = vec![project("A", 1, "112Y1S")];
    let mut clean = many("A", "113Y1S", 2);
    clean.extend(many("B", "113Y1S", 1));
    clean.extend(many("C", "113Y1S", 1));
    let outcome = match_projects(&projects, &clean);
    let mut estimates = estimate_missing_projects(&outcome, &clean);
    for e in &mut estimates {
        e.band = ConfidenceBand::Low;
    }
    let index = build_project_index(&projects, &estimates, &clean);

    let validation = validate_matching(&outcome, &estimates, &[], max_gross_rate(&index, &clean));
    assert!((validation.coverage - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(validation.low_confidence_share, 100.0);
    assert_eq!(validation.max_gross_rate, 200.0);
    assert_eq!(validation.issues.len(), 3);
    assert!(!validation.passes());
}
