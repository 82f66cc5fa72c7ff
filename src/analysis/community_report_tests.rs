use super::absorption::calculate_all;
use super::community_report::*;
use super::dynamics::analyze_dynamics;
use super::export::to_csv_string;
use super::fixtures::{cancelled, date, project, season, txn};
use super::matching::build_project_index;
use super::records::{ProjectRecord, TransactionRecord};
use super::stage_risk::assess_all;
use chrono::NaiveDate;

fn build(
    projects: &[ProjectRecord],
    clean: &[TransactionRecord],
    targets: &[&str],
    analysis_date: NaiveDate,
) -> Vec<CommunityReportRow> {
    let profiles = build_project_index(projects, &[], clean);
    let requests: Vec<(String, _)> = profiles
        .keys()
        .flat_map(|code| targets.iter().map(move |t| (code.clone(), season(t))))
        .collect();
    let absorption = calculate_all(&profiles, clean, &requests, analysis_date);
    let dynamics = analyze_dynamics(&absorption.results);
    let stage_risk = assess_all(&absorption.results, &dynamics, clean);
    generate_community_report(&ReportContext {
        profiles: &profiles,
        clean,
        absorption: &absorption,
        dynamics: &dynamics,
        stage_risk: &stage_risk,
    })
}

fn two_season_sample() -> Vec<CommunityReportRow> {
    let mut clean: Vec<TransactionRecord> = (0..10).map(|_| txn("A", "113Y1S")).collect();
    clean.extend((0..10).map(|_| txn("A", "113Y2S")));
    clean.extend((0..2).map(|_| cancelled("A", "113Y2S")));
    build(&[project("A", 100, "113Y1S")], &clean, &["113Y1S", "113Y2S"], date(2024, 12, 31))
}

#[test]
fn test_rows_follow_absorption_and_dynamics() {
    let rows = two_season_sample();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].season, "113Y1S");

    let row = &rows[1];
    assert_eq!(row.code, "A");
    assert_eq!(row.name, "A社區");
    assert_eq!(row.total_units, 100);
    assert_eq!(row.sales_start_season, "113Y1S");
    assert_eq!(row.sales_seasons, 2);
    assert_eq!(row.cumulative_transactions, 22);
    assert_eq!(row.season_transactions, 12);
    assert_eq!(row.gross_rate, 20.0);
    assert_eq!(row.net_rate, 18.0);

    // 10 units in the first season, 18 net by the second
    assert_eq!(rows[0].speed, 10.0);
    assert_eq!(row.speed, 8.0);
    assert_eq!(row.acceleration, -20.0);
    assert!(row.efficiency_grade.contains(' '));
    assert!(!row.stage.is_empty());
}

#[test]
fn test_cancellation_fields() {
    let rows = two_season_sample();
    let first = &rows[0];
    assert_eq!(first.cumulative_cancellations, 0);
    assert_eq!(first.latest_cancellation_season, "");
    assert_eq!(first.consecutive_no_cancellation_seasons, 1);
    assert!(first.cancellation_alert.contains("低風險"));

    let row = &rows[1];
    assert_eq!(row.cumulative_cancellations, 2);
    assert_eq!(row.season_cancellations, 2);
    assert!((row.cumulative_cancellation_rate - 9.09).abs() < 1e-9);
    assert!((row.season_cancellation_rate - 16.67).abs() < 1e-9);
    assert_eq!(row.latest_cancellation_season, "113Y2S");
    assert_eq!(row.consecutive_no_cancellation_seasons, 0);
}

#[test]
fn test_prices_use_season_then_cumulative() {
    let rows = two_season_sample();
    assert_eq!(rows[1].avg_unit_price, 80.0);
    assert_eq!(rows[1].avg_area, 25.0);
    assert_eq!(rows[1].avg_total_price, 2000.0);

    // No transactions in 113Y2S: falls back to the cumulative mean
    let clean: Vec<TransactionRecord> = (0..5).map(|_| txn("B", "113Y1S")).collect();
    let rows = build(&[project("B", 50, "113Y1S")], &clean, &["113Y2S"], date(2024, 12, 31));
    assert_eq!(rows[0].season_transactions, 0);
    assert_eq!(rows[0].avg_unit_price, 80.0);
}

#[test]
fn test_out_of_range_price_becomes_zero() {
    let clean: Vec<TransactionRecord> = (0..3)
        .map(|_| TransactionRecord { unit_price: Some(450.0), ..txn("C", "113Y1S") })
        .collect();
    let rows = build(&[project("C", 50, "113Y1S")], &clean, &["113Y1S"], date(2024, 12, 31));
    assert_eq!(rows[0].avg_unit_price, 0.0);
    assert_eq!(rows[0].avg_total_price, 2000.0);
}

#[test]
fn test_complete_season_flag() {
    let rows = two_season_sample();
    // Start season with 91 sales days and transactions
    assert_eq!(rows[0].complete_season, "Y");
    assert_eq!(rows[0].sales_days, 91);
    assert_eq!(rows[1].complete_season, "Y");

    // Start season only 46 days into the quarter
    let clean: Vec<TransactionRecord> = (0..4).map(|_| txn("D", "113Y4S")).collect();
    let rows = build(&[project("D", 40, "113Y4S")], &clean, &["113Y4S"], date(2024, 11, 15));
    assert_eq!(rows[0].sales_days, 46);
    assert_eq!(rows[0].complete_season, "N");

    // Start season without transactions
    let rows = build(&[project("E", 40, "113Y3S")], &[], &["113Y3S"], date(2024, 12, 31));
    assert_eq!(rows[0].complete_season, "N");
}

#[test]
fn test_quality_check_flags_inconsistencies() {
    let mut rows = two_season_sample();
    let clean = report_quality_check(&rows);
    assert!(clean.passes(), "{:?}", clean.issues);
    assert_eq!(clean.clean_row_rate, 100.0);

    rows[0].net_rate = rows[0].gross_rate + 5.0;
    rows[1].name = String::new();
    rows[1].season_transactions = rows[1].cumulative_transactions + 1;
    let q = report_quality_check(&rows);
    assert!(!q.passes());
    assert_eq!(q.net_above_gross, 1);
    assert_eq!(q.quarterly_above_cumulative, 1);
    assert_eq!(q.missing_fields.get("社區名稱"), Some(&1));
    assert_eq!(q.clean_row_rate, 0.0);
}

#[test]
fn test_quality_check_ranges() {
    let mut rows = two_season_sample();
    rows[0].gross_rate = 130.0;
    rows[1].total_units = 0;
    let q = report_quality_check(&rows);
    assert_eq!(q.out_of_range.get("毛去化率(%)"), Some(&1));
    assert_eq!(q.out_of_range.get("總戶數"), Some(&1));
}

#[test]
fn test_summarize_report() {
    let rows = two_season_sample();
    let s = summarize_report(&rows);
    assert_eq!(s.total_rows, 2);
    assert_eq!(s.projects, 1);
    assert_eq!(s.counties, 1);
    assert_eq!(s.by_season["113Y2S"].rows, 1);
    assert_eq!(s.by_season["113Y2S"].mean_net_rate, 18.0);
    assert_eq!(s.projects_with_cancellations, 1);
    // 9.09% cumulative cancellation
    assert_eq!(s.high_risk_count, 1);
    assert_eq!(s.stage_distribution.values().sum::<usize>(), 2);
    assert_eq!(s.fast_rows, 2);
}

#[test]
fn test_csv_header_order() {
    let rows = two_season_sample();
    let csv = to_csv_string(&rows).unwrap();
    let header: Vec<&str> = csv.lines().next().unwrap().split(',').collect();
    assert_eq!(header.len(), 32);
    assert_eq!(&header[..8], &["備查編號", "社區名稱", "縣市", "行政區", "坐落街道", "總戶數", "銷售起始年季", "年季"]);
    assert_eq!(header[18], "毛去化率(%)");
    assert_eq!(header[31], "是否完整季");
    assert_eq!(csv.lines().count(), 3);
}
