use super::cancellation::*;
use super::fixtures::{cancelled, date, season, txn};
use std::collections::HashMap;

#[test]
fn test_parse_normal_and_kinds() {
    assert_eq!(parse_cancellation("").kind, CancellationKind::Normal);
    assert_eq!(parse_cancellation("  ").kind, CancellationKind::Normal);
    assert_eq!(parse_cancellation("1130401全部解約").kind, CancellationKind::Full);
    assert_eq!(parse_cancellation("部分解約1130115").kind, CancellationKind::Partial);
    assert_eq!(parse_cancellation("已解約").kind, CancellationKind::Other);
}

#[test]
fn test_parse_dates_in_all_widths() {
    let info = parse_cancellation("全部解約 20240320;1130115;130701");
    // 130701 is ROC 13 = 1924, outside the accepted range
    assert_eq!(info.dates, vec![date(2024, 1, 15), date(2024, 3, 20)]);
    assert_eq!(info.count(), 2);
    assert_eq!(info.earliest(), Some(date(2024, 1, 15)));
    assert_eq!(info.latest(), Some(date(2024, 3, 20)));
    assert_eq!(info.seasons, vec![season("113Y1S")]);
}

#[test]
fn test_parse_rejects_impossible_dates() {
    let info = parse_cancellation("全部解約1131301 1130230");
    assert!(info.dates.is_empty());
    assert!(info.is_cancelled());
}

#[test]
fn test_parse_reads_fullwidth_digits() {
    let info = parse_cancellation("全部解約１１３０４０１");
    assert_eq!(info.kind, CancellationKind::Full);
    assert_eq!(info.dates, vec![date(2024, 4, 1)]);
    assert_eq!(info.seasons, vec![season("113Y2S")]);

    let info = parse_cancellation("部分解約 1130115；１１３０３２０");
    assert_eq!(info.dates, vec![date(2024, 1, 15), date(2024, 3, 20)]);
}

#[test]
fn test_parse_mixed_width_digits_does_not_panic() {
    // 12１456 reads as 121456, which is not a valid date
    let info = parse_cancellation("全部解約12１456");
    assert_eq!(info.kind, CancellationKind::Full);
    assert!(info.dates.is_empty());

    let info = parse_cancellation("全部解約11３0401");
    assert_eq!(info.dates, vec![date(2024, 4, 1)]);
}

#[test]
fn test_parse_ignores_runs_of_other_lengths() {
    assert!(parse_cancellation("全部解約 113040112").dates.is_empty());
    assert!(parse_cancellation("全部解約 11304").dates.is_empty());
    assert!(parse_cancellation("全部解約 1130001 1130432 1130400").dates.is_empty());
    let info = parse_cancellation("全部解約 12345 1130401 1234567890");
    assert_eq!(info.dates, vec![date(2024, 4, 1)]);
}

#[test]
fn test_rates_by_axis() {
    let mut big = txn("B", "113Y2S");
    big.total_price = Some(12000.0);
    big.unit_price = Some(200.0);
    let records = vec![txn("A", "113Y1S"), cancelled("A", "113Y1S"), big];
    let units: HashMap<String, u32> = [("A".to_string(), 40), ("B".to_string(), 600)].into();

    let rates = cancellation_rates(&records, &units);
    assert_eq!(rates.by_county.len(), 1);
    assert_eq!(rates.by_county[0].total, 3);
    assert_eq!(rates.by_county[0].cancelled, 1);

    let q1 = rates.by_season.iter().find(|r| r.key == "113Y1S").unwrap();
    assert!((q1.rate - 50.0).abs() < 1e-9);

    let small = rates.by_units.iter().find(|r| r.key == units_bucket(40)).unwrap();
    assert_eq!(small.total, 2);
    assert!(rates.by_units.iter().any(|r| r.key == "超大型(>500戶)"));
    assert!(rates.by_total_price.iter().any(|r| r.key == ">1億"));
    assert!(rates.by_unit_price.iter().any(|r| r.key == ">150萬"));
}

#[test]
fn test_buckets_are_right_inclusive() {
    assert_eq!(units_bucket(50), "小型(≤50戶)");
    assert_eq!(units_bucket(51), "中型(51-100戶)");
    assert_eq!(total_price_bucket(1000.0), "≤1000萬");
    assert_eq!(total_price_bucket(1000.5), "1000-2000萬");
    assert_eq!(unit_price_bucket(150.0), "100-150萬");
}

#[test]
fn test_intervals_drop_out_of_range() {
    let mut a = cancelled("A", "113Y1S");
    a.transaction_date = Some(date(2024, 1, 1));
    a.cancellation_text = "全部解約1130131".to_string();
    let mut b = cancelled("B", "113Y1S");
    b.transaction_date = Some(date(2024, 3, 1));
    b.cancellation_text = "全部解約1130101".to_string();
    let mut c = cancelled("C", "113Y1S");
    c.transaction_date = Some(date(2024, 1, 1));
    c.cancellation_text = "部分解約1130110 1130120".to_string();

    let records = vec![a, b, c];
    let parsed = parse_all(&records);
    let intervals = cancellation_intervals(&records, &parsed);

    assert_eq!(intervals.transaction_to_cancellation.count, 2);
    assert_eq!(intervals.transaction_to_cancellation.max, 30.0);
    assert_eq!(intervals.discarded, 1);
    assert_eq!(intervals.multi_cancellation_span.count, 1);
    assert_eq!(intervals.multi_cancellation_span.max, 10.0);
}

#[test]
fn test_risk_score_components() {
    // 2000萬 -> 10, 80萬/坪 -> 15, 台北市 -> 20, 113Y1S -> 15, 住家用 -> 5
    let rec = txn("A", "113Y1S");
    assert_eq!(transaction_risk_score(&rec), 65);
    assert_eq!(TransactionRiskLevel::from_score(65), TransactionRiskLevel::High);

    let mut cheap = txn("A", "110Y1S");
    cheap.total_price = Some(800.0);
    cheap.unit_price = Some(30.0);
    cheap.county = "花蓮縣".to_string();
    cheap.usage = "住宅".to_string();
    assert_eq!(transaction_risk_score(&cheap), 5 + 5 + 5 + 5 + 10);
    assert_eq!(TransactionRiskLevel::from_score(30), TransactionRiskLevel::VeryLow);

    let mut top = txn("A", "113Y1S");
    top.total_price = Some(9000.0);
    top.unit_price = Some(200.0);
    top.usage = "住宅".to_string();
    assert_eq!(transaction_risk_score(&top), 95);
}

#[test]
fn test_risk_model_effective_when_high_scores_cancel_more() {
    let mut risky = cancelled("A", "113Y1S");
    risky.total_price = Some(9000.0);
    risky.unit_price = Some(200.0);
    let mut safe = txn("B", "110Y1S");
    safe.total_price = Some(500.0);
    safe.unit_price = Some(20.0);
    safe.county = "花蓮縣".to_string();

    let validation = validate_risk_model(&[risky, safe]);
    assert!((validation.high_risk_rate - 100.0).abs() < 1e-9);
    assert_eq!(validation.low_risk_rate, 0.0);
    assert!(validation.model_effective);
}

#[test]
fn test_analyze_counts_kinds_and_cancellation_seasons() {
    let mut c = cancelled("A", "113Y1S");
    c.cancellation_text = "全部解約1130415".to_string();
    let records = vec![txn("A", "113Y1S"), c];
    let parsed = parse_all(&records);
    let analysis = analyze_cancellations(&records, &parsed, &HashMap::new());

    assert_eq!(analysis.cancelled_transactions, 1);
    assert!((analysis.cancellation_rate - 50.0).abs() < 1e-9);
    assert_eq!(analysis.kind_counts.get("全部解約"), Some(&1));
    assert_eq!(analysis.by_cancellation_season.get("113Y2S"), Some(&1));
    assert!(analysis.rates.by_units.is_empty());
}
