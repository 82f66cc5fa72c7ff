use super::fixtures::{cancelled, season, txn};
use super::stage_risk::*;
use crate::analysis::records::TransactionRecord;

#[test]
fn test_sales_stage_boundaries() {
    assert_eq!(sales_stage(100.0, 3), SalesStage::SoldOut);
    assert_eq!(sales_stage(92.0, 1), SalesStage::Closing);
    assert_eq!(sales_stage(10.0, 2), SalesStage::Opening);
    assert_eq!(sales_stage(50.0, 5), SalesStage::Stable);
    assert_eq!(sales_stage(85.0, 5), SalesStage::Closing);
    assert_eq!(sales_stage(60.0, 9), SalesStage::MidLateAdjustment);
    assert_eq!(SalesStage::from_label("尾盤清售"), Some(SalesStage::Closing));
}

#[test]
fn test_stage_performance_tables() {
    let p = stage_performance(SalesStage::Opening, 35.0, 3.5, 2);
    assert_eq!((p.level, p.score), (PerformanceLevel::Good, 85.0));
    assert_eq!(p.benchmark, "優於市場平均");
    assert_eq!(p.display(), "🟢 good");

    // expected 36% after 3 seasons
    let p = stage_performance(SalesStage::Stable, 30.0, 1.0, 3);
    assert_eq!((p.level, p.score), (PerformanceLevel::Normal, 60.0));
    assert_eq!(p.benchmark, "符合市場預期");

    let p = stage_performance(SalesStage::MidLateAdjustment, 40.0, 3.0, 8);
    assert_eq!((p.level, p.score), (PerformanceLevel::Poor, 30.0));
    assert_eq!(p.benchmark, "低於市場標準");

    assert_eq!(stage_performance(SalesStage::SoldOut, 100.0, 0.0, 10).score, 80.0);
    assert_eq!(stage_performance(SalesStage::Closing, 95.0, 1.2, 10).score, 70.0);
}

#[test]
fn test_cancellation_metrics_and_consecutive_seasons() {
    let mut old = cancelled("A", "113Y1S");
    old.cancellation_text = "全部解約1130210".to_string();
    let records: Vec<TransactionRecord> = vec![old, txn("A", "113Y1S"), txn("A", "113Y3S"), txn("A", "113Y4S")];
    let refs: Vec<&TransactionRecord> = records.iter().collect();

    let m = cancellation_metrics(&refs, season("113Y4S"), 4);
    assert_eq!(m.cumulative_records, 4);
    assert_eq!(m.cumulative_count, 1);
    assert_eq!(m.cumulative_rate, 25.0);
    assert_eq!(m.season_records, 1);
    assert_eq!(m.season_rate, 0.0);
    assert_eq!(m.latest_cancellation_season, Some(season("113Y1S")));
    // 113Y2S and 113Y3S without cancellations
    assert_eq!(m.consecutive_no_cancellation_seasons, 2);

    let clean: Vec<&TransactionRecord> = refs[1..].to_vec();
    let m = cancellation_metrics(&clean, season("113Y4S"), 4);
    assert_eq!(m.latest_cancellation_season, None);
    assert_eq!(m.consecutive_no_cancellation_seasons, 4);
}

#[test]
fn test_cancellation_risk_scoring() {
    let none = cancellation_risk(&CancellationMetrics::default());
    assert_eq!(none.level, RiskLevel::Low);
    assert_eq!(none.score, 10.0);

    let m = CancellationMetrics {
        cumulative_records: 50,
        cumulative_count: 6,
        cumulative_rate: 12.0,
        season_records: 10,
        season_count: 3,
        season_rate: 30.0,
        latest_cancellation_season: Some(season("113Y2S")),
        consecutive_no_cancellation_seasons: 0,
    };
    // 40 + 30 + 10 + 10
    let risk = cancellation_risk(&m);
    assert_eq!(risk.score, 90.0);
    assert_eq!(risk.level, RiskLevel::High);
    assert_eq!(risk.factors.len(), 4);
    assert_eq!(risk.level.display(), "🔴 高風險");

    let mild = CancellationMetrics {
        cumulative_records: 40,
        cumulative_count: 1,
        cumulative_rate: 2.5,
        consecutive_no_cancellation_seasons: 1,
        ..Default::default()
    };
    // 10 + 5
    assert_eq!(cancellation_risk(&mild).score, 15.0);
}

#[test]
fn test_stagnation_risk() {
    let r = stagnation_risk(14, 40.0, &[0.2, 0.3, 0.1, 0.4]);
    // 20 + 25 + 25 + 15
    assert_eq!(r.score, 85.0);
    assert!(r.is_long_term);
    assert_eq!(r.level, StagnationRiskLevel::High);
    assert_eq!(r.urgency, InterventionUrgency::Immediate);

    let healthy = stagnation_risk(4, 85.0, &[3.0, 4.0]);
    assert_eq!(healthy.score, 0.0);
    assert_eq!(healthy.level, StagnationRiskLevel::Normal);

    // no speed history counts as zero speed
    let r = stagnation_risk(9, 75.0, &[]);
    assert_eq!(r.score, 10.0 + 5.0 + 25.0);
    assert_eq!(r.level, StagnationRiskLevel::Low);
}

#[test]
fn test_comprehensive_risk() {
    let r = comprehensive_risk(Some(30.0), Some(80.0), Some(80.0), Some(20.0));
    // 17.5 + 20 + 20 + 20
    assert_eq!(r.score, 77.5);
    assert_eq!(r.level, ComprehensiveLevel::Critical);
    assert_eq!(r.factors.len(), 4);

    let r = comprehensive_risk(None, None, None, None);
    assert_eq!(r.score, 35.0);
    assert_eq!(r.level, ComprehensiveLevel::Low);
    assert_eq!(r.factors, vec!["風險控制良好"]);

    let r = comprehensive_risk(Some(95.0), Some(10.0), Some(0.0), Some(100.0));
    assert_eq!(r.level, ComprehensiveLevel::Monitor);
}
