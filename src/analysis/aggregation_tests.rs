use super::aggregation::*;
use super::community_report::CommunityReportRow;
use super::stage_risk::RiskLevel;

fn row(code: &str, district: &str, units: u32, txns: usize, cancels: usize) -> CommunityReportRow {
    let net = (txns - cancels) as f64 / units as f64 * 100.0;
    CommunityReportRow {
        code: code.to_string(),
        name: format!("{}社區", code),
        county: "台北市".to_string(),
        district: district.to_string(),
        street: "復興南路".to_string(),
        total_units: units,
        sales_start_season: "112Y1S".to_string(),
        season: "113Y2S".to_string(),
        sales_seasons: 6,
        cumulative_transactions: txns,
        season_transactions: 4,
        sales_days: 91,
        cumulative_cancellations: cancels,
        season_cancellations: 0,
        season_cancellation_rate: 0.0,
        cumulative_cancellation_rate: if txns == 0 { 0.0 } else { cancels as f64 / txns as f64 * 100.0 },
        latest_cancellation_season: String::new(),
        consecutive_no_cancellation_seasons: 6,
        gross_rate: txns as f64 / units as f64 * 100.0,
        net_rate: net,
        adjusted_rate: net,
        speed: 2.0,
        acceleration: 0.0,
        estimated_seasons: 10,
        efficiency_grade: "⭐ 正常去化".to_string(),
        avg_unit_price: 80.0,
        avg_area: 25.0,
        avg_total_price: 2000.0,
        stage: "穩定銷售期".to_string(),
        stage_performance: "🟡 normal".to_string(),
        cancellation_alert: "🟢 低風險".to_string(),
        complete_season: "Y".to_string(),
    }
}

#[test]
fn test_classify_risk_level() {
    assert_eq!(classify_risk_level(8), RiskLevel::High);
    assert_eq!(classify_risk_level(7), RiskLevel::High);
    assert_eq!(classify_risk_level(4), RiskLevel::Medium);
    assert_eq!(classify_risk_level(3), RiskLevel::Low);
    assert_eq!(classify_risk_level(0).display(), "🟢 低風險");
}

#[test]
fn test_district_totals_and_rates() {
    let community = vec![row("A", "大安區", 100, 60, 2), row("B", "大安區", 50, 20, 0)];
    let districts = aggregate_districts(&community);
    assert_eq!(districts.len(), 1);
    let d = &districts[0];
    assert_eq!(d.active_projects, 2);
    assert_eq!(d.stagnant_projects, 0);
    assert_eq!(d.total_units, 150);
    assert_eq!(d.total_transactions, 80);
    assert_eq!(d.total_cancellations, 2);
    // (80 - 2) / 150
    assert_eq!(d.net_rate, 52.0);
    assert_eq!(d.cancellation_rate, 2.5);
    // 2.5% > 1.5 → 1 point
    assert_eq!(d.cancellation_risk, "🟢 低風險");
    assert_eq!(d.avg_speed, 2.0);
    assert_eq!(d.weighted_unit_price, 80.0);
    assert_eq!(d.dominant_stage, "穩定銷售期");
    assert_eq!(d.efficiency_rank, "第1名");
    assert_eq!(d.trend, "⚠️ 去化停滯");
}

#[test]
fn test_stagnant_projects_split_from_normal() {
    let mut stuck = row("S", "大安區", 100, 20, 0);
    stuck.sales_seasons = 14;
    let community = vec![row("A", "大安區", 100, 80, 0), stuck];
    let d = &aggregate_districts(&community)[0];
    assert_eq!(d.stagnant_projects, 1);
    assert_eq!(d.normal_active_projects, 1);
    assert_eq!(d.stagnant_impact, 50.0);
    assert_eq!(d.net_rate, 50.0);
    assert_eq!(d.normal_net_rate, 80.0);
}

#[test]
fn test_speed_is_unit_weighted() {
    let mut fast = row("A", "大安區", 300, 30, 0);
    fast.speed = 4.0;
    let mut slow = row("B", "大安區", 100, 10, 0);
    slow.speed = 0.0;
    let mut mid = row("C", "大安區", 100, 10, 0);
    mid.speed = 1.0;
    let d = &aggregate_districts(&[fast, slow, mid])[0];
    // (4 × 300 + 1 × 100) / 400, zero-speed project excluded
    assert_eq!(d.avg_speed, 3.25);
}

#[test]
fn test_high_cancellation_district() {
    let community = vec![row("A", "信義區", 100, 50, 5), row("B", "信義區", 100, 50, 4)];
    let d = &aggregate_districts(&community)[0];
    // 9% rate → 3, 100% of projects above 5% → 2
    assert_eq!(d.cancellation_risk, "🟡 中風險");
    assert!((d.cancellation_rate - 9.0).abs() < 1e-9);
}

#[test]
fn test_ranking_within_county_season() {
    let mut strong = row("A", "信義區", 100, 80, 0);
    strong.speed = 5.0;
    let weak = row("B", "萬華區", 100, 10, 0);
    let districts = aggregate_districts(&[weak, strong]);
    let by_name = |name: &str| districts.iter().find(|d| d.district == name).unwrap();
    assert_eq!(by_name("信義區").efficiency_rank, "第1名");
    assert_eq!(by_name("萬華區").efficiency_rank, "第2名");
    assert_eq!(by_name("萬華區").rank(), Some(2));
    assert!(district_efficiency_score(by_name("信義區")) > district_efficiency_score(by_name("萬華區")));
}

#[test]
fn test_city_rollup() {
    let mut sold = row("C", "信義區", 50, 50, 0);
    sold.sales_start_season = "113Y2S".to_string();
    let community = vec![row("A", "大安區", 100, 60, 2), row("B", "大安區", 50, 20, 0), sold];
    let districts = aggregate_districts(&community);
    let cities = aggregate_cities(&community, &districts);
    assert_eq!(cities.len(), 1);
    let c = &cities[0];
    assert_eq!(c.active_districts, 2);
    assert_eq!(c.total_projects, 3);
    assert_eq!(c.new_projects, 1);
    assert_eq!(c.sold_out_projects, 1);
    assert_eq!(c.total_units, 200);
    assert_eq!(c.total_transactions, 130);
    assert_eq!(c.net_rate, 64.0);
    assert_eq!(c.high_risk_districts, 0);
    assert_eq!(c.price_change, 0.0);
    assert!(c.hotspot_districts.contains("信義區"));
    assert!(c.hotspot_districts.contains('、'));
    // speed 2 → 30, mean net ≈ 66 → 30, one of three sold out → 30
    assert_eq!(c.performance_score, 90);
    assert_eq!(c.performance_grade, "🏆 優秀表現");
}

#[test]
fn test_city_price_change_uses_previous_season() {
    let q1 = CommunityReportRow { season: "113Y1S".to_string(), avg_unit_price: 80.0, ..row("A", "大安區", 100, 40, 0) };
    let q2 = CommunityReportRow { avg_unit_price: 88.0, ..row("A", "大安區", 100, 60, 0) };
    let community = vec![q1, q2];
    let districts = aggregate_districts(&community);
    let cities = aggregate_cities(&community, &districts);
    assert_eq!(cities.len(), 2);
    assert_eq!(cities[0].season, "113Y1S");
    assert_eq!(cities[0].price_change, 0.0);
    assert_eq!(cities[1].price_change, 10.0);
}

#[test]
fn test_performance_grades() {
    assert_eq!(city_performance_grade(80), "🏆 優秀表現");
    assert_eq!(city_performance_grade(65), "🥇 良好表現");
    assert_eq!(city_performance_grade(45), "🥈 普通表現");
    assert_eq!(city_performance_grade(44), "🥉 待改善表現");
    assert_eq!(city_performance_score(0.5, 10.0, 0.0), 15);
}

#[test]
fn test_consistency_passes_on_own_output() {
    let community = vec![
        row("A", "大安區", 100, 60, 2),
        row("B", "大安區", 50, 20, 0),
        row("C", "信義區", 80, 30, 1),
    ];
    let districts = aggregate_districts(&community);
    let cities = aggregate_cities(&community, &districts);
    let report = validate_consistency(&community, &districts, &cities);
    assert!(report.passes());
    assert_eq!(report.overall_score, 100.0);
    assert!(report.recommendations.is_empty());
    assert_eq!(report.coverage.by_season["113Y2S"].communities, 3);
    assert_eq!(report.coverage.by_season["113Y2S"].districts, 2);
    assert_eq!(report.coverage.by_season["113Y2S"].cities, 1);
}

#[test]
fn test_consistency_detects_tampering() {
    let community = vec![row("A", "大安區", 100, 60, 2), row("B", "信義區", 50, 20, 0)];
    let mut districts = aggregate_districts(&community);
    let cities = aggregate_cities(&community, &districts);
    districts[0].total_cancellations += 3;
    districts[0].net_rate += 10.0;

    let report = validate_consistency(&community, &districts, &cities);
    assert_eq!(report.community_to_district.issues_found, 1);
    assert_eq!(report.community_to_district.pass_rate, 50.0);
    assert_eq!(report.aggregation_accuracy.issues_found, 1);
    assert!(!report.passes());
    assert!(!report.recommendations.is_empty());
}
