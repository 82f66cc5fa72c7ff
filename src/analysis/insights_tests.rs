use super::aggregation::{aggregate_cities, aggregate_districts};
use super::community_report::CommunityReportRow;
use super::insights::*;

fn row(code: &str, district: &str, season: &str, txns: usize, cancels: usize, speed: f64) -> CommunityReportRow {
    let units = 100u32;
    let net = (txns - cancels) as f64 / units as f64 * 100.0;
    CommunityReportRow {
        code: code.to_string(),
        name: format!("{}社區", code),
        county: "台北市".to_string(),
        district: district.to_string(),
        street: "忠孝東路".to_string(),
        total_units: units,
        sales_start_season: "112Y1S".to_string(),
        season: season.to_string(),
        sales_seasons: 6,
        cumulative_transactions: txns,
        season_transactions: 3,
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
        speed,
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

fn risky_sample() -> Vec<CommunityReportRow> {
    let mut a = row("A", "大安區", "113Y2S", 50, 6, 2.0);
    a.cancellation_alert = "🔴 高風險".to_string();
    vec![a, row("B", "大安區", "113Y2S", 50, 0, 2.0), row("C", "信義區", "113Y2S", 40, 0, 1.0)]
}

fn with_levels<T>(community: &[CommunityReportRow], f: impl FnOnce(&InsightInputs<'_>) -> T) -> T {
    let districts = aggregate_districts(community);
    let cities = aggregate_cities(community, &districts);
    f(&InsightInputs { community, districts: &districts, cities: &cities })
}

#[test]
fn test_cancellation_trend_levels() {
    let community = risky_sample();
    let trend = with_levels(&community, cancellation_trend_analysis);

    assert_eq!(trend.seasons.len(), 1);
    let season = &trend.seasons[0];
    assert_eq!(season.high_cancellation_projects, 1);
    assert_eq!(season.high_risk_count, 1);
    assert!((season.max_cancellation_rate - 12.0).abs() < 1e-9);

    // one of three projects above 5%
    assert_eq!(trend.overall_risk_level, Level::High);
    assert_eq!(trend.trend, Trend::Stable);
    assert_eq!(trend.risk_concentration, vec![("台北市".to_string(), 1)]);
    assert_eq!(trend.market_impact.affected_projects, 1);
    assert_eq!(trend.market_impact.total_cancellations, 6);
    assert_eq!(trend.market_impact.economic_impact, Level::High);
    // too few rows for a correlation
    assert_eq!(trend.market_impact.correlation_with_absorption, 0.0);
    assert_eq!(trend.insights[0], "市場解約風險偏高，需要密切監控解約趨勢");
}

#[test]
fn test_cancellation_trend_direction() {
    let community = vec![
        row("A", "大安區", "113Y1S", 50, 0, 2.0),
        row("B", "大安區", "113Y1S", 50, 0, 2.0),
        row("A", "大安區", "113Y2S", 60, 6, 2.0),
        row("B", "大安區", "113Y2S", 60, 0, 2.0),
    ];
    let trend = with_levels(&community, cancellation_trend_analysis);
    assert_eq!(trend.seasons[0].high_cancellation_ratio, 0.0);
    assert_eq!(trend.seasons[1].high_cancellation_ratio, 50.0);
    assert_eq!(trend.trend, Trend::Increasing);
    assert!(trend.insights.iter().any(|i| i.contains("上升趨勢")));
}

#[test]
fn test_low_risk_market_gets_default_insight() {
    let community = vec![row("A", "大安區", "113Y2S", 50, 0, 2.0)];
    let trend = with_levels(&community, cancellation_trend_analysis);
    assert_eq!(trend.overall_risk_level, Level::Low);
    assert_eq!(trend.market_impact.economic_impact, Level::Low);
    assert_eq!(trend.insights, vec!["整體解約風險控制良好，市場狀況穩定".to_string()]);
}

#[test]
fn test_speed_categories_and_health() {
    let community = vec![
        row("A", "大安區", "113Y2S", 70, 0, 4.0),
        row("B", "大安區", "113Y2S", 70, 0, 2.0),
        row("C", "信義區", "113Y2S", 70, 0, 0.5),
        row("D", "信義區", "113Y2S", 70, 0, 0.0),
    ];
    let speed = with_levels(&community, absorption_speed_analysis);
    let categories = speed.categories.unwrap();
    assert_eq!(categories.high.count, 1);
    assert_eq!(categories.normal.count, 1);
    assert_eq!(categories.slow.count, 1);
    assert_eq!(speed.community_speed.count, 3);
    assert_eq!(speed.efficiency_distribution["⭐ 正常去化"], 4);

    // mean speed ≈ 2.17 → 2 points, mean net 70 → 3 points
    assert_eq!(speed.health_points, 5);
    assert_eq!(speed.market_health, MarketHealth::Excellent);

    // a single season has no trend
    assert!(speed.seasonal_trends.is_empty());
    assert!(speed.outlook.is_none());
    assert!(speed.clusters.is_empty());
}

#[test]
fn test_seasonal_outlook() {
    let community = vec![row("A", "大安區", "113Y1S", 20, 0, 1.0), row("A", "大安區", "113Y2S", 40, 0, 2.0)];
    let speed = with_levels(&community, absorption_speed_analysis);
    assert_eq!(speed.seasonal_trends.len(), 2);
    let change = speed.trend_change.as_ref().unwrap();
    assert_eq!(change.absorption_rate_change, 20.0);
    assert_eq!(change.period, "113Y1S → 113Y2S");
    assert_eq!(speed.outlook, Some(Outlook::Positive));
    assert_eq!(speed.outlook_reason.as_deref(), Some("去化率呈現上升趨勢"));
}

#[test]
fn test_clusters_label_groups() {
    let mut community = Vec::new();
    for i in 0..4 {
        community.push(row(&format!("H{}", i), "大安區", "113Y2S", 80, 0, 4.0));
        community.push(row(&format!("S{}", i), "大安區", "113Y2S", 45, 0, 1.5));
        community.push(row(&format!("R{}", i), "信義區", "113Y2S", 25, 2, 0.2));
    }
    let clusters = cluster_projects(&community);
    assert_eq!(clusters.len(), 3);
    assert!(clusters.iter().all(|c| c.size == 4));
    let mut labels: Vec<&str> = clusters.iter().map(|c| c.characteristics.as_str()).collect();
    labels.sort();
    let mut expected = vec!["高效表現群", "穩定表現群", "風險關注群"];
    expected.sort();
    assert_eq!(labels, expected);
}

#[test]
fn test_classify_cluster() {
    assert_eq!(classify_cluster(65.0, 2.5, 0.0), "高效表現群");
    assert_eq!(classify_cluster(45.0, 1.0, 0.0), "穩定表現群");
    assert_eq!(classify_cluster(20.0, 0.5, 4.0), "風險關注群");
    assert_eq!(classify_cluster(20.0, 0.5, 1.0), "一般表現群");
}

#[test]
fn test_efficiency_score_and_buckets() {
    assert!((efficiency_score(50.0, 2.0, 10.0, 1.0) - 59.0).abs() < 1e-9);
    assert_eq!(size_bucket(0), None);
    assert_eq!(size_bucket(50), Some("小型(≤50)"));
    assert_eq!(size_bucket(51), Some("中型(51-100)"));
    assert_eq!(size_bucket(200), Some("大型(101-200)"));
    assert_eq!(size_bucket(201), Some("超大型(>200)"));
}

#[test]
fn test_efficiency_ranking() {
    let community = risky_sample();
    let ranking = with_levels(&community, efficiency_ranking_analysis);
    assert_eq!(ranking.city_ranking.len(), 1);
    assert_eq!(ranking.city_ranking[0].ranking, 1);
    let districts = &ranking.district_ranking["台北市"];
    assert_eq!(districts.len(), 2);
    assert_eq!(districts[0].county_ranking, 1);
    assert!(districts[0].score >= districts[1].score);
    assert_eq!(ranking.size_impact.len(), 1);
    assert_eq!(ranking.size_impact[0].group, "中型(51-100)");
    assert_eq!(ranking.district_competition.len(), 2);
    // one county only
    assert!(ranking.city_competition.is_empty());
    assert!(ranking.absorption_benchmark.is_some());
}

#[test]
fn test_market_health_score_and_grade() {
    assert_eq!(market_health_score(65.0, 0.5, 25.0, 2.0), 100);
    assert_eq!(market_health_grade(100), "🏆 優秀");
    assert_eq!(market_health_score(30.0, 1.5, 7.0, 8.0), 63);
    assert_eq!(market_health_grade(63), "🥈 普通");
    assert_eq!(market_health_score(10.0, 5.0, 0.0, 20.0), 22);
    assert_eq!(market_health_grade(22), "⚠️ 需改善");
}

#[test]
fn test_market_insights_and_policy() {
    let community = risky_sample();
    let report = with_levels(&community, generate_insights);
    let market = &report.market;

    assert_eq!(market.overall.total_projects, 3);
    // net ≈ 44.7 → 30, cancellation 4% → 5, completion 0 → 5, high-risk 33% → 2
    assert_eq!(market.overall.market_health_score, 42);
    assert!(market.key_findings[0].starts_with("市場去化表現中等"));
    assert!(market.risk_warnings.contains(&"發現1個建案解約率超過10%，需密切監控".to_string()));

    let supply = market.supply_demand.as_ref().unwrap();
    assert_eq!(supply.total_supply, 300);
    assert_eq!(supply.effective_demand, 134);
    assert_eq!(supply.market_balance, MarketBalance::Balanced);
    assert!(market.seasonality.is_none());
    assert!(market.recommendations[0].starts_with("市場健康度偏低"));
    assert!(market.recommendations.iter().any(|r| r.starts_with("解約風險管控")));
    assert!(market.recommendations.last().unwrap().starts_with("政策配套建議"));

    let policy = &report.policy;
    assert_eq!(policy.regulatory_measures.len(), 6);
    assert!(policy.regulatory_measures[0].starts_with("建立預售屋解約率上限管制機制"));
    assert_eq!(policy.market_supervision.len(), 9);
    assert_eq!(policy.risk_management.len(), 9);
    assert_eq!(policy.roadmap.len(), 3);
    assert_eq!(policy.roadmap[0].period, "短期 (3-6個月)");

    assert_eq!(report.dashboard.risk_gauge.value, 3.0);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"overall_risk_level\":\"HIGH\""));
}

#[test]
fn test_hotspot_classes() {
    let community = vec![
        row("A", "信義區", "113Y2S", 80, 0, 3.0),
        row("B", "大安區", "113Y2S", 50, 0, 1.0),
        row("C", "萬華區", "113Y2S", 20, 0, 0.5),
        row("D", "中山區", "113Y2S", 60, 0, 2.5),
    ];
    let hotspots = with_levels(&community, hotspot_analysis);
    assert!((hotspots.rate_threshold - 65.0).abs() < 1e-9);
    assert_eq!(hotspots.ranked[0].district, "信義區");
    assert_eq!(hotspots.ranked[0].class, HotspotClass::Hot);
    assert_eq!(hotspots.ranked[0].class.label(), "🔥 熱點區域");
    assert_eq!(hotspots.hotspots.len(), 1);
    assert_eq!(hotspots.cold_spots.len(), 1);
    assert_eq!(hotspots.cold_spots[0].district, "萬華區");
    assert_eq!(hotspots.ranked.last().unwrap().district, "萬華區");
}

#[test]
fn test_three_level_comparison() {
    let community = risky_sample();
    let comparison = with_levels(&community, three_level_comparison);
    assert_eq!(comparison.rows.len(), 1);
    let row = &comparison.rows[0];
    assert_eq!(row.county, "台北市");
    // (44 + 50 + 40) / 3
    assert!((row.net_rate.community_mean - 134.0 / 3.0).abs() < 1e-9);
    assert_eq!(comparison.community_risk.high, 1);
    assert_eq!(comparison.community_risk.low, 2);
    let city = comparison.city_risk;
    assert_eq!(city.high + city.medium + city.low, 1);
}

#[test]
fn test_risk_dashboard_datasets() {
    let community = risky_sample();
    let dashboard = with_levels(&community, |inputs| {
        let cancellation = cancellation_trend_analysis(inputs);
        let speed = absorption_speed_analysis(inputs);
        risk_dashboard(inputs, &cancellation, &speed)
    });
    assert_eq!(dashboard.risk_matrix.len(), 1);
    assert_eq!(dashboard.risk_matrix[0].scores.len(), 2);
    assert_eq!(dashboard.cancellation_trend.len(), 1);
    assert_eq!(dashboard.absorption_vs_cancellation.len(), 3);
    assert_eq!(dashboard.risk_concentration[0].value, 1.0);
    // 大安區: 6 of 100 transactions cancelled
    assert_eq!(dashboard.high_risk_districts.len(), 1);
    assert_eq!(dashboard.high_risk_districts[0].label, "台北市-大安區");
    assert_eq!(dashboard.health_gauge.max, 4.0);
}
