//! Integration tests for the presale pipeline
//!
//! Each test writes small registry exports into a `TempDir`, runs the
//! pipeline end to end and checks the written reports.

use presale_analytics::analysis::loader::LoadError;
use presale_analytics::analysis::{ConfigError, Pipeline, PipelineConfig, RunStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const TRANSACTION_HEADER: &str =
    "備查編號,縣市,行政區,坐落街道,樓層,社區名稱,交易日期,交易年季,交易總價,建物單價,總面積,解約情形";
const PROJECT_HEADER: &str = "編號,社區名稱,縣市,行政區,坐落街道,戶數,銷售起始年季";

/// (code, county, district, street, community, season, count, first floor, cancellation)
type Batch<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, &'a str, usize, usize, &'a str);

fn transaction_rows(batches: &[Batch<'_>]) -> String {
    let mut lines = vec![TRANSACTION_HEADER.to_string()];
    for (code, county, district, street, name, season, count, first_floor, cancellation) in batches {
        let quarter: u32 = season[4..5].parse().unwrap();
        let date = format!("113{:02}15", (quarter - 1) * 3 + 1);
        for i in 0..*count {
            lines.push(format!(
                "{},{},{},{},{}F,{},{},{},2000,80,25,{}",
                code,
                county,
                district,
                street,
                first_floor + i,
                name,
                date,
                season,
                cancellation
            ));
        }
    }
    lines.join("\n")
}

fn transactions_csv() -> String {
    transaction_rows(&[
        ("P001", "台北市", "大安區", "復興南路", "大安苑", "113Y1S", 4, 1, ""),
        ("P001", "台北市", "大安區", "復興南路", "大安苑", "113Y2S", 3, 5, ""),
        ("P001", "台北市", "大安區", "復興南路", "大安苑", "113Y2S", 1, 8, "全部解約 1130520"),
        ("P001", "台北市", "大安區", "復興南路", "大安苑", "113Y3S", 2, 9, ""),
        ("P002", "台北市", "信義區", "松仁路", "信義天廈", "113Y2S", 5, 1, ""),
        ("P002", "台北市", "信義區", "松仁路", "信義天廈", "113Y3S", 4, 6, ""),
        ("P003", "新北市", "板橋區", "文化路", "板橋首璽", "113Y1S", 3, 1, ""),
        ("P003", "新北市", "板橋區", "文化路", "板橋首璽", "113Y4S", 2, 4, ""),
        ("X999", "新北市", "板橋區", "中山路", "中山新苑", "113Y3S", 3, 1, ""),
    ])
}

fn projects_csv() -> String {
    [
        PROJECT_HEADER,
        "P001,大安苑,台北市,大安區,復興南路,20,113Y1S",
        "P002,信義天廈,台北市,信義區,松仁路,30,113Y2S",
        "P003,板橋首璽,新北市,板橋區,文化路,10,113Y1S",
    ]
    .join("\n")
}

fn write_inputs(dir: &Path, transactions: &str) -> PipelineConfig {
    let transactions_path = dir.join("presale.csv");
    let projects_path = dir.join("projects.csv");
    fs::write(&transactions_path, transactions).unwrap();
    fs::write(&projects_path, projects_csv()).unwrap();

    let mut config = PipelineConfig::default();
    config.data_paths.pre_sale_data = transactions_path;
    config.data_paths.sale_data = projects_path;
    config.data_paths.output_dir = dir.join("output");
    config.data_paths.logs_dir = dir.join("logs");
    config.processing.parallel_workers = 2;
    config
}

fn row_net_rate(outcome: &presale_analytics::analysis::PipelineOutcome, code: &str, season: &str) -> f64 {
    outcome
        .community
        .iter()
        .find(|r| r.code == code && r.season == season)
        .map(|r| r.net_rate)
        .unwrap_or_else(|| panic!("no row for {} {}", code, season))
}

#[test]
fn test_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = write_inputs(dir.path(), &transactions_csv());
    let outcome = Pipeline::new(config).run().unwrap();

    assert!(outcome.passed(), "integrity failures: {:?}", outcome.integrity.failures().collect::<Vec<_>>());
    assert_eq!(outcome.summary.absorption_computed, outcome.community.len());
    assert_eq!(outcome.summary.estimated_projects, 1);
    assert_eq!(outcome.summary.counties, 2);
    assert_eq!(outcome.performance.stages.len(), 12);
    assert!(outcome.performance.stages.iter().all(|s| s.success));

    // 7 normal and 1 cancelled by 113Y2S over 20 units
    assert_eq!(row_net_rate(&outcome, "P001", "113Y2S"), 30.0);
    // P002 starts in 113Y2S
    assert!(!outcome.community.iter().any(|r| r.code == "P002" && r.season == "113Y1S"));
    // Estimated project from the unregistered code
    let estimated: Vec<_> = outcome.community.iter().filter(|r| r.code == "X999").collect();
    assert_eq!(estimated.len(), 2);
    assert_eq!(estimated[0].county, "新北市");

    let cities: Vec<&str> = outcome.cities.iter().map(|c| c.county.as_str()).collect();
    assert!(cities.contains(&"台北市") && cities.contains(&"新北市"));

    for path in &outcome.outputs {
        assert!(path.exists(), "missing output {}", path.display());
    }
    let output = dir.path().join("output");
    let community = fs::read_to_string(output.join("community_report.csv")).unwrap();
    assert!(community.starts_with('\u{feff}'));
    assert!(community.contains("備查編號"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(output.join("pipeline_summary.json")).unwrap()).unwrap();
    assert_eq!(summary["target_seasons"][0], "113Y1S");
    assert!(summary["run_id"].is_null());
    assert!(dir.path().join("logs").join("performance_report.txt").exists());
}

#[test]
fn test_pipeline_records_runs() {
    let dir = TempDir::new().unwrap();
    let mut config = write_inputs(dir.path(), &transactions_csv());
    let db = dir.path().join("runs.db");
    config.data_paths.run_db = Some(db.clone());

    let first = Pipeline::new(config.clone()).run().unwrap();
    let second = Pipeline::new(config).run().unwrap();
    let first_id = first.summary.run_id.clone().unwrap();
    let second_id = second.summary.run_id.clone().unwrap();
    assert_ne!(first_id, second_id);

    let store = RunStore::open(&db).unwrap();
    let runs = store.list_runs().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].config_fingerprint, runs[1].config_fingerprint);
    assert!(runs.iter().all(|r| r.integrity_passed && r.stages.len() == 12));

    let rows = store.load_community_rows(&first_id).unwrap();
    assert_eq!(rows, first.community);

    let deltas = store.compare_runs(&first_id, &second_id).unwrap();
    assert_eq!(deltas.len(), first.community.len());
    assert!(deltas.iter().all(|d| d.change() == Some(0.0)));
}

#[test]
fn test_pipeline_exports_charts() {
    let dir = TempDir::new().unwrap();
    let config = write_inputs(dir.path(), &transactions_csv());
    let outcome = Pipeline::new(config).with_chart_export(true).run().unwrap();

    let charts = dir.path().join("output").join("charts");
    let dashboard = fs::read_to_string(charts.join("dashboard.txt")).unwrap();
    assert!(dashboard.contains("縣市去化表現排名"));
    assert!(charts.join("risk_matrix.json").exists());
    assert!(outcome.outputs.contains(&charts.join("dashboard.txt")));
}

#[test]
fn test_missing_column_is_reported() {
    let dir = TempDir::new().unwrap();
    let without_cancellation: String = transactions_csv()
        .lines()
        .map(|line| line.rsplit_once(',').map_or(line, |(head, _)| head).to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let config = write_inputs(dir.path(), &without_cancellation);

    let err = Pipeline::new(config).run().unwrap_err();
    assert!(format!("{:#}", err).contains("01_load"));
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<LoadError>(), Some(LoadError::MissingColumns { .. }))));
}

#[test]
fn test_invalid_config_rejected() {
    let dir = TempDir::new().unwrap();
    let mut config = write_inputs(dir.path(), &transactions_csv());
    config.analysis.target_seasons.clear();

    let err = Pipeline::new(config).run().unwrap_err();
    assert!(err.chain().any(|c| c.downcast_ref::<ConfigError>() == Some(&ConfigError::NoTargetSeasons)));
    assert!(!dir.path().join("output").exists());
}

fn presale_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_presale"))
}

#[test]
fn test_cli_exit_codes() {
    let dir = TempDir::new().unwrap();
    let config = write_inputs(dir.path(), &transactions_csv());
    let config_path = dir.path().join("pipeline_config.toml");
    config.save(&config_path).unwrap();

    let status = Command::new(presale_binary())
        .args(["run", "--config"])
        .arg(&config_path)
        .args(["--season", "113Y4S"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));

    let status = Command::new(presale_binary())
        .args(["run", "--config"])
        .arg(dir.path().join("missing.toml"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}
