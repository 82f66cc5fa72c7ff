//! Absorption Report Tool
//!
//! Recomputes absorption, dynamics and risk for one project across its
//! season history, using the same stages as the full pipeline.
//!
//! Usage:
//!   cargo run --release --bin absorption_report -- --code LC0001234 --season 113Y4S
//!   cargo run --release --bin absorption_report -- --code LC0001234 --config pipeline_config.toml --json lc.json
//!
//! Exits 0 on success, 2 when the project is unknown or the inputs cannot
//! be loaded.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use presale_analytics::analysis::absorption::{calculate_all, validate_rates, AbsorptionResult};
use presale_analytics::analysis::dedup::{clean_transactions, resolve_duplicates};
use presale_analytics::analysis::dynamics::{analyze_dynamics, DynamicsRecord};
use presale_analytics::analysis::export::write_json;
use presale_analytics::analysis::loader::{load_projects, load_transactions};
use presale_analytics::analysis::matching::{
    build_project_index, estimate_missing_projects, match_projects, ProjectProfile,
};
use presale_analytics::analysis::season::season_sequence;
use presale_analytics::analysis::stage_risk::{assess_all, StageRiskRecord};
use presale_analytics::analysis::{PipelineConfig, YearSeason};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Recompute absorption for one presale project
#[derive(Parser, Debug)]
#[command(name = "absorption_report")]
#[command(about = "Season-by-season absorption of one presale project")]
struct Cli {
    /// Project code (備查編號)
    #[arg(long)]
    code: String,

    /// Pipeline config (TOML); supplies input paths and defaults
    #[arg(short, long, env = "PIPELINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[arg(long)]
    transactions: Option<PathBuf>,

    #[arg(long)]
    projects: Option<PathBuf>,

    /// Last season to report; defaults to the latest configured target
    #[arg(long)]
    season: Option<YearSeason>,

    #[arg(long)]
    analysis_date: Option<NaiveDate>,

    /// Also write the rows as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ProjectHistory<'a> {
    profile: &'a ProjectProfile,
    seasons: Vec<SeasonRow<'a>>,
}

#[derive(Debug, Serialize)]
struct SeasonRow<'a> {
    absorption: &'a AbsorptionResult,
    dynamics: Option<&'a DynamicsRecord>,
    risk: Option<&'a StageRiskRecord>,
    validation_errors: Vec<String>,
}

fn print_table(profile: &ProjectProfile, rows: &[SeasonRow<'_>]) {
    println!(
        "{} {} ({}{}), {} units, sales from {}{}",
        profile.code,
        profile.name,
        profile.county,
        profile.district,
        profile.total_units,
        profile.sales_start_season,
        if profile.has_complete_info { "" } else { " [estimated]" },
    );
    println!();
    println!(
        "{:<8} {:>5} {:>5} {:>8} {:>8} {:>8} {:>6} {:>7} {:>8} {:>5}  {:<10} {:<8} {:<8}",
        "season", "txns", "canc", "gross%", "net%", "adj%", "factor", "speed", "accel%", "eta", "grade", "stage", "risk"
    );
    for row in rows {
        let r = row.absorption;
        let (speed, accel, eta, grade) = row.dynamics.map_or((0.0, 0.0, String::from("-"), String::from("-")), |d| {
            (d.speed, d.acceleration.value, d.forecast.seasons.to_string(), d.efficiency.grade.display())
        });
        let (stage, risk) = row.risk.map_or(("-", "-"), |s| (s.stage.label(), s.comprehensive.level.label()));
        println!(
            "{:<8} {:>5} {:>5} {:>8.2} {:>8.2} {:>8.2} {:>6.3} {:>7.2} {:>8.2} {:>5}  {:<10} {:<8} {:<8}",
            r.target.to_string(),
            r.cumulative_transactions,
            r.cumulative_cancelled,
            r.gross_rate,
            r.net_rate,
            r.adjusted_rate,
            r.adjustment_factor,
            speed,
            accel,
            eta,
            grade,
            stage,
            risk,
        );
        for err in &row.validation_errors {
            println!("         ! {}", err);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::from_env(),
    };
    if let Some(path) = &cli.transactions {
        config.data_paths.pre_sale_data = path.clone();
    }
    if let Some(path) = &cli.projects {
        config.data_paths.sale_data = path.clone();
    }
    if let Some(date) = cli.analysis_date {
        config.analysis.analysis_date = date;
    }

    let transactions = load_transactions(&config.data_paths.pre_sale_data, config.processing.price_unit)?;
    let projects = load_projects(&config.data_paths.sale_data)?;

    let dedup = resolve_duplicates(&transactions.records);
    let clean = clean_transactions(&transactions.records, &dedup);
    let matched = match_projects(&projects.records, &clean);
    let estimates = estimate_missing_projects(&matched, &clean);
    let profiles = build_project_index(&projects.records, &estimates, &clean);

    let Some(profile) = profiles.get(&cli.code) else {
        bail!("Project {} not found in either export", cli.code);
    };
    let last = match cli.season {
        Some(s) => s,
        None => config
            .sorted_target_seasons()
            .last()
            .copied()
            .context("No target season configured")?,
    };
    if last < profile.sales_start_season {
        bail!("{} starts selling in {}, after {}", profile.code, profile.sales_start_season, last);
    }

    let records: Vec<_> = clean.iter().filter(|r| r.project_code == cli.code).cloned().collect();
    let requests: Vec<(String, YearSeason)> = season_sequence(profile.sales_start_season, last)
        .into_iter()
        .map(|s| (cli.code.clone(), s))
        .collect();
    let run = calculate_all(&profiles, &records, &requests, config.analysis.analysis_date);
    if let Some((_, season, err)) = run.errors.first() {
        bail!("Absorption failed at {}: {}", season, err);
    }
    let dynamics = analyze_dynamics(&run.results);
    let risks = assess_all(&run.results, &dynamics, &records);

    let rows: Vec<SeasonRow<'_>> = run
        .results
        .iter()
        .map(|r| SeasonRow {
            absorption: r,
            dynamics: dynamics.iter().find(|d| d.target == r.target),
            risk: risks.iter().find(|s| s.target == r.target),
            validation_errors: validate_rates(r).errors,
        })
        .collect();

    print_table(profile, &rows);

    if let Some(path) = &cli.json {
        write_json(path, &ProjectHistory { profile, seasons: rows })?;
        println!("\nWritten to {}", path.display());
    }
    Ok(())
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("presale_analytics=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(2);
    }
}
