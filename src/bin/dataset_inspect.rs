//! Dataset Inspection Tool
//!
//! Explores the raw transaction and project exports before a pipeline run:
//! required columns, key-field completeness, code overlap, regional spread
//! and price distributions.
//!
//! Usage:
//!   cargo run --release --bin dataset_inspect -- --transactions data/raw/lvr_presale.csv --projects data/raw/lvr_sale_data.csv
//!   cargo run --release --bin dataset_inspect -- --transactions t.csv --projects p.csv --json exploration.json
//!
//! Exits 0 when the exports pass the completeness gate, 1 when they do not
//! and 2 when they cannot be loaded.

use anyhow::Result;
use clap::Parser;
use presale_analytics::analysis::exploration::{explore, CompletenessReport, ExplorationReport};
use presale_analytics::analysis::export::write_json;
use presale_analytics::analysis::loader::{load_projects, load_transactions, LoadReport};
use presale_analytics::analysis::stats::Describe;
use presale_analytics::analysis::PriceUnit;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Inspect presale registry exports
#[derive(Parser, Debug)]
#[command(name = "dataset_inspect")]
#[command(about = "Check registry exports for completeness and consistency")]
struct Cli {
    /// Transaction export (CSV)
    #[arg(short, long)]
    transactions: PathBuf,

    /// Project export (CSV)
    #[arg(short, long)]
    projects: PathBuf,

    /// Unit of the raw price columns
    #[arg(long, value_enum, default_value = "wan")]
    price_unit: UnitArg,

    /// Minimum key-field completeness (0..=1)
    #[arg(long, default_value_t = 0.95)]
    min_completeness: f64,

    /// Also write the full report as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    /// Number of counties and seasons to list
    #[arg(long, default_value_t = 10)]
    top: usize,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum UnitArg {
    Wan,
    Yuan,
}

impl From<UnitArg> for PriceUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::Wan => PriceUnit::Wan,
            UnitArg::Yuan => PriceUnit::Yuan,
        }
    }
}

fn print_load(report: &LoadReport) {
    println!(
        "  {:<12} read {:>8}  kept {:>8}  rejected {:>6}  ({:.1}% retained)",
        report.dataset,
        report.rows_read,
        report.rows_kept,
        report.rows_rejected,
        report.retention_pct()
    );
    for (reason, count) in &report.reject_reasons {
        println!("      {:<40} {:>6}", reason, count);
    }
}

fn print_completeness(name: &str, report: &CompletenessReport) {
    println!("  {} ({} rows, completeness {:.2}%)", name, report.rows, report.completeness * 100.0);
    for field in report.null_counts.keys() {
        println!("      {:<16} null {:>6.2}%", field, report.null_pct(field));
    }
}

fn print_describe(name: &str, d: &Describe) {
    println!(
        "  {:<10} n={:<8} mean {:>9.2}  std {:>9.2}  min {:>8.2}  q25 {:>8.2}  median {:>8.2}  q75 {:>8.2}  max {:>9.2}",
        name, d.count, d.mean, d.std, d.min, d.q25, d.median, d.q75, d.max
    );
}

fn print_top(title: &str, counts: &std::collections::BTreeMap<String, usize>, top: usize) {
    let mut rows: Vec<(&String, &usize)> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    println!("{}:", title);
    for (name, count) in rows.into_iter().take(top) {
        println!("  {:<16} {:>8}", name, count);
    }
}

fn print_report(report: &ExplorationReport, top: usize) {
    println!("\nCOMPLETENESS:");
    print_completeness("transactions", &report.transactions);
    print_completeness("projects", &report.projects);

    let m = &report.code_match;
    println!("\nCODE OVERLAP:");
    println!("  project codes      {:>8}", m.project_codes);
    println!("  transaction codes  {:>8}", m.transaction_codes);
    println!("  matched            {:>8}  ({:.2}%)", m.matched, m.match_rate);
    println!("  only in projects   {:>8}", m.only_in_projects);
    println!("  only in txns       {:>8}", m.only_in_transactions);
    println!("  spatial match      {:>7.2}%", m.spatial_match_rate);

    println!("\nREGIONS: {} counties, {} districts", report.counties.len(), report.district_count);
    print_top("Transactions by county", &report.by_county, top);
    print_top("Transactions by season", &report.by_season, top);

    println!("\nPRICES:");
    print_describe("total", &report.total_price);
    print_describe("unit", &report.unit_price);
    print_describe("area", &report.area);
    println!("\nCancellation rate: {:.2}%", report.cancellation_rate);

    if report.passes {
        println!("\n✓ Exports pass the quality gate");
    } else {
        println!("\n✗ Quality issues:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let transactions = load_transactions(&cli.transactions, cli.price_unit.into())?;
    let projects = load_projects(&cli.projects)?;

    println!("LOADING:");
    print_load(&transactions.report);
    print_load(&projects.report);

    let report = explore(&transactions.raw, &projects.raw, cli.min_completeness);
    print_report(&report, cli.top);

    if let Some(path) = &cli.json {
        write_json(path, &report)?;
        println!("\nReport written to {}", path.display());
    }
    Ok(report.passes)
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("presale_analytics=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}
