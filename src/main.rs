//! Presale Analytics CLI
//!
//! Runs the integrated absorption pipeline and inspects stored runs.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin presale -- run \
//!   --config pipeline_config.toml \
//!   --transactions data/raw/lvr_presale.csv \
//!   --projects data/raw/lvr_sale_data.csv \
//!   --season 113Y3S --season 113Y4S \
//!   --charts
//!
//! cargo run --bin presale -- init-config pipeline_config.toml
//! cargo run --bin presale -- runs --db output/runs.db
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success, every integrity check passed
//! - 1: Run completed but an integrity check failed
//! - 2: Configuration or validation error
//! - 3: Runtime error (I/O, database, etc.)

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use presale_analytics::analysis::charts::{render_dashboard, DEFAULT_WIDTH};
use presale_analytics::analysis::{ConfigError, LoadError, Pipeline, PipelineConfig, RunStore, YearSeason};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "presale", version)]
#[command(about = "Presale housing absorption, cancellation and risk analytics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline
    Run(RunArgs),

    /// Write a config file with every default filled in
    InitConfig {
        #[arg(default_value = "pipeline_config.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List stored runs, or compare two of them
    Runs {
        /// SQLite run store
        #[arg(long, env = "PRESALE_RUN_DB")]
        db: PathBuf,

        /// Compare net absorption between two run ids
        #[arg(long, num_args = 2, value_names = ["BEFORE", "AFTER"])]
        compare: Option<Vec<String>>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Pipeline config (TOML)
    #[arg(short, long, env = "PIPELINE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Transaction export, overrides data_paths.pre_sale_data
    #[arg(long)]
    transactions: Option<PathBuf>,

    /// Project export, overrides data_paths.sale_data
    #[arg(long)]
    projects: Option<PathBuf>,

    /// Report directory, overrides data_paths.output_dir
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Target season such as 113Y2S; repeat for several
    #[arg(long = "season")]
    seasons: Vec<YearSeason>,

    /// Reference date for season completeness (YYYY-MM-DD)
    #[arg(long)]
    analysis_date: Option<NaiveDate>,

    /// Record the run in this SQLite file
    #[arg(long)]
    run_db: Option<PathBuf>,

    /// Export chart datasets and a text dashboard
    #[arg(long)]
    charts: bool,

    /// Print the text dashboard after the run
    #[arg(long)]
    dashboard: bool,
}

// =============================================================================
// COMMANDS
// =============================================================================

fn load_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::from_env(),
    };

    if let Some(path) = &args.transactions {
        config.data_paths.pre_sale_data = path.clone();
    }
    if let Some(path) = &args.projects {
        config.data_paths.sale_data = path.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.data_paths.output_dir = dir.clone();
    }
    if let Some(db) = &args.run_db {
        config.data_paths.run_db = Some(db.clone());
    }
    if !args.seasons.is_empty() {
        config.analysis.target_seasons = args.seasons.clone();
    }
    if let Some(date) = args.analysis_date {
        config.analysis.analysis_date = date;
    }

    config.validate()?;
    Ok(config)
}

/// Configuration and input-contract failures exit 2, everything else 3.
fn failure_code(err: &anyhow::Error) -> i32 {
    let is_validation = err.chain().any(|cause| {
        cause.is::<ConfigError>()
            || matches!(cause.downcast_ref::<LoadError>(), Some(LoadError::MissingColumns { .. }))
    });
    if is_validation {
        2
    } else {
        3
    }
}

fn run(args: RunArgs) -> i32 {
    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{:#}", e);
            return 2;
        }
    };

    let pipeline = Pipeline::new(config).with_chart_export(args.charts);
    let outcome = match pipeline.run() {
        Ok(o) => o,
        Err(e) => {
            error!("{:#}", e);
            return failure_code(&e);
        }
    };

    println!("{}", outcome.performance.executive_summary());
    println!("INTEGRITY:");
    for check in &outcome.integrity.checks {
        println!("  {} {:<26} {}", if check.passed { "✓" } else { "✗" }, check.name, check.detail);
    }
    println!();
    println!("OUTPUTS:");
    for path in &outcome.outputs {
        println!("  {}", path.display());
    }
    if let Some(run_id) = &outcome.summary.run_id {
        println!("\nRun id: {}", run_id);
    }
    if args.dashboard {
        println!("\n{}", render_dashboard(&outcome.insights, DEFAULT_WIDTH));
    }

    if outcome.passed() {
        0
    } else {
        1
    }
}

fn init_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    PipelineConfig::default().save(&path)?;
    info!(path = %path.display(), "Wrote default config");
    Ok(())
}

fn runs(db: PathBuf, compare: Option<Vec<String>>) -> Result<()> {
    let store = RunStore::open(&db)?;

    if let Some(ids) = compare {
        let (before, after) = match ids.as_slice() {
            [a, b] => (a, b),
            _ => anyhow::bail!("--compare takes exactly two run ids"),
        };
        println!("{:<16} {:<8} {:>10} {:>10} {:>10}", "code", "season", "before", "after", "change");
        let fmt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "-".to_string());
        for delta in store.compare_runs(before, after)? {
            println!(
                "{:<16} {:<8} {:>10} {:>10} {:>10}",
                delta.code,
                delta.season,
                fmt(delta.before),
                fmt(delta.after),
                fmt(delta.change()),
            );
        }
        return Ok(());
    }

    println!("{:<38} {:<26} {:>8} {:>9} {:>8}  {}", "run id", "started", "rows", "secs", "passed", "config");
    for run in store.list_runs()? {
        println!(
            "{:<38} {:<26} {:>8} {:>9.2} {:>8}  {}",
            run.run_id,
            run.started_at.to_rfc3339(),
            run.community_rows,
            run.total_secs,
            if run.integrity_passed { "yes" } else { "no" },
            &run.config_fingerprint[..run.config_fingerprint.len().min(12)],
        );
    }
    Ok(())
}

// =============================================================================
// MAIN
// =============================================================================

fn main() {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("presale_analytics=info,presale=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run(args) => run(args),
        Commands::InitConfig { path, force } => match init_config(path, force) {
            Ok(()) => 0,
            Err(e) => {
                error!("{:#}", e);
                2
            }
        },
        Commands::Runs { db, compare } => match runs(db, compare) {
            Ok(()) => 0,
            Err(e) => {
                error!("{:#}", e);
                3
            }
        },
    };
    std::process::exit(code);
}
