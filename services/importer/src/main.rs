//! Importer - batch entry point.
//!
//! `importer run` fully refreshes the municipal tables from the extracts;
//! `importer overview --municipality <code>` prints what a run persisted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use importer::model::DropTally;
use importer::report::{overview, MunicipalOverview};
use importer::{ImportConfig, Pipeline, RunSummary, Store};

#[derive(Parser, Debug)]
#[command(name = "importer", about = "Loads municipal health extracts into the reporting tables")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full-refresh import (default)
    Run(RunArgs),

    /// Show the persisted overview of one municipality
    Overview {
        /// Canonical municipality code, e.g. 110001
        #[arg(long)]
        municipality: String,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// JSON import configuration (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory relative source paths are resolved against
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Dry run - transform in memory, don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn database_url() -> Result<String> {
    std::env::var("DB_URL").context("DB_URL env var missing")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(run_args) => run(run_args).await,
        Command::Overview { municipality } => show_overview(&municipality).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => ImportConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ImportConfig::default(),
    };
    let data_dir = args.data_dir.unwrap_or_else(|| PathBuf::from("."));
    let config = config.with_data_dir(&data_dir);

    println!("=== Municipal Health Importer ===");
    println!("Facilities:   {}", config.facilities.path.display());
    println!("Assignments:  {}", config.assignments.path.display());
    println!("Demographics: {}", config.demographics.path.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let mut pipeline = Pipeline::from_config(config).context("Invalid import configuration")?;

    let summary = if args.dry_run {
        pipeline.run_dry().await?
    } else {
        let db_url = database_url()?;
        pipeline.run(&db_url).await?
    };

    print_summary(&summary);
    if !summary.persisted {
        println!("\nDry run - nothing saved to database");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let output = &summary.output;
    println!("\n=== Run {} ===", summary.run_id);
    println!("Facilities:     {}", output.facilities.len());
    println!("Municipalities: {}", output.aggregates.len());
    println!("Census rows:    {}", output.demographics.len());
    print_drops(&summary.drops);

    let overviews = overview(&output.aggregates, &output.demographics, &output.facilities);
    for row in overviews.iter().take(3) {
        print_overview(row);
    }
    if overviews.len() > 3 {
        println!("  ... and {} more", overviews.len() - 3);
    }
}

fn print_drops(drops: &DropTally) {
    println!("Dropped rows:   {}", drops.total());
    for (reason, count) in drops.iter() {
        println!("  {reason}: {count}");
    }
}

fn print_overview(row: &MunicipalOverview) {
    let name = row
        .demographics
        .as_ref()
        .map_or("(no census row)", |d| d.municipality_name.as_str());
    println!(
        "  [{}] {} | facilities {} (UBS {}, geolocated {}) | physicians {} | nurses {}",
        row.municipality_code,
        name,
        row.totals.total_facilities,
        row.basic_units,
        row.geolocated_facilities,
        row.totals.total_physicians,
        row.totals.total_nurses,
    );
    if let Some(census) = &row.demographics {
        println!(
            "      population {} | per 10k: {:.2} facilities | per 1k: {:.2} physicians, {:.2} nurses | {:.2} professionals/facility",
            census.population_total,
            row.facilities_per_10k,
            row.physicians_per_1k,
            row.nurses_per_1k,
            row.professionals_per_facility,
        );
    }
}

async fn show_overview(municipality: &str) -> Result<()> {
    let db_url = database_url()?;
    let mut store = Store::connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    let result = store.fetch_overview(municipality).await;
    store.close().await.ok();

    println!("=== Municipality {} ===", municipality);
    match result.context("Failed to read overview")? {
        Some(row) => print_overview(&row),
        None => println!("No facilities recorded for this municipality"),
    }
    Ok(())
}
