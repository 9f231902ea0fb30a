//! CLI entry point for the air-quality ETL.
//!
//! Each stage runs on its own (`extract`, `transform`, `load`, `analyze`) or
//! all in order with `run`. Settings come from the environment / `.env`.

use anyhow::Result;
use aq_etl::analyzers::analyzer::run_analysis;
use aq_etl::config::Config;
use aq_etl::extract::{FetchOutcome, Fetcher};
use aq_etl::fetch::BasicClient;
use aq_etl::infra::supabase::SupabaseClient;
use aq_etl::load::Loader;
use aq_etl::output::{read_records, write_records};
use aq_etl::record::Record;
use aq_etl::transform::transform_all;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "aq_etl")]
#[command(about = "Urban air quality ETL: extract, transform, load and analyze", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch raw air quality data for every configured city
    Extract,
    /// Flatten and score raw artifacts into the staged CSV
    Transform,
    /// Insert the staged CSV into the remote table
    Load,
    /// Summarize the remote table into report CSVs and charts
    Analyze,
    /// Run extract, transform, load and analyze in order
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/aq_etl.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("aq_etl.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Extract => extract(&config).await?,
        Commands::Transform => transform(&config)?,
        Commands::Load => load(&config).await?,
        Commands::Analyze => analyze(&config).await?,
        Commands::Run => {
            // Credentials are checked before anything is fetched.
            config.require_store()?;
            extract(&config).await?;
            transform(&config)?;
            load(&config).await?;
            analyze(&config).await?;
        }
    }

    Ok(())
}

#[tracing::instrument(skip_all)]
async fn extract(config: &Config) -> Result<()> {
    info!(cities = ?config.cities, "Starting extraction");

    let fetcher = Fetcher::new(BasicClient::with_timeout(config.timeout)?, config);
    let results = fetcher.fetch_all(&config.cities).await;

    for result in &results {
        match &result.outcome {
            FetchOutcome::Saved(path) => info!(city = %result.city, path = %path.display(), "Saved"),
            FetchOutcome::Failed(e) => error!(city = %result.city, error = %e, "Failed"),
        }
    }

    let saved = results.iter().filter(|r| r.is_success()).count();
    info!(saved, total = results.len(), "Extraction complete");
    Ok(())
}

#[tracing::instrument(skip_all)]
fn transform(config: &Config) -> Result<()> {
    let records = transform_all(&config.raw_dir)?;
    if records.is_empty() {
        warn!("No data to transform");
        return Ok(());
    }

    let path = config.staged_csv();
    write_records(&path, &records)?;
    info!(path = %path.display(), records = records.len(), "Transformed data saved");
    Ok(())
}

#[tracing::instrument(skip_all)]
async fn load(config: &Config) -> Result<()> {
    let store = SupabaseClient::new(config.require_store()?, config.timeout)?;

    let path = config.staged_csv();
    if !path.exists() {
        warn!(path = %path.display(), "Transformed CSV not found");
        return Ok(());
    }
    let records: Vec<Record> = read_records(&path)?;
    if records.is_empty() {
        warn!(path = %path.display(), "Transformed CSV has no rows");
        return Ok(());
    }

    let report = Loader::new(store, config).load(&records).await;
    info!(
        inserted = report.inserted,
        total = report.total,
        failed_batches = report.failed_batches.len(),
        "Load complete"
    );
    Ok(())
}

#[tracing::instrument(skip_all)]
async fn analyze(config: &Config) -> Result<()> {
    let store = SupabaseClient::new(config.require_store()?, config.timeout)?;

    match run_analysis(&store, &config.processed_dir).await? {
        Some(report) => info!(
            city_rows = report.city_risk.len(),
            trend_rows = report.trends.len(),
            processed_dir = %config.processed_dir.display(),
            "Analysis complete"
        ),
        None => warn!("Nothing to analyze"),
    }
    Ok(())
}
