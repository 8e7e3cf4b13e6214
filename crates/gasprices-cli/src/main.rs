use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use gasprices_ingest::{ingest_urls, read_url_list, IngestConfig, PageFetcher};
use gasprices_store::Store;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gasprices")]
#[command(about = "Fuel price ingestion and charting")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch all configured source pages and persist extracted records.
    Ingest,
    /// Serve the price history chart.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Ingest => ingest().await,
        Commands::Serve => serve().await,
    }
}

async fn ingest() -> Result<()> {
    let config = IngestConfig::from_env();
    if config.dsn.is_empty() {
        bail!("DSN environment variable is required");
    }
    let urls = read_url_list(&config.urls_file)?;
    if urls.is_empty() {
        warn!(file = %config.urls_file, "url list is empty, nothing to ingest");
        return Ok(());
    }

    let store = Store::connect(&config.dsn).await?;
    store.ensure_schema().await?;

    let fetcher = Arc::new(PageFetcher::new(&config).context("building page fetcher")?);
    let outcome = ingest_urls(fetcher, urls, config.title_mode).await;

    let inserted = store.upsert_batch(&outcome.records).await?;
    info!(
        records = outcome.records.len(),
        inserted, "persisted ingest batch"
    );
    store.close().await;

    // Committed batches stay; layout drift still fails the run so an
    // external scheduler surfaces it.
    if !outcome.failures.is_empty() {
        for failure in &outcome.failures {
            warn!(url = %failure.url, error = %failure.error, "page failed extraction");
        }
        bail!(
            "{} of the source pages no longer match the expected layout",
            outcome.failures.len()
        );
    }
    Ok(())
}

async fn serve() -> Result<()> {
    let config = IngestConfig::from_env();
    if config.dsn.is_empty() {
        bail!("DSN environment variable is required");
    }
    let port: u16 = std::env::var("WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let store = Store::connect(&config.dsn).await?;
    store.ensure_schema().await?;
    info!(port, "serving price chart");
    gasprices_web::serve(store, port).await
}
