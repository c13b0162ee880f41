use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tg_storefront::config;
use tg_storefront::db;
use tg_storefront::import::{self, ImportOptions};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import a CSV/XLSX price list into the product catalog"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// CSV, TSV or XLSX file to import
    file: PathBuf,

    /// Validate and count changes without writing them.
    #[arg(long)]
    dry_run: bool,

    /// Print the full report as JSON instead of the text summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let file_name = args.file.file_name().and_then(|n| n.to_str());
    info!(file = %args.file.display(), size = bytes.len(), dry_run = args.dry_run, "importing");

    let opts = ImportOptions {
        batch_size: cfg.import.batch_size,
        dry_run: args.dry_run,
    };
    let report = import::run_import(&pool, bytes, file_name, &opts).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary(50));
    }
    Ok(())
}
