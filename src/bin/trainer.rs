use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use shoprec::services::snapshot::{FileSnapshotProvider, SnapshotProvider};
use shoprec::services::store::postgres::connect;
use shoprec::services::store::{InteractionStore, PgInteractionStore};
use shoprec::services::training::train_snapshot;
use shoprec::utils::validation::validate_config;
use shoprec::{init_tracing, Config};
use std::path::PathBuf;
use tracing::{error, info};

/// Offline trainer: reads the full event log, fits the model and writes the
/// snapshot bundle the server loads. Exits non-zero on any failure.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write the snapshot here instead of the configured location
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    if let Err(e) = run(args).await {
        error!("Training failed: {:#}", e);
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(&args.config)?;
    validate_config(&config)?;
    info!("Training configuration loaded: {:?}", config.training);

    let pool = connect(&config.postgres).await?;
    let events = PgInteractionStore::new(pool)
        .all_events()
        .await
        .context("loading events")?;

    let training = config.training.clone();
    let bundle = tokio::task::spawn_blocking(move || train_snapshot(&events, &training, Utc::now())).await??;

    let path = args.output.unwrap_or_else(|| config.model.snapshot_path());
    FileSnapshotProvider::new(path).persist(&bundle)?;

    info!(
        "Snapshot written: {} products, {} users, RMSE {:.4}, MAE {:.4}",
        bundle.membership.product_ids.len(),
        bundle.membership.user_ids.len(),
        bundle.membership.model_params.rmse,
        bundle.membership.model_params.mae
    );
    Ok(())
}
