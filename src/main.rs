//! Equity Aggregator CLI.
//!
//! Three subcommands: `seed` runs the full pipeline and persists the
//! result, `export` writes the current store to a gzip NDJSON artifact,
//! and `download` rebuilds the store from a previously exported
//! artifact.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use equity_aggregator::cache::CacheStore;
use equity_aggregator::pipeline::aggregate_equity_profiles;
use equity_aggregator::Config;

#[derive(Parser)]
#[command(name = "equity-aggregator", about = "Aggregates authoritative exchange feeds into canonical equity records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the full pipeline and persists the resulting canonical equities.
    Seed,
    /// Writes the current store to a gzip-compressed NDJSON artifact.
    Export {
        #[arg(long)]
        path: Option<std::path::PathBuf>,
    },
    /// Downloads the latest canonical equities artifact from the
    /// configured remote release and rebuilds the store from it.
    Download,
}

fn init_logging(log_dir: Option<&std::path::Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    if let Some(dir) = log_dir {
        let _ = std::fs::create_dir_all(dir);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "equity-aggregator failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    init_logging(config.log_dir.as_deref());

    let cache = CacheStore::open(config.db_path(), config.cache_ttl_minutes)
        .context("opening cache store")?;

    match cli.command {
        Command::Seed => {
            let client = equity_aggregator::http::ClientFactory::default()
                .with_timeout(config.http_timeout)
                .build(&[])
                .context("building http client")?;
            let equities = aggregate_equity_profiles(&config, &client, &cache)
                .await
                .context("running pipeline")?;
            tracing::info!(count = equities.len(), "seeded canonical equities");
            Ok(())
        }
        Command::Export { path } => {
            let path = path.unwrap_or_else(|| config.export_path());
            let count = cache.export(&path).await.context("exporting canonical equities")?;
            tracing::info!(count, path = %path.display(), "export complete");
            Ok(())
        }
        Command::Download => {
            let client = equity_aggregator::http::ClientFactory::default()
                .with_timeout(config.http_timeout)
                .build(&[])
                .context("building http client")?;
            let count = equity_aggregator::retrieval::download_canonical_equities(&config, &client, &cache)
                .await
                .context("downloading canonical equities from remote release")?;
            tracing::info!(count, "download complete");
            Ok(())
        }
    }
}
