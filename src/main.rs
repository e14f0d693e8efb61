use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use studio_geocoder::{init_tracing, AppConfig, GeocodeService};

#[derive(Parser, Debug)]
#[command(name = "studio-geocoder", version, about = "Geocode studio addresses")]
struct Cli {
    /// SQLite database holding studios and the geocode cache
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve and store coordinates for one studio
    Resolve { studio_id: i64 },
    /// Resolve a free-text address without touching any studio
    Geocode { address: String },
    /// Queue every studio lacking coordinates and wait for the backlog to drain
    Scan {
        /// Only list the studios that would be queued
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete stale persistent cache entries
    Sweep,
    /// Print configuration, cache and queue state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    let service = GeocodeService::from_config(config).context("failed to start geocode service")?;

    match cli.command {
        Command::Resolve { studio_id } => {
            let applied = service
                .resolve_studio(studio_id)
                .await
                .with_context(|| format!("studio {studio_id} was not geocoded"))?;
            print_json(&applied)?;
        }
        Command::Geocode { address } => {
            print_json(&service.resolve_text(&address).await)?;
        }
        Command::Scan { dry_run: true } => {
            print_json(&service.pending_studios()?)?;
        }
        Command::Scan { dry_run: false } => {
            let report = service.scan()?;
            tracing::info!(found = report.found, enqueued = report.enqueued, "waiting for queue to drain");
            service.wait_idle().await;
            print_json(&service.queue_status())?;
        }
        Command::Sweep => {
            print_json(&service.sweep_cache()?)?;
        }
        Command::Status => {
            print_json(&service.health())?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
