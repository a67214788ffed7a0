//! Cache lifecycle admin CLI.
//!
//! One subcommand per scheduled operation. Exits non-zero only when the
//! store connections cannot be established; failures inside a phase are
//! logged and reported without failing the process, so a flaky entity never
//! flaps the scheduler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use recall_cache::{CacheConfig, CacheManager};

#[derive(Parser, Debug)]
#[command(name = "recall-cache", about = "Cache lifecycle admin for the recall service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Proactively populate the cache with hot data
    Warmup,
    /// Evict stale and low-value cache entries
    Cleanup,
    /// Print a point-in-time metrics snapshot
    Monitor,
    /// Audit cache/source-of-truth agreement
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = CacheConfig::from_env();

    let manager = CacheManager::connect(config)
        .await
        .context("failed to connect to the cache and source-of-truth stores")?;

    match cli.command {
        Command::Warmup => {
            let report = manager.warmup().await;
            print!("{report}");
            if report.has_failures() {
                tracing::warn!("warmup finished with per-entity failures");
            }
        }
        Command::Cleanup => {
            let report = manager.cleanup().await;
            print!("{report}");
            if report.has_failures() {
                tracing::warn!("cleanup finished with per-entity failures");
            }
        }
        Command::Monitor => match manager.metrics_snapshot().await {
            Ok(snapshot) => println!("{snapshot}"),
            Err(e) => tracing::error!(error = %e, "metrics collection failed"),
        },
        Command::Check => {
            let findings = manager.check().await;
            if findings.is_empty() {
                println!("consistency check passed");
            } else {
                println!("{}", serde_json::to_string_pretty(&findings)?);
            }
        }
    }

    Ok(())
}
