//! pulsed — the pulsegrid health daemon.
//!
//! Two modes:
//!
//! - **standalone** — the full ingestion-and-analysis loop in one
//!   process, fed by a simulated fleet over the in-process bus. For
//!   local development; the fleet bus and replicated KV adapters plug
//!   into the same interfaces in production.
//! - **analyze** — one analysis pass over an embedded store, printing
//!   any pending stops as JSON.
//!
//! # Usage
//!
//! ```text
//! pulsed standalone --hosts 3 --apps 2 --run-for 90 --duplicate
//! pulsed analyze --data-dir /var/lib/pulsegrid
//! ```

mod standalone;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use pulse_core::{Clock, Config, SystemClock};
use pulsegrid_analyzer::{AnalysisResult, Analyzer};
use pulsegrid_kv::RedbKv;
use pulsegrid_metrics::NullSink;
use pulsegrid_store::HealthStore;

#[derive(Parser)]
#[command(name = "pulsed", about = "pulsegrid health daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process with a simulated fleet.
    Standalone {
        /// Path to a pulsegrid.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of simulated execution hosts.
        #[arg(long, default_value = "3")]
        hosts: usize,

        /// Number of simulated apps (two desired instances each).
        #[arg(long, default_value = "2")]
        apps: usize,

        /// Seconds to run before draining and exiting.
        #[arg(long, default_value = "90")]
        run_for: u64,

        /// Persist state under this directory instead of in memory.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Seed one duplicate instance so the analyzer has work.
        #[arg(long)]
        duplicate: bool,
    },

    /// Run one analysis pass against an embedded store.
    Analyze {
        /// Path to a pulsegrid.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory holding pulsegrid.redb.
        #[arg(long, default_value = "/var/lib/pulsegrid")]
        data_dir: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Standalone {
            config,
            hosts,
            apps,
            run_for,
            data_dir,
            duplicate,
        } => {
            let config = load_config(config.as_ref())?;
            standalone::run(
                config,
                standalone::StandaloneOpts {
                    hosts,
                    apps,
                    run_for,
                    data_dir,
                    duplicate,
                },
            )
            .await
        }
        Command::Analyze { config, data_dir } => {
            let config = load_config(config.as_ref())?;
            analyze_once(config, &data_dir).await
        }
    }
}

async fn analyze_once(config: Config, data_dir: &std::path::Path) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = Arc::new(RedbKv::open(&data_dir.join("pulsegrid.redb"), clock.clone())?);
    let store = Arc::new(HealthStore::new(kv, clock.clone(), config, Arc::new(NullSink)));
    let analyzer = Analyzer::new(store, clock);

    match analyzer.analyze().await? {
        AnalysisResult::Complete { stops } => {
            println!("{}", serde_json::to_string_pretty(&stops)?);
        }
        AnalysisResult::NotFresh(status) => {
            info!(%status, "nothing to do");
            println!("[]");
        }
    }
    Ok(())
}
