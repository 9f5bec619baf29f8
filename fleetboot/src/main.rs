//! Bootstrap agent binary: load the runner configuration and run one
//! bootstrap lifecycle.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fleetboot::config::RunnerConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Prepares an instance to run a fleet-managed worker"
)]
struct Args {
    /// Path to the runner configuration file
    #[arg(long, default_value = "/etc/fleetboot/runner.json")]
    config: PathBuf,
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let args = Args::parse();
    let runnercfg = RunnerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    fleetboot::runner::run(runnercfg)
        .await
        .context("bootstrap run failed")?;
    tracing::info!("bootstrap run complete");
    Ok(())
}
