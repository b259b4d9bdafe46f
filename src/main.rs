//! testnet-harness - run a scenario suite against a fresh test network.
//!
//! Loads the network config and environment settings, brings the network up
//! in its own namespace, runs the built-in liveness scenario, and submits the
//! teardown task.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use testnet_harness::config::{HarnessSettings, NetworkConfig};
use testnet_harness::connect;
use testnet_harness::scenario::{ScenarioOutcome, ScenarioSuite, network_liveness};

#[derive(Parser, Debug)]
#[command(name = "testnet-harness", version, about)]
struct Cli {
    /// Network configuration file
    #[arg(long, short, env = "HARNESS_CONFIG")]
    config: PathBuf,

    /// Re-raise setup failures and keep the namespace
    #[arg(long)]
    debug: bool,

    /// Skip the suite without creating anything
    #[arg(long)]
    skip: bool,

    /// Epochs the liveness scenario lets the network run
    #[arg(long, default_value_t = 2)]
    epochs: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("testnet_harness=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let cli = Cli::parse();
    info!(config = %cli.config.display(), "Starting testnet-harness");

    let config = NetworkConfig::load(&cli.config)?;
    let mut settings = HarnessSettings::from_env()?;
    settings.debug |= cli.debug;

    if cli.skip {
        info!("Suite skipped, nothing created");
        return Ok(ExitCode::SUCCESS);
    }

    let (cluster, mut lifecycle) = connect(config, settings).await?;
    let suite = ScenarioSuite::new("network").with(network_liveness(cluster, cli.epochs));

    let report = match lifecycle.run(&suite).await {
        Ok(report) => report,
        Err(failure) => {
            error!(
                namespace = lifecycle.namespace().unwrap_or("-"),
                "Setup failed in debug mode, namespace kept"
            );
            return Err(failure.into());
        }
    };

    for result in &report.scenarios {
        match &result.outcome {
            ScenarioOutcome::Passed => info!(scenario = %result.name, "PASS"),
            ScenarioOutcome::Skipped => info!(scenario = %result.name, "SKIP"),
            ScenarioOutcome::Failed(reason) => error!(scenario = %result.name, reason = %reason, "FAIL"),
        }
    }
    if let Some(failure) = &report.setup_failure {
        error!(error = %failure, "Setup failed");
    }

    Ok(if report.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
